//! Route group configuration

use std::time::Duration;

use meshline_core::MAX_PAYLOAD_SIZE;
use serde::{Deserialize, Serialize};

/// How a write picks among several usable paths
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathPolicy {
    /// Send on the first usable path; its failure is the write's failure
    #[default]
    FirstUsable,
    /// Try usable paths in order until one succeeds
    ///
    /// Bytes already sent on a failed path are not repeated on the next one.
    Failover,
}

/// Configuration for a route group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteGroupConfig {
    /// Number of payloads buffered before delivery waits for the reader
    pub inbound_capacity: usize,
    /// Longest interval between keep-alive packets on an idle group
    ///
    /// Shortened to half the smallest forward rule keep-alive when that is
    /// lower, so remote rules never expire on an idle group.
    pub keep_alive_interval: Duration,
    /// How long `close` waits for each Close packet to be sent
    pub close_timeout: Duration,
    /// Largest payload put in a single data packet
    pub max_frame_payload: usize,
    /// Path selection for writes
    pub path_policy: PathPolicy,
}

impl Default for RouteGroupConfig {
    fn default() -> Self {
        Self {
            inbound_capacity: 1024,
            keep_alive_interval: Duration::from_secs(60),
            close_timeout: Duration::from_secs(5),
            max_frame_payload: MAX_PAYLOAD_SIZE,
            path_policy: PathPolicy::FirstUsable,
        }
    }
}

impl RouteGroupConfig {
    pub fn with_inbound_capacity(mut self, capacity: usize) -> Self {
        self.inbound_capacity = capacity.max(1);
        self
    }

    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Set the frame payload limit, clamped to `1..=MAX_PAYLOAD_SIZE`
    pub fn with_max_frame_payload(mut self, max: usize) -> Self {
        self.max_frame_payload = max.clamp(1, MAX_PAYLOAD_SIZE);
        self
    }

    pub fn with_path_policy(mut self, policy: PathPolicy) -> Self {
        self.path_policy = policy;
        self
    }
}
