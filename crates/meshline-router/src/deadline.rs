//! Settable deadlines for blocking operations
//!
//! A [`Deadline`] can be moved at any time. Operations already waiting
//! under it observe the change: moving the deadline into the past fails
//! them immediately, clearing it lets them wait indefinitely.

use std::future::Future;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::{Instant, sleep_until};

use crate::error::{RouteGroupError, RouteGroupResult};

/// A deadline shared between the setter and waiting operations
#[derive(Debug, Default)]
pub struct Deadline {
    at: Mutex<Option<Instant>>,
    changed: Notify,
}

impl Deadline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or clear the deadline, waking operations waiting under it
    pub fn set(&self, at: Option<Instant>) {
        *self.at.lock() = at;
        self.changed.notify_waiters();
    }

    pub fn get(&self) -> Option<Instant> {
        *self.at.lock()
    }

    /// Whether the deadline is set and has passed
    pub fn is_expired(&self) -> bool {
        self.get().is_some_and(|at| at <= Instant::now())
    }
}

/// Run `fut` until it completes or `deadline` passes
///
/// Fails with [`RouteGroupError::Timeout`] without polling `fut` if the
/// deadline has already passed.
pub async fn with_deadline<F, T>(deadline: &Deadline, fut: F) -> RouteGroupResult<T>
where
    F: Future<Output = RouteGroupResult<T>>,
{
    tokio::pin!(fut);

    loop {
        let changed = deadline.changed.notified();
        tokio::pin!(changed);
        changed.as_mut().enable();

        let at = deadline.get();
        if at.is_some_and(|at| at <= Instant::now()) {
            return Err(RouteGroupError::Timeout);
        }

        tokio::select! {
            result = &mut fut => return result,
            _ = &mut changed => continue,
            _ = sleep_until_some(at) => return Err(RouteGroupError::Timeout),
        }
    }
}

async fn sleep_until_some(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
