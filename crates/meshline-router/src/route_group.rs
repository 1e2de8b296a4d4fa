//! Route groups: one logical flow over several physical paths
//!
//! A [`RouteGroup`] pairs transport links with the forward rules used to
//! address packets on them. The application reads and writes a byte stream;
//! a dispatcher feeds inbound payloads and close notifications from the
//! links.
//!
//! ## Lifecycle
//!
//! ```text
//! Open ──peer Close──> HalfClosedRemote ──close()──> Closed
//!   └─────────────────────close()──────────────────────┘
//! ```
//!
//! A peer close only ends the inbound stream. Paths, links and rule-table
//! entries are released by a local [`RouteGroup::close`].

use std::collections::VecDeque;
use std::fmt::Debug;
use std::mem;
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use meshline_core::{
    Addr, CloseCode, ForwardRule, Packet, RouteDescriptor, RouteId, RoutingError, TransportError,
    TransportId, TransportLink,
};
use meshline_routing::{RuleTable, RuleTableError};
use parking_lot::Mutex;
use tokio::sync::{Notify, RwLock, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until, timeout};
use tracing::{debug, instrument, trace, warn};

use crate::config::{PathPolicy, RouteGroupConfig};
use crate::deadline::{Deadline, with_deadline};
use crate::error::{RouteGroupError, RouteGroupResult};
use crate::event::RouteGroupEvent;

/// Capacity of the lifecycle event channel
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Lifecycle state of a route group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Open,
    /// The peer closed; inbound is finished, writes still go out
    HalfClosedRemote,
    /// Closed locally; terminal
    Closed,
}

/// Links and rules, paired by index
///
/// A slot may be emptied to mark a path unusable without shifting the rest.
#[derive(Default)]
struct Paths {
    links: Vec<Option<Arc<dyn TransportLink>>>,
    rules: Vec<Option<ForwardRule>>,
    released: bool,
}

impl Paths {
    /// Usable (link, rule) pairs in list order
    fn usable(&self) -> RouteGroupResult<Vec<(Arc<dyn TransportLink>, ForwardRule)>> {
        if self.links.is_empty() {
            return Err(RouteGroupError::NoTransports);
        }
        if self.rules.is_empty() {
            return Err(RouteGroupError::NoRules);
        }

        let pairs: Vec<_> = self
            .links
            .iter()
            .zip(&self.rules)
            .filter_map(|pair| match pair {
                (Some(link), Some(rule)) => Some((Arc::clone(link), *rule)),
                _ => None,
            })
            .collect();

        if pairs.is_empty() {
            return Err(RouteGroupError::BadTransport);
        }
        Ok(pairs)
    }
}

/// Inbound queue and lifecycle, guarded together
struct Inbound {
    queue: VecDeque<Bytes>,
    /// Cleared once the group is done; later deliveries are dropped
    accepting: bool,
    lifecycle: Lifecycle,
    close_code: Option<CloseCode>,
}

/// One logical flow between two endpoints, carried over one or more paths
pub struct RouteGroup {
    desc: RouteDescriptor,
    config: RouteGroupConfig,
    rule_table: Arc<dyn RuleTable>,
    paths: RwLock<Paths>,
    inbound: Mutex<Inbound>,
    /// Woken when a payload is queued or the group is done
    readable: Notify,
    /// Woken when queue space frees up or the group is done
    space: Notify,
    done: watch::Sender<bool>,
    /// Set by a local close; in-flight writes give up on it
    closed: watch::Sender<bool>,
    read_deadline: Deadline,
    write_deadline: Deadline,
    events: broadcast::Sender<RouteGroupEvent>,
    last_sent: Mutex<Instant>,
}

impl RouteGroup {
    /// Create a route group with no paths
    ///
    /// `desc` is seen from this node: its destination is the local endpoint.
    pub fn new(
        config: RouteGroupConfig,
        rule_table: Arc<dyn RuleTable>,
        desc: RouteDescriptor,
    ) -> Self {
        let (done, _) = watch::channel(false);
        let (closed, _) = watch::channel(false);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            desc,
            config,
            rule_table,
            paths: RwLock::new(Paths::default()),
            inbound: Mutex::new(Inbound {
                queue: VecDeque::new(),
                accepting: true,
                lifecycle: Lifecycle::Open,
                close_code: None,
            }),
            readable: Notify::new(),
            space: Notify::new(),
            done,
            closed,
            read_deadline: Deadline::new(),
            write_deadline: Deadline::new(),
            events,
            last_sent: Mutex::new(Instant::now()),
        }
    }

    pub fn descriptor(&self) -> RouteDescriptor {
        self.desc
    }

    pub fn config(&self) -> &RouteGroupConfig {
        &self.config
    }

    /// The local endpoint
    pub fn local_addr(&self) -> Addr {
        self.desc.dst()
    }

    /// The remote endpoint
    pub fn remote_addr(&self) -> Addr {
        self.desc.src()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.inbound.lock().lifecycle
    }

    /// Last close code sent or received
    pub fn close_code(&self) -> Option<CloseCode> {
        self.inbound.lock().close_code
    }

    /// Whether the group was closed locally
    pub fn is_closed(&self) -> bool {
        self.lifecycle() == Lifecycle::Closed
    }

    /// Whether the inbound stream has finished, by either side closing
    pub fn is_done(&self) -> bool {
        self.lifecycle() != Lifecycle::Open
    }

    /// Wait until the group is done
    pub async fn done(&self) {
        let mut rx = self.done.subscribe();
        // The sender lives as long as self, so this cannot fail.
        let _ = rx.wait_for(|done| *done).await;
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<RouteGroupEvent> {
        self.events.subscribe()
    }

    /// Number of payloads waiting to be read
    pub fn queued(&self) -> usize {
        self.inbound.lock().queue.len()
    }

    /// Append a path
    #[instrument(skip(self, link, rule), fields(transport_id = %link.id(), route_id = %rule.local_route_id()))]
    pub async fn add_path(
        &self,
        link: Arc<dyn TransportLink>,
        rule: ForwardRule,
    ) -> RouteGroupResult<()> {
        let transport_id = link.id();
        if transport_id != rule.transport_id() {
            warn!(rule_transport = %rule.transport_id(), "Forward rule names a different transport");
        }

        {
            let mut paths = self.paths.write().await;
            if paths.released {
                return Err(RouteGroupError::Closed);
            }
            paths.links.push(Some(link));
            paths.rules.push(Some(rule));
        }

        debug!("Path added");
        let _ = self.events.send(RouteGroupEvent::PathAdded { transport_id });
        Ok(())
    }

    /// Append a path using the forward rule stored under `route_id`
    pub async fn add_path_from_table(
        &self,
        link: Arc<dyn TransportLink>,
        route_id: RouteId,
    ) -> RouteGroupResult<()> {
        let rule = self.rule_table.rule(route_id)?;
        let forward = rule.as_forward().copied().ok_or_else(|| {
            RuleTableError::from(RoutingError::InvalidRule(format!(
                "route {} is not a forward rule",
                route_id
            )))
        })?;

        self.add_path(link, forward).await
    }

    /// Empty the link slot of every path over `transport_id`
    ///
    /// Returns the number of paths made unusable.
    pub async fn remove_transport(&self, transport_id: TransportId) -> usize {
        let mut paths = self.paths.write().await;
        let mut removed = 0;
        for slot in paths.links.iter_mut() {
            if slot.as_ref().is_some_and(|link| link.id() == transport_id) {
                *slot = None;
                removed += 1;
            }
        }

        if removed > 0 {
            debug!(%transport_id, removed, "Transport removed from route group");
        }
        removed
    }

    /// Read queued bytes into `buf`
    ///
    /// Waits until a payload is queued. A payload longer than `buf` is read
    /// in several calls. Once the group is done and the queue is drained,
    /// every call returns [`RouteGroupError::EndOfStream`].
    pub async fn read(&self, buf: &mut [u8]) -> RouteGroupResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        with_deadline(&self.read_deadline, self.read_queued(buf)).await
    }

    /// Take up to `max` queued bytes without copying
    ///
    /// Same waiting, deadline and end-of-stream behavior as [`read`](Self::read).
    pub async fn read_chunk(&self, max: usize) -> RouteGroupResult<Bytes> {
        if max == 0 {
            return Ok(Bytes::new());
        }

        with_deadline(&self.read_deadline, self.take_queued(max)).await
    }

    async fn read_queued(&self, buf: &mut [u8]) -> RouteGroupResult<usize> {
        let chunk = self.take_queued(buf.len()).await?;
        buf[..chunk.len()].copy_from_slice(&chunk);
        Ok(chunk.len())
    }

    async fn take_queued(&self, max: usize) -> RouteGroupResult<Bytes> {
        loop {
            let readable = self.readable.notified();
            tokio::pin!(readable);
            readable.as_mut().enable();

            {
                let mut inbound = self.inbound.lock();
                if let Some(head) = inbound.queue.front_mut() {
                    let chunk = if head.len() <= max {
                        mem::take(head)
                    } else {
                        head.split_to(max)
                    };
                    if head.is_empty() {
                        inbound.queue.pop_front();
                    }
                    drop(inbound);

                    self.space.notify_waiters();
                    return Ok(chunk);
                }

                if inbound.lifecycle != Lifecycle::Open {
                    return Err(RouteGroupError::EndOfStream);
                }
            }

            readable.await;
        }
    }

    /// Write `buf` as data packets on a usable path
    ///
    /// Payloads above the frame limit of the chosen link are split over
    /// several packets. Returns `buf.len()` on success.
    pub async fn write(&self, buf: &[u8]) -> RouteGroupResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.is_closed() {
            return Err(RouteGroupError::Closed);
        }

        let mut closed = self.closed.subscribe();
        tokio::select! {
            result = with_deadline(&self.write_deadline, self.write_paths(buf)) => result,
            _ = raised(&mut closed) => Err(RouteGroupError::Closed),
        }
    }

    async fn write_paths(&self, buf: &[u8]) -> RouteGroupResult<usize> {
        let pairs = {
            let paths = self.paths.read().await;
            if paths.released {
                return Err(RouteGroupError::Closed);
            }
            paths.usable()?
        };

        let mut offset = 0;
        let mut last_err = RouteGroupError::BadTransport;
        for (link, rule) in pairs {
            match self.send_frames(&link, &rule, &buf[offset..]).await {
                Ok(()) => {
                    trace!(transport_id = %link.id(), bytes = buf.len(), "Wrote to route group");
                    return Ok(buf.len());
                }
                Err((sent, e)) => {
                    offset += sent;
                    warn!(transport_id = %link.id(), error = %e, "Write on path failed");
                    last_err = e;
                    if self.config.path_policy == PathPolicy::FirstUsable {
                        break;
                    }
                }
            }
        }

        Err(last_err)
    }

    /// Send `buf` as consecutive data packets on one path
    ///
    /// On failure, returns how many bytes went out before it.
    async fn send_frames(
        &self,
        link: &Arc<dyn TransportLink>,
        rule: &ForwardRule,
        buf: &[u8],
    ) -> Result<(), (usize, RouteGroupError)> {
        let frame_len = self.config.max_frame_payload.min(link.max_payload()).max(1);

        let mut sent = 0;
        for chunk in buf.chunks(frame_len) {
            let packet = Packet::data(rule.remote_route_id(), Bytes::copy_from_slice(chunk))
                .map_err(|e| (sent, RouteGroupError::from(e)))?;
            link.write_packet(&packet)
                .await
                .map_err(|e| (sent, RouteGroupError::from(e)))?;

            sent += chunk.len();
            *self.last_sent.lock() = Instant::now();
        }

        Ok(())
    }

    /// Close the group
    ///
    /// Sends a Close packet with `code` on every usable path, then releases
    /// the paths, closes their links and deletes the forward rules from the
    /// rule table. Writes in flight fail with [`RouteGroupError::Closed`].
    /// Each Close packet gets at most `close_timeout` to go out. Teardown
    /// completes even if some Close packets fail; those failures are
    /// returned as [`RouteGroupError::ClosePaths`]. Closing an already
    /// closed group does nothing.
    #[instrument(skip(self), fields(route = %self.desc))]
    pub async fn close(&self, code: CloseCode) -> RouteGroupResult<()> {
        let remote_closed = {
            let mut inbound = self.inbound.lock();
            let previous = inbound.lifecycle;
            if previous == Lifecycle::Closed {
                return Ok(());
            }

            inbound.lifecycle = Lifecycle::Closed;
            inbound.accepting = false;
            inbound.close_code = Some(code);
            self.done.send_replace(true);
            self.closed.send_replace(true);
            previous == Lifecycle::HalfClosedRemote
        };
        self.readable.notify_waiters();
        self.space.notify_waiters();

        let (links, rules) = {
            let mut paths = self.paths.write().await;
            paths.released = true;
            (mem::take(&mut paths.links), mem::take(&mut paths.rules))
        };

        let mut errors = Vec::new();
        for (link, rule) in links.iter().zip(&rules) {
            let (Some(link), Some(rule)) = (link, rule) else {
                continue;
            };

            let packet = Packet::close(rule.remote_route_id(), code);
            let sent = timeout(self.config.close_timeout, link.write_packet(&packet))
                .await
                .unwrap_or_else(|_| {
                    Err(TransportError::SendFailed(format!(
                        "close not sent within {:?}",
                        self.config.close_timeout
                    )))
                });
            match sent {
                Ok(()) => {}
                // The peer already closed and may have dropped its end.
                Err(TransportError::ConnectionClosed) if remote_closed => {
                    trace!(transport_id = %link.id(), "Peer gone before close was sent");
                }
                Err(e) => {
                    warn!(transport_id = %link.id(), error = %e, "Failed to send close");
                    errors.push(e);
                }
            }
        }

        for link in links.iter().flatten() {
            if let Err(e) = link.close().await {
                debug!(transport_id = %link.id(), error = %e, "Failed to close link");
            }
        }

        let route_ids: Vec<RouteId> = rules.iter().flatten().map(|r| r.local_route_id()).collect();
        self.rule_table.del_rules(&route_ids);

        debug!(%code, paths = links.len(), failed = errors.len(), "Route group closed");
        let _ = self.events.send(RouteGroupEvent::Closed { code });

        if errors.is_empty() {
            Ok(())
        } else {
            Err(RouteGroupError::ClosePaths(errors))
        }
    }

    /// Handle a Close packet from the peer
    ///
    /// Ends the inbound stream; paths stay in place so the local side can
    /// still write until it closes. Late or repeated calls are no-ops.
    pub fn handle_close_packet(&self, code: CloseCode) -> RouteGroupResult<()> {
        {
            let mut inbound = self.inbound.lock();
            if inbound.lifecycle != Lifecycle::Open {
                trace!(%code, lifecycle = ?inbound.lifecycle, "Ignoring close from peer");
                return Ok(());
            }

            inbound.lifecycle = Lifecycle::HalfClosedRemote;
            inbound.accepting = false;
            inbound.close_code = Some(code);
            self.done.send_replace(true);
        }
        self.readable.notify_waiters();
        self.space.notify_waiters();

        debug!(route = %self.desc, %code, "Peer closed route group");
        let _ = self.events.send(RouteGroupEvent::RemoteClosed { code });
        Ok(())
    }

    /// Queue an inbound payload for the reader
    ///
    /// Waits while the queue is full. Returns `false` without queuing once
    /// the group is done, including for callers already waiting.
    pub async fn deliver(&self, payload: Bytes) -> bool {
        loop {
            let space = self.space.notified();
            tokio::pin!(space);
            space.as_mut().enable();

            {
                let mut inbound = self.inbound.lock();
                if !inbound.accepting {
                    trace!(bytes = payload.len(), "Dropping payload for finished route group");
                    return false;
                }
                if payload.is_empty() {
                    return true;
                }
                if inbound.queue.len() < self.config.inbound_capacity.max(1) {
                    inbound.queue.push_back(payload);
                    drop(inbound);

                    self.readable.notify_waiters();
                    return true;
                }
            }

            space.await;
        }
    }

    /// Set the deadline for reads, including reads already waiting
    pub fn set_read_deadline(&self, at: Option<Instant>) {
        self.read_deadline.set(at);
    }

    /// Set the deadline for writes, including writes already waiting
    pub fn set_write_deadline(&self, at: Option<Instant>) {
        self.write_deadline.set(at);
    }

    /// Set both the read and the write deadline
    pub fn set_deadline(&self, at: Option<Instant>) {
        self.set_read_deadline(at);
        self.set_write_deadline(at);
    }

    /// Spawn a task sending keep-alives on idle paths
    ///
    /// A KeepAlive packet goes out on each usable path whenever nothing was
    /// sent for one keep-alive period. The period is `keep_alive_interval`,
    /// or half the shortest forward rule keep-alive if that is lower. The
    /// task ends when the group is done or dropped.
    pub fn spawn_keep_alive(self: &Arc<Self>) -> JoinHandle<()> {
        let group: Weak<Self> = Arc::downgrade(self);
        let mut done = self.done.subscribe();

        tokio::spawn(async move {
            loop {
                let due = {
                    let Some(group) = group.upgrade() else { break };
                    let period = group.keep_alive_period().await;
                    let due = *group.last_sent.lock() + period;
                    if due <= Instant::now() {
                        group.send_keep_alive().await;
                        continue;
                    }
                    due
                };

                tokio::select! {
                    _ = raised(&mut done) => break,
                    _ = sleep_until(due) => {}
                }
            }

            trace!("Keep-alive task finished");
        })
    }

    /// Idle time after which a keep-alive is due
    pub async fn keep_alive_period(&self) -> Duration {
        let paths = self.paths.read().await;
        paths
            .rules
            .iter()
            .flatten()
            .map(|rule| rule.keep_alive() / 2)
            .filter(|half| !half.is_zero())
            .fold(self.config.keep_alive_interval, Duration::min)
    }

    async fn send_keep_alive(&self) {
        let pairs = {
            let paths = self.paths.read().await;
            match paths.usable() {
                Ok(pairs) => pairs,
                Err(_) => Vec::new(),
            }
        };

        for (link, rule) in pairs {
            let packet = Packet::keep_alive(rule.remote_route_id());
            match link.write_packet(&packet).await {
                Ok(()) => trace!(transport_id = %link.id(), "Sent keep-alive"),
                Err(e) => debug!(transport_id = %link.id(), error = %e, "Failed to send keep-alive"),
            }
        }
        *self.last_sent.lock() = Instant::now();
    }
}

/// Wait until `flag` is set or its sender is gone
pub(crate) async fn raised(flag: &mut watch::Receiver<bool>) {
    let _ = flag.wait_for(|set| *set).await;
}

impl Debug for RouteGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteGroup")
            .field("desc", &self.desc)
            .field("lifecycle", &self.lifecycle())
            .finish_non_exhaustive()
    }
}
