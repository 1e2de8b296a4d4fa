//! Reference dispatcher feeding route groups from transport links
//!
//! The [`Dispatcher`] reads packets from every link it serves, finds the
//! owning route group by the packet's route ID and hands the packet over:
//!
//! - **Data**: payload queued with [`RouteGroup::deliver`]
//! - **Close**: [`RouteGroup::handle_close_packet`] with the carried code
//! - **KeepAlive**: liveness only, never queued
//!
//! Each link gets one feeder task per route group. Data and Close for a
//! group keep their order, and a group whose reader falls behind only
//! holds up its own feeder, never the link.
//!
//! A malformed packet means the link is corrupted: the dispatcher stops
//! serving it and closes it.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use meshline_core::{
    CloseCode, Packet, PacketType, ProtocolError, RouteId, TransportError, TransportLink,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::route_group::{RouteGroup, raised};

/// Inbound work for one route group, in arrival order
#[derive(Debug)]
enum Delivery {
    Data(Bytes),
    Close(CloseCode),
}

/// A feeder task and the group it feeds
struct Feeder {
    group: Arc<RouteGroup>,
    tx: mpsc::UnboundedSender<Delivery>,
}

/// Routes inbound packets to route groups by local route ID
pub struct Dispatcher {
    groups: Arc<DashMap<RouteId, Arc<RouteGroup>>>,
    shutdown: watch::Sender<bool>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            groups: Arc::new(DashMap::new()),
            shutdown,
        }
    }

    /// Register `group` to receive packets addressed to `route_id`
    ///
    /// Returns the group previously registered under that ID, if any.
    pub fn register(&self, route_id: RouteId, group: Arc<RouteGroup>) -> Option<Arc<RouteGroup>> {
        debug!(%route_id, route = %group.descriptor(), "Registered route group");
        self.groups.insert(route_id, group)
    }

    pub fn unregister(&self, route_id: RouteId) -> Option<Arc<RouteGroup>> {
        self.groups.remove(&route_id).map(|(_, group)| group)
    }

    /// Look up the group for `route_id`, dropping it if it was closed
    pub fn get(&self, route_id: RouteId) -> Option<Arc<RouteGroup>> {
        lookup(&self.groups, route_id)
    }

    /// Number of registered groups
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Spawn a task dispatching packets read from `link`
    ///
    /// The task ends when the link fails, a malformed packet arrives, or
    /// [`shutdown`](Self::shutdown) is called. Shutdown also stops the
    /// feeders, including ones waiting for queue space.
    pub fn serve(&self, link: Arc<dyn TransportLink>) -> JoinHandle<()> {
        let groups = Arc::clone(&self.groups);
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            let transport_id = link.id();
            let mut feeders: HashMap<RouteId, Feeder> = HashMap::new();
            debug!(%transport_id, remote_peer = %link.remote_pk().short_id(), "Serving link");

            loop {
                let result = tokio::select! {
                    _ = raised(&mut shutdown) => {
                        debug!(%transport_id, "Dispatcher shutting down");
                        break;
                    }
                    result = link.read_packet() => result,
                };

                let outcome = match result {
                    Ok(packet) => dispatch(&groups, &mut feeders, &shutdown, packet),
                    Err(TransportError::Protocol(e)) => Err(e),
                    Err(e) => {
                        debug!(%transport_id, error = %e, "Link read ended");
                        break;
                    }
                };

                if let Err(e) = outcome {
                    warn!(%transport_id, error = %e, "Malformed packet, closing link");
                    if let Err(e) = link.close().await {
                        debug!(%transport_id, error = %e, "Failed to close link");
                    }
                    break;
                }
            }
        })
    }

    /// Stop every serving task and its feeders
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn lookup(groups: &DashMap<RouteId, Arc<RouteGroup>>, route_id: RouteId) -> Option<Arc<RouteGroup>> {
    let group = groups.get(&route_id).map(|entry| Arc::clone(entry.value()))?;
    if group.is_closed() {
        evict(groups, route_id, &group);
        return None;
    }
    Some(group)
}

/// Remove `group` from `route_id`, keeping any group registered there since
fn evict(groups: &DashMap<RouteId, Arc<RouteGroup>>, route_id: RouteId, group: &Arc<RouteGroup>) {
    if groups.remove_if(&route_id, |_, current| Arc::ptr_eq(current, group)).is_some() {
        trace!(%route_id, "Unregistered closed route group");
    }
}

fn dispatch(
    groups: &DashMap<RouteId, Arc<RouteGroup>>,
    feeders: &mut HashMap<RouteId, Feeder>,
    shutdown: &watch::Receiver<bool>,
    packet: Packet,
) -> Result<(), ProtocolError> {
    let route_id = packet.route_id();
    let packet_type = packet.packet_type();

    let Some(group) = lookup(groups, route_id) else {
        debug!(%route_id, %packet_type, "No route group for packet, dropping");
        feeders.remove(&route_id);
        return Ok(());
    };

    let delivery = match packet_type {
        PacketType::Data => Delivery::Data(packet.into_payload()),
        PacketType::Close => Delivery::Close(packet.close_code()?),
        PacketType::KeepAlive => {
            trace!(%route_id, "Keep-alive received");
            return Ok(());
        }
    };

    let feeder = match feeders.remove(&route_id) {
        Some(feeder) if Arc::ptr_eq(&feeder.group, &group) && !feeder.tx.is_closed() => feeder,
        _ => spawn_feeder(route_id, group, shutdown.clone()),
    };
    if feeder.tx.send(delivery).is_err() {
        trace!(%route_id, "Feeder stopped, dropping packet");
        return Ok(());
    }
    feeders.insert(route_id, feeder);

    Ok(())
}

/// Spawn the task handing deliveries to `group` one at a time
fn spawn_feeder(
    route_id: RouteId,
    group: Arc<RouteGroup>,
    mut shutdown: watch::Receiver<bool>,
) -> Feeder {
    let (tx, mut rx) = mpsc::unbounded_channel();

    tokio::spawn({
        let group = Arc::clone(&group);
        async move {
            loop {
                let delivery = tokio::select! {
                    _ = raised(&mut shutdown) => break,
                    delivery = rx.recv() => match delivery {
                        Some(delivery) => delivery,
                        None => break,
                    },
                };

                match delivery {
                    Delivery::Data(payload) => {
                        let bytes = payload.len();
                        let accepted = tokio::select! {
                            _ = raised(&mut shutdown) => break,
                            accepted = group.deliver(payload) => accepted,
                        };
                        if !accepted {
                            trace!(%route_id, bytes, "Route group no longer accepts data");
                        }
                    }
                    Delivery::Close(code) => {
                        if let Err(e) = group.handle_close_packet(code) {
                            debug!(%route_id, error = %e, "Failed to handle close");
                        }
                    }
                }
            }

            trace!(%route_id, "Feeder finished");
        }
    });

    Feeder { group, tx }
}
