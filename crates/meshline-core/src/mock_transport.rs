//! In-memory transport implementations for testing
//!
//! Provides links and a network that behave like the real ones without
//! touching sockets, so the session layer and the dispatcher can be tested
//! end to end.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use meshline_core::{KeyPair, MemoryLink, NetworkType, Packet, RouteId, TransportLink};
//!
//! let keys = KeyPair::generate_many(2);
//! let (a, b) = MemoryLink::pair(keys[0].public_key(), keys[1].public_key(), NetworkType::Stcp);
//!
//! a.write_packet(&Packet::data(RouteId(1), &b"hello"[..])?).await?;
//! let packet = b.read_packet().await?;
//! assert_eq!(&packet.payload()[..], b"hello");
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::error::TransportError;
use crate::identity::{Addr, Port, PubKey};
use crate::packet::{MAX_PAYLOAD_SIZE, Packet};
use crate::routing::TransportId;
use crate::transport::{Listener, Network, NetworkType, TransportLink};

/// Number of frames buffered per link direction
pub const DEFAULT_LINK_BUFFER: usize = 1024;

/// One end of an in-memory link
///
/// Frames are encoded on write and decoded on read, so the packet codec is
/// exercised exactly as on a real link. Frames written before the peer
/// closed can still be read.
#[derive(Debug)]
pub struct MemoryLink {
    id: TransportId,
    local_pk: PubKey,
    remote_pk: PubKey,
    network_type: NetworkType,
    max_payload: usize,
    outgoing: Mutex<Option<mpsc::Sender<Bytes>>>,
    incoming: tokio::sync::Mutex<mpsc::Receiver<Bytes>>,
    closed: watch::Sender<bool>,
}

impl MemoryLink {
    /// Create a pair of connected link ends
    pub fn pair(a: PubKey, b: PubKey, network_type: NetworkType) -> (Self, Self) {
        Self::pair_with_buffer(a, b, network_type, DEFAULT_LINK_BUFFER)
    }

    /// Create a pair of connected link ends with a specific buffer size
    pub fn pair_with_buffer(
        a: PubKey,
        b: PubKey,
        network_type: NetworkType,
        buffer_size: usize,
    ) -> (Self, Self) {
        let id = TransportId::new_random();
        let (a_tx, b_rx) = mpsc::channel(buffer_size);
        let (b_tx, a_rx) = mpsc::channel(buffer_size);

        (
            Self::from_parts(id, a, b, network_type, a_tx, a_rx),
            Self::from_parts(id, b, a, network_type, b_tx, b_rx),
        )
    }

    fn from_parts(
        id: TransportId,
        local_pk: PubKey,
        remote_pk: PubKey,
        network_type: NetworkType,
        tx: mpsc::Sender<Bytes>,
        rx: mpsc::Receiver<Bytes>,
    ) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            id,
            local_pk,
            remote_pk,
            network_type,
            max_payload: MAX_PAYLOAD_SIZE,
            outgoing: Mutex::new(Some(tx)),
            incoming: tokio::sync::Mutex::new(rx),
            closed,
        }
    }

    /// Limit the payload size this end accepts for writing
    pub fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload.min(MAX_PAYLOAD_SIZE);
        self
    }

    /// Send an already-encoded frame unchanged
    ///
    /// Lets tests put malformed frames on the wire.
    pub async fn write_raw(&self, frame: Bytes) -> Result<(), TransportError> {
        let tx = self
            .outgoing
            .lock()
            .clone()
            .ok_or(TransportError::ConnectionClosed)?;

        let mut closed = self.closed.subscribe();
        tokio::select! {
            sent = tx.send(frame) => sent.map_err(|_| TransportError::ConnectionClosed),
            _ = async { let _ = closed.wait_for(|closed| *closed).await; } => {
                Err(TransportError::ConnectionClosed)
            }
        }
    }
}

#[async_trait]
impl TransportLink for MemoryLink {
    fn id(&self) -> TransportId {
        self.id
    }

    fn local_pk(&self) -> PubKey {
        self.local_pk
    }

    fn remote_pk(&self) -> PubKey {
        self.remote_pk
    }

    fn network_type(&self) -> NetworkType {
        self.network_type
    }

    fn max_payload(&self) -> usize {
        self.max_payload
    }

    async fn write_packet(&self, packet: &Packet) -> Result<(), TransportError> {
        if packet.payload().len() > self.max_payload {
            return Err(TransportError::FrameTooLarge {
                size: packet.payload().len(),
                max: self.max_payload,
            });
        }

        self.write_raw(packet.encode()).await
    }

    async fn read_packet(&self) -> Result<Packet, TransportError> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(TransportError::ConnectionClosed);
        }

        let mut incoming = self.incoming.lock().await;
        let frame = tokio::select! {
            frame = incoming.recv() => frame.ok_or(TransportError::ConnectionClosed)?,
            _ = async { let _ = closed.wait_for(|closed| *closed).await; } => {
                return Err(TransportError::ConnectionClosed)
            }
        };

        Ok(Packet::decode(frame)?)
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.send_replace(true) {
            return Ok(());
        }

        self.outgoing.lock().take();
        self.incoming.lock().await.close();

        debug!(transport_id = %self.id, remote_peer = %self.remote_pk.short_id(), "Closed memory link");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

type ListenerKey = (PubKey, NetworkType, Port);
type LinkSender = mpsc::Sender<Arc<dyn TransportLink>>;

/// Shared registry connecting in-memory networks of several nodes
#[derive(Clone, Default)]
pub struct MemoryHub {
    listeners: Arc<DashMap<ListenerKey, LinkSender>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the network of one node attached to this hub
    pub fn network(&self, local_pk: PubKey, network_types: Vec<NetworkType>) -> MemoryNetwork {
        MemoryNetwork {
            hub: self.clone(),
            local_pk,
            network_types,
        }
    }

    /// Number of bound listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

/// In-memory [`Network`] of a single node
pub struct MemoryNetwork {
    hub: MemoryHub,
    local_pk: PubKey,
    network_types: Vec<NetworkType>,
}

impl MemoryNetwork {
    fn check_network(&self, network: NetworkType) -> Result<(), TransportError> {
        if self.network_types.contains(&network) {
            Ok(())
        } else {
            Err(TransportError::UnknownNetwork(network.to_string()))
        }
    }
}

#[async_trait]
impl Network for MemoryNetwork {
    fn local_pk(&self) -> PubKey {
        self.local_pk
    }

    fn network_types(&self) -> Vec<NetworkType> {
        self.network_types.clone()
    }

    async fn dial(
        &self,
        network: NetworkType,
        remote: PubKey,
        port: Port,
    ) -> Result<Arc<dyn TransportLink>, TransportError> {
        self.check_network(network)?;

        let listener = self
            .hub
            .listeners
            .get(&(remote, network, port))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                TransportError::ConnectionFailed(format!(
                    "nothing listening on {}:{} over {}",
                    remote.short_id(),
                    port,
                    network
                ))
            })?;

        let (local_end, remote_end) = MemoryLink::pair(self.local_pk, remote, network);
        listener
            .send(Arc::new(remote_end))
            .await
            .map_err(|_| TransportError::ConnectionFailed("listener closed".to_string()))?;

        debug!(remote_peer = %remote.short_id(), %port, %network, "Dialed memory link");
        Ok(Arc::new(local_end))
    }

    async fn listen(
        &self,
        network: NetworkType,
        port: Port,
    ) -> Result<Box<dyn Listener>, TransportError> {
        self.check_network(network)?;

        let key = (self.local_pk, network, port);
        let (tx, rx) = mpsc::channel(DEFAULT_LINK_BUFFER);
        match self.hub.listeners.entry(key) {
            Entry::Occupied(_) => return Err(TransportError::PortAlreadyBound(port.0)),
            Entry::Vacant(vacant) => {
                vacant.insert(tx);
            }
        }

        Ok(Box::new(MemoryListener {
            hub: self.hub.clone(),
            addr: Addr::new(self.local_pk, port),
            network_type: network,
            incoming: tokio::sync::Mutex::new(rx),
        }))
    }
}

/// Listener returned by [`MemoryNetwork::listen`]
pub struct MemoryListener {
    hub: MemoryHub,
    addr: Addr,
    network_type: NetworkType,
    incoming: tokio::sync::Mutex<mpsc::Receiver<Arc<dyn TransportLink>>>,
}

#[async_trait]
impl Listener for MemoryListener {
    fn addr(&self) -> Addr {
        self.addr
    }

    fn network_type(&self) -> NetworkType {
        self.network_type
    }

    async fn accept(&self) -> Result<Arc<dyn TransportLink>, TransportError> {
        self.incoming
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::ConnectionClosed)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.hub
            .listeners
            .remove(&(self.addr.pk, self.network_type, self.addr.port));
        self.incoming.lock().await.close();
        Ok(())
    }
}
