//! Transport abstractions
//!
//! A [`TransportLink`] carries discrete packets between two nodes over one
//! network technology. A [`Network`] turns a public key and port into a
//! link across the network types it was configured with.
//!
//! The session layer only ever writes packets through links it was handed;
//! acquiring links is the job of the route establishment flow.
//!
//! ## Implementations
//!
//! - [`MemoryLink`](crate::MemoryLink) / [`MemoryNetwork`](crate::MemoryNetwork):
//!   in-memory links for testing (in `mock_transport`)

use std::fmt::{Debug, Display};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::identity::{Addr, Port, PubKey};
use crate::packet::{MAX_PAYLOAD_SIZE, Packet};
use crate::routing::TransportId;

/// Network technology a link runs over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetworkType {
    /// Relayed through dmsg servers
    Dmsg,
    /// Direct TCP to a statically known address
    Stcp,
    /// Direct TCP to an address resolved through the address resolver
    Stcpr,
    /// UDP with hole punching
    Sudph,
}

impl NetworkType {
    pub const ALL: [NetworkType; 4] = [
        NetworkType::Dmsg,
        NetworkType::Stcp,
        NetworkType::Stcpr,
        NetworkType::Sudph,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkType::Dmsg => "dmsg",
            NetworkType::Stcp => "stcp",
            NetworkType::Stcpr => "stcpr",
            NetworkType::Sudph => "sudph",
        }
    }

    /// Whether `name` names a known network type
    pub fn is_known(name: &str) -> bool {
        name.parse::<NetworkType>().is_ok()
    }
}

impl Display for NetworkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkType {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NetworkType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| TransportError::UnknownNetwork(s.to_string()))
    }
}

/// A bidirectional packet carrier between two nodes
#[async_trait]
pub trait TransportLink: Send + Sync + Debug {
    /// Identifier shared by both ends of the link
    fn id(&self) -> TransportId;

    /// Public key of this end
    fn local_pk(&self) -> PubKey;

    /// Public key of the other end
    fn remote_pk(&self) -> PubKey;

    /// Network technology this link runs over
    fn network_type(&self) -> NetworkType;

    /// Largest payload a single packet on this link may carry
    fn max_payload(&self) -> usize {
        MAX_PAYLOAD_SIZE
    }

    /// Write one packet
    ///
    /// # Errors
    ///
    /// Returns an error if the link is closed, the packet exceeds
    /// [`max_payload`](Self::max_payload), or sending fails.
    async fn write_packet(&self, packet: &Packet) -> Result<(), TransportError>;

    /// Read the next packet
    ///
    /// Malformed frames surface as [`TransportError::Protocol`] and are never
    /// returned as packets.
    async fn read_packet(&self) -> Result<Packet, TransportError>;

    /// Close the link. Closing twice is not an error.
    async fn close(&self) -> Result<(), TransportError>;

    /// Whether this end has been closed
    fn is_closed(&self) -> bool;
}

/// Accepts links dialed to a bound port
#[async_trait]
pub trait Listener: Send + Sync {
    /// The local address being listened on
    fn addr(&self) -> Addr;

    fn network_type(&self) -> NetworkType;

    /// Wait for the next incoming link
    async fn accept(&self) -> Result<Arc<dyn TransportLink>, TransportError>;

    /// Stop listening and release the port
    async fn close(&self) -> Result<(), TransportError>;
}

/// Acquires transport links across several network types
#[async_trait]
pub trait Network: Send + Sync {
    /// Public key of the local node
    fn local_pk(&self) -> PubKey;

    /// Network types this network was configured with
    fn network_types(&self) -> Vec<NetworkType>;

    /// Dial `remote` on `port` over `network`
    async fn dial(
        &self,
        network: NetworkType,
        remote: PubKey,
        port: Port,
    ) -> Result<Arc<dyn TransportLink>, TransportError>;

    /// Listen on `port` over `network`
    async fn listen(
        &self,
        network: NetworkType,
        port: Port,
    ) -> Result<Box<dyn Listener>, TransportError>;
}
