//! # Meshline Core
//!
//! Core types, wire codec, transport traits and errors for the Meshline
//! overlay.
//!
//! Every other Meshline crate builds on these definitions: the rule table
//! stores [`Rule`]s, the session layer writes [`Packet`]s through
//! [`TransportLink`]s, and everything reports failures through the error
//! types in [`error`].
//!
//! ## Key Traits
//!
//! - [`TransportLink`]: A bidirectional packet carrier between two nodes
//! - [`Network`]: Acquires links across several network types
//! - [`Listener`]: Accepts links dialed to a bound port
//!
//! ## Key Types
//!
//! - [`PubKey`] / [`Addr`]: Node identity and flow endpoints
//! - [`RouteDescriptor`]: The two endpoints of a logical flow
//! - [`ForwardRule`] / [`ConsumeRule`]: Addressing records from the rule table
//! - [`Packet`]: The framed unit exchanged over links
//! - [`MemoryLink`] / [`MemoryNetwork`]: In-memory transports for testing

pub mod error;
pub mod identity;
pub mod mock_transport;
pub mod packet;
pub mod routing;
pub mod transport;

// Re-export main types
pub use error::*;
pub use identity::*;
pub use mock_transport::*;
pub use packet::*;
pub use routing::*;
pub use transport::*;
