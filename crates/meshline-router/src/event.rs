//! Lifecycle events published by route groups

use meshline_core::{CloseCode, TransportId};

/// An event in the life of a route group
///
/// Received through [`RouteGroup::subscribe`](crate::RouteGroup::subscribe).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteGroupEvent {
    /// A path over the given link was added
    PathAdded { transport_id: TransportId },
    /// The peer closed its side
    RemoteClosed { code: CloseCode },
    /// The group was closed locally
    Closed { code: CloseCode },
}
