//! Error types for Meshline

use thiserror::Error;

/// Top-level error type for Meshline
#[derive(Debug, Error)]
pub enum MeshlineError {
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Routing error: {0}")]
    Routing(#[from] RoutingError),
}

/// Errors related to peer identity
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Invalid identity format: {0}")]
    InvalidFormat(String),

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
}

/// Errors raised while encoding or decoding packets
///
/// Every variant is fatal to the packet it was raised for. A link that
/// produced one of these should be treated as corrupted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Unknown packet type: {0}")]
    UnknownPacketType(u8),

    #[error("Insufficient data: need {needed} bytes, have {available}")]
    InsufficientData { needed: usize, available: usize },

    #[error("Size mismatch: header declares {declared} bytes, payload has {actual}")]
    SizeMismatch { declared: usize, actual: usize },

    #[error("Payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Close packet carries no close code")]
    MissingCloseCode,

    #[error("Expected {expected} packet, got {actual}")]
    UnexpectedPacketType {
        expected: &'static str,
        actual: &'static str,
    },
}

/// Errors related to transport links and networks
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Unknown network type: {0}")]
    UnknownNetwork(String),

    #[error("Port already bound: {0}")]
    PortAlreadyBound(u16),

    #[error("Malformed packet: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Errors related to routing rules
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("Rule not found for route {0}")]
    RuleNotFound(u32),

    #[error("No route IDs available")]
    NoAvailableKeys,

    #[error("Route {0} was not reserved")]
    NotReserved(u32),

    #[error("Invalid rule: {0}")]
    InvalidRule(String),
}

/// Result type alias for Meshline operations
pub type MeshlineResult<T> = Result<T, MeshlineError>;
