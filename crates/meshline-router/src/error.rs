//! Route group error types

use std::io;

use meshline_core::{ProtocolError, TransportError};
use meshline_routing::RuleTableError;
use thiserror::Error;

/// Errors returned by route group operations
#[derive(Debug, Error)]
pub enum RouteGroupError {
    /// No transport link was ever added
    #[error("No transports available")]
    NoTransports,

    /// No forward rule was ever added
    #[error("No rules available")]
    NoRules,

    /// Every path is missing its link or its rule
    #[error("No usable transport")]
    BadTransport,

    /// The group was closed locally
    #[error("Route group is closed")]
    Closed,

    /// The peer closed and every queued payload was read
    #[error("End of stream")]
    EndOfStream,

    /// A read or write deadline passed
    #[error("Operation timed out")]
    Timeout,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Sending Close failed on some paths; the group is closed anyway
    #[error("Failed to send close on {} path(s)", .0.len())]
    ClosePaths(Vec<TransportError>),

    #[error("Rule table error: {0}")]
    RuleTable(#[from] RuleTableError),
}

impl RouteGroupError {
    /// Whether this error is a deadline expiry
    pub fn is_timeout(&self) -> bool {
        matches!(self, RouteGroupError::Timeout)
    }

    /// Whether this error marks the regular end of the inbound stream
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, RouteGroupError::EndOfStream)
    }
}

impl From<RouteGroupError> for io::Error {
    fn from(err: RouteGroupError) -> Self {
        let kind = match &err {
            RouteGroupError::Timeout => io::ErrorKind::TimedOut,
            RouteGroupError::EndOfStream => io::ErrorKind::UnexpectedEof,
            RouteGroupError::Closed => io::ErrorKind::NotConnected,
            RouteGroupError::NoTransports
            | RouteGroupError::NoRules
            | RouteGroupError::BadTransport => io::ErrorKind::NotConnected,
            RouteGroupError::Protocol(_) => io::ErrorKind::InvalidData,
            RouteGroupError::Transport(_) | RouteGroupError::ClosePaths(_) => {
                io::ErrorKind::BrokenPipe
            }
            RouteGroupError::RuleTable(_) => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

/// Result type for route group operations
pub type RouteGroupResult<T> = Result<T, RouteGroupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_maps_to_timed_out() {
        let err = RouteGroupError::Timeout;
        assert!(err.is_timeout());

        let io_err: io::Error = err.into();
        assert_eq!(io_err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn test_no_path_errors_are_distinct() {
        let msgs: Vec<String> = [
            RouteGroupError::NoTransports,
            RouteGroupError::NoRules,
            RouteGroupError::BadTransport,
        ]
        .iter()
        .map(|e| e.to_string())
        .collect();

        assert_ne!(msgs[0], msgs[1]);
        assert_ne!(msgs[1], msgs[2]);
        assert!(!RouteGroupError::NoRules.is_timeout());
    }

    #[test]
    fn test_close_paths_display() {
        let err = RouteGroupError::ClosePaths(vec![
            TransportError::ConnectionClosed,
            TransportError::SendFailed("reset".to_string()),
        ]);
        assert!(err.to_string().contains("2 path(s)"));

        let io_err: io::Error = err.into();
        assert_eq!(io_err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_error_conversions() {
        let err: RouteGroupError = TransportError::ConnectionClosed.into();
        assert!(matches!(err, RouteGroupError::Transport(_)));

        let err: RouteGroupError = ProtocolError::MissingCloseCode.into();
        assert!(matches!(err, RouteGroupError::Protocol(_)));

        let eof: io::Error = RouteGroupError::EndOfStream.into();
        assert_eq!(eof.kind(), io::ErrorKind::UnexpectedEof);
    }
}
