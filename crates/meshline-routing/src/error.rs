//! Rule table error types
//!
//! Re-exports core routing errors and adds rule-table specific errors.

use thiserror::Error;

// Re-export core routing errors
pub use meshline_core::RoutingError as CoreRoutingError;

/// Errors raised by a rule table
#[derive(Debug, Error)]
pub enum RuleTableError {
    /// Core routing error
    #[error("Core routing error: {0}")]
    Core(#[from] CoreRoutingError),

    /// Rules could not be encoded for a snapshot
    #[error("Snapshot serialization failed: {0}")]
    Serialization(String),

    /// A snapshot could not be decoded
    #[error("Snapshot deserialization failed: {0}")]
    Deserialization(String),
}

/// Result type for rule table operations
pub type RuleTableResult<T> = Result<T, RuleTableError>;
