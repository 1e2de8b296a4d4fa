//! # Meshline Routing
//!
//! Rule table for the Meshline overlay.
//!
//! The route establishment flow reserves route IDs here and saves the
//! forward and consume rules it negotiated. Route groups read the rules they
//! were handed and delete their own entries when they close.
//!
//! ## Core Components
//!
//! - [`RuleTable`]: Storage interface used by route groups
//! - [`MemoryRuleTable`]: DashMap-backed implementation with keep-alive
//!   expiry and postcard snapshots
//!
//! ## Example
//!
//! ```rust,ignore
//! use meshline_routing::{MemoryRuleTable, RuleTable};
//!
//! let table = MemoryRuleTable::default();
//! let ids = table.reserve_keys(2)?;
//! table.save_rule(forward_rule_for(ids[0]).into())?;
//! ```

pub mod error;
pub mod table;

// Re-export main types
pub use error::{RuleTableError, RuleTableResult};
pub use table::{MemoryRuleTable, RuleTable, RuleTableConfig};
