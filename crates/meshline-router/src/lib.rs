//! # Meshline Router
//!
//! Route groups for the Meshline overlay.
//!
//! A [`RouteGroup`] is the session object applications read from and write
//! to. It carries one logical flow between two endpoints over one or more
//! physical paths, each path being a transport link paired with the forward
//! rule that addresses packets on it.
//!
//! ## Core Components
//!
//! - [`RouteGroup`]: Byte-stream session with close handshake and deadlines
//! - [`Dispatcher`]: Feeds inbound packets from links to route groups
//! - [`RouteGroupStream`]: `AsyncRead`/`AsyncWrite` adapter for a group
//! - [`RouteGroupConfig`]: Queue size, keep-alive, framing and path policy
//! - [`RouteGroupEvent`]: Lifecycle events from [`RouteGroup::subscribe`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use meshline_core::CloseCode;
//! use meshline_router::{Dispatcher, RouteGroup, RouteGroupConfig};
//!
//! let group = Arc::new(RouteGroup::new(RouteGroupConfig::default(), rule_table, desc.invert()));
//! dispatcher.register(local_route_id, group.clone());
//! group.add_path(link, forward_rule).await?;
//!
//! group.write(b"hello").await?;
//! let n = group.read(&mut buf).await?;
//! group.close(CloseCode::Finished).await?;
//! ```

pub mod config;
pub mod deadline;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod route_group;
pub mod stream;

// Re-export main types
pub use config::{PathPolicy, RouteGroupConfig};
pub use deadline::Deadline;
pub use dispatcher::Dispatcher;
pub use error::{RouteGroupError, RouteGroupResult};
pub use event::RouteGroupEvent;
pub use route_group::{Lifecycle, RouteGroup};
pub use stream::RouteGroupStream;
