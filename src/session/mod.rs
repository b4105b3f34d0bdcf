//! HTTP session management.
//!
//! Every HTTP session is bound to exactly one [`McpConnection`] for its
//! lifetime. Sessions are identified by a random UUID handed to the client in
//! the `mcp-session-id` header and evicted after a configurable idle period.
//!
//! # Architecture
//!
//! - [`Session`]: an id bound to one protocol handler
//! - [`SessionStore`]: thread-safe store for all active sessions
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use rest_mcp_bridge::session::{Session, SessionStore};
//! # use rest_mcp_bridge::mcp::{Dispatcher, McpConnection, McpServerConfig};
//! # use rest_mcp_bridge::upstream::HttpUpstream;
//! # #[tokio::main] async fn main() {
//! # let upstream = HttpUpstream::new(
//! #     url::Url::parse("http://127.0.0.1:9").unwrap(),
//! #     std::time::Duration::from_secs(1),
//! # ).unwrap();
//! # let dispatcher = Dispatcher::new(Arc::new(upstream));
//! let store = SessionStore::new();
//! let id = Session::generate_id();
//! let conn = McpConnection::new(
//!     McpServerConfig::default_for_binary("bridge", "0.1.0"),
//!     dispatcher,
//!     Some(id.clone()),
//! );
//! assert!(store.insert(Session::new(id.clone(), Arc::new(conn))).await);
//! assert!(store.get(&id).await.is_some());
//! # }
//! ```
//!
//! [`McpConnection`]: crate::mcp::McpConnection

mod store;

pub use store::{DEFAULT_SESSION_TIMEOUT, Session, SessionStore};
