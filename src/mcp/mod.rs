//! Model Context Protocol (MCP) server surface.
//!
//! - [`types`]: JSON-RPC envelope and handshake types
//! - [`tools`]: the fixed tool catalog and its dispatcher
//! - [`connection`]: per-caller protocol handler (handshake + routing)
//!
//! MCP payload types (`Tool`, `CallToolResult`, `CallToolRequestParam`) come
//! from `rmcp::model`; the JSON-RPC framing around them lives here.

pub mod connection;
pub mod tools;
pub mod types;

pub use connection::{ConnState, McpConnection, McpServerConfig};
pub use tools::{Dispatcher, ToolError};
