//! REST → MCP bridge
//!
//! Exposes a small tool catalog (`ping_bridge`, `get_product`, `get_price`)
//! over the Model Context Protocol and fulfils each call with a single `GET`
//! against an upstream REST API, forwarding the JSON response.
//!
//! # Architecture
//!
//! - **Upstream Client**: one `GET` per call, JSON or `{"raw": ...}` back
//! - **Dispatcher**: tool catalog, argument checks, failure envelope
//! - **Stdio front-end**: one connection for the life of the process
//! - **HTTP front-end**: Axum endpoint with `mcp-session-id` sessions
//!
//! # Modules
//!
//! - [`config`]: CLI and layered configuration
//! - [`upstream`]: upstream REST client
//! - [`mcp`]: protocol types, dispatcher and per-caller connection
//! - [`session`]: HTTP session store
//! - [`server`]: HTTP front-end
//! - [`stdio`]: stdio front-end

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::unused_async)]

pub mod config;
pub mod mcp;
pub mod server;
pub mod session;
pub mod stdio;
pub mod upstream;

use crate::config::UpstreamConfig;
use crate::upstream::HttpUpstream;

use mcp::{Dispatcher, McpServerConfig};
use session::SessionStore;
use std::sync::Arc;

/// Application state shared across all HTTP handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Shared tool dispatcher.
    pub dispatcher: Dispatcher,
    /// Live sessions, owned by this server instance.
    pub sessions: SessionStore,
    /// Identity advertised during `initialize`.
    pub server_info: McpServerConfig,
}

impl AppState {
    /// State with an empty session store.
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self::with_sessions(dispatcher, SessionStore::new())
    }

    /// State over an injected session store.
    pub fn with_sessions(dispatcher: Dispatcher, sessions: SessionStore) -> Self {
        Self {
            dispatcher,
            sessions,
            server_info: server_info(),
        }
    }
}

/// Identity of this binary for `initialize` results.
pub fn server_info() -> McpServerConfig {
    McpServerConfig::default_for_binary(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

/// Dispatcher over the configured upstream.
pub fn build_dispatcher(cfg: &UpstreamConfig) -> anyhow::Result<Dispatcher> {
    let upstream = HttpUpstream::new(cfg.url()?, cfg.timeout())?;
    tracing::info!(
        name: "upstream.configured",
        base_url = %upstream.base_url(),
        timeout_secs = cfg.timeout_secs,
        "Upstream configured"
    );
    Ok(Dispatcher::new(Arc::new(upstream)))
}
