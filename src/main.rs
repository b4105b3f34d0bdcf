//! REST → MCP bridge
//!
//! Entry point: loads configuration and runs the stdio or HTTP front-end.

use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::sync::Arc;

use dotenvy::dotenv;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use rest_mcp_bridge::config::{AppConfig, Transport};
use rest_mcp_bridge::mcp::McpConnection;
use rest_mcp_bridge::{build_dispatcher, server, server_info, stdio};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present)
    let _ = dotenv();

    // Initialize tracing (M-LOG-STRUCTURED). Always stderr: stdout may be the protocol channel.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json_logs {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }

    let config = match AppConfig::load() {
        Ok(c) => Arc::new(c),
        Err(msg) => {
            eprintln!("Configuration error: {msg}");
            std::process::exit(1);
        }
    };

    match config.transport {
        Transport::Http => server::start_server(config).await,
        Transport::Stdio => {
            let dispatcher = build_dispatcher(&config.upstream)?;
            stdio::run_stdio(McpConnection::new(server_info(), dispatcher, None)).await
        }
    }
}
