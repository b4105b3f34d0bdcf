//! Stdio front-end.
//!
//! One caller, one [`McpConnection`], newline-delimited JSON-RPC in both
//! directions. The loop ends when the input closes.

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

use crate::mcp::McpConnection;
use crate::mcp::types::{JsonRpcId, JsonRpcResponse, PARSE_ERROR};

/// Serve `conn` over the process's stdin/stdout.
pub async fn run_stdio(conn: McpConnection) -> anyhow::Result<()> {
    serve(tokio::io::stdin(), tokio::io::stdout(), &conn).await
}

/// Serve `conn` over an arbitrary duplex byte channel.
pub async fn serve<R, W>(reader: R, writer: W, conn: &McpConnection) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = FramedRead::new(reader, LinesCodec::new());
    let mut out = FramedWrite::new(writer, LinesCodec::new());

    tracing::info!(name: "stdio.started", "Serving MCP over stdio");

    while let Some(line) = lines.next().await {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let reply = match serde_json::from_str::<Value>(&line) {
            Ok(payload) => conn.handle_payload(payload).await,
            Err(e) => Some(serde_json::to_value(JsonRpcResponse::err(
                JsonRpcId::Null,
                PARSE_ERROR,
                "parse error",
                Some(json!({ "detail": e.to_string() })),
            ))?),
        };

        if let Some(reply) = reply {
            out.send(serde_json::to_string(&reply)?).await?;
        }
    }

    tracing::info!(name: "stdio.closed", "stdin closed");
    Ok(())
}
