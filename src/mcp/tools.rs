//! Tool catalog and dispatch.
//!
//! Three fixed tools, each backed by one upstream `GET`. Failures never leave
//! this module as protocol errors: [`Dispatcher::call_tool_result`] always
//! produces a successful tool result whose single text block is either the
//! upstream JSON or `{"ok":false,"error":...,"details":...}`.

use std::sync::Arc;

use rmcp::model::{CallToolResult, Content, Tool};
use serde::Serialize;
use serde_json::{Map, Number, Value, json};
use thiserror::Error;
use tracing::Instrument as _;

use crate::upstream::{Upstream, UpstreamError};

pub const PING_BRIDGE: &str = "ping_bridge";
pub const GET_PRODUCT: &str = "get_product";
pub const GET_PRICE: &str = "get_price";

/// Tool-level failure.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Missing argument: {0}")]
    MissingArgument(&'static str),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

impl ToolError {
    /// Structured detail for the failure envelope.
    pub fn details(&self) -> Option<Value> {
        match self {
            Self::Upstream(e) => e.details(),
            _ => None,
        }
    }
}

/// Failure payload embedded in the text block.
#[derive(Debug, Serialize)]
struct FailureEnvelope {
    ok: bool,
    error: String,
    details: Option<Value>,
}

impl From<&ToolError> for FailureEnvelope {
    fn from(err: &ToolError) -> Self {
        Self {
            ok: false,
            error: err.to_string(),
            details: err.details(),
        }
    }
}

/// Maps tool names to upstream calls. Holds no mutable state.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    upstream: Arc<dyn Upstream>,
    tools: Arc<Vec<Tool>>,
}

impl Dispatcher {
    pub fn new(upstream: Arc<dyn Upstream>) -> Self {
        Self {
            upstream,
            tools: Arc::new(catalog()),
        }
    }

    /// The fixed catalog, in stable order.
    pub fn list_tools(&self) -> Vec<Tool> {
        self.tools.as_ref().clone()
    }

    /// Run a tool and return the upstream payload or a typed failure.
    pub async fn call_tool(&self, name: &str, args: &Map<String, Value>) -> Result<Value, ToolError> {
        match name {
            PING_BRIDGE => Ok(self.upstream.fetch_json(&["ping"]).await?),
            GET_PRODUCT => {
                let sku = sku_argument(args)?;
                Ok(self.upstream.fetch_json(&["products", &sku]).await?)
            }
            GET_PRICE => {
                let sku = sku_argument(args)?;
                Ok(self.upstream.fetch_json(&["prices", &sku]).await?)
            }
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }

    /// Run a tool and fold the outcome into a single-text-block result.
    pub async fn call_tool_result(&self, name: &str, args: &Map<String, Value>) -> CallToolResult {
        let span = tracing::info_span!("tool.call", tool = %name);
        let outcome = self.call_tool(name, args).instrument(span).await;
        if let Err(err) = &outcome {
            tracing::info!(name: "tool.failed", tool = %name, error = %err, "Tool call failed");
        }
        CallToolResult::success(vec![Content::text(render_outcome(&outcome))])
    }
}

/// Serialize an outcome to the text carried back to the caller.
pub fn render_outcome(outcome: &Result<Value, ToolError>) -> String {
    let rendered = match outcome {
        Ok(payload) => serde_json::to_string(payload),
        Err(err) => serde_json::to_string(&FailureEnvelope::from(err)),
    };
    rendered.unwrap_or_else(|e| json!({ "ok": false, "error": e.to_string(), "details": null }).to_string())
}

/// Extract `sku`, treating absent, empty and JS-falsy values as missing.
fn sku_argument(args: &Map<String, Value>) -> Result<String, ToolError> {
    match args.get("sku") {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) => number_segment(n).ok_or(ToolError::MissingArgument("sku")),
        _ => Err(ToolError::MissingArgument("sku")),
    }
}

/// Decimal text for a non-zero number; integral floats drop the `.0`.
fn number_segment(n: &Number) -> Option<String> {
    if let Some(i) = n.as_i64() {
        return (i != 0).then(|| i.to_string());
    }
    if let Some(u) = n.as_u64() {
        return Some(u.to_string());
    }
    n.as_f64().filter(|f| *f != 0.0).map(|f| f.to_string())
}

fn tool(name: &str, description: &str, schema: Value) -> Tool {
    Tool {
        name: name.to_string().into(),
        description: Some(description.to_string().into()),
        input_schema: Arc::new(schema.as_object().cloned().unwrap_or_default()),
        title: None,
        output_schema: None,
        annotations: None,
        icons: None,
        meta: None,
    }
}

fn catalog() -> Vec<Tool> {
    let sku_schema = json!({
        "type": "object",
        "properties": { "sku": { "type": "string" } },
        "required": ["sku"]
    });
    vec![
        tool(
            PING_BRIDGE,
            "Call /ping",
            json!({ "type": "object", "properties": {} }),
        ),
        tool(GET_PRODUCT, "Get product by SKU", sku_schema.clone()),
        tool(GET_PRICE, "Get price by SKU", sku_schema),
    ]
}
