//! Per-caller MCP protocol handler.
//!
//! A connection enforces the initialize handshake and routes `tools/*`
//! requests to the shared [`Dispatcher`]. The stdio front-end owns exactly
//! one; the HTTP front-end owns one per session.

use std::sync::{
    OnceLock,
    atomic::{AtomicU8, AtomicU64, Ordering},
};

use rmcp::model::CallToolRequestParam;
use serde_json::{Value, json};

use crate::mcp::tools::Dispatcher;
use crate::mcp::types::{
    INVALID_PARAMS, INVALID_REQUEST, Implementation, InitializeParams, InitializeResult,
    JsonRpcId, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    METHOD_NOT_FOUND, NOT_INITIALIZED, PROTOCOL_VERSION_LATEST, SUPPORTED_PROTOCOL_VERSIONS,
};

const STATE_NEW: u8 = 0;
const STATE_INITIALIZED: u8 = 1;
const STATE_READY: u8 = 2;

/// Static identity advertised in `initialize` results.
#[derive(Debug, Clone)]
pub struct McpServerConfig {
    pub server_info: Implementation,
    pub instructions: Option<String>,
}

impl McpServerConfig {
    pub fn default_for_binary(name: &str, version: &str) -> Self {
        Self {
            server_info: Implementation {
                name: name.to_string(),
                version: version.to_string(),
            },
            instructions: None,
        }
    }

    fn negotiate_protocol(requested: &str) -> String {
        if SUPPORTED_PROTOCOL_VERSIONS.contains(&requested) {
            requested.to_string()
        } else {
            PROTOCOL_VERSION_LATEST.to_string()
        }
    }
}

/// Lifecycle stage of a connection.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConnState {
    /// No `initialize` yet.
    New,
    /// `initialize` answered, waiting for `notifications/initialized`.
    Initialized,
    /// Handshake complete.
    Ready,
}

/// One protocol handler instance.
///
/// All methods take `&self`; concurrent requests on the same session are
/// handled in parallel.
#[derive(Debug)]
pub struct McpConnection {
    cfg: McpServerConfig,
    dispatcher: Dispatcher,
    session_id: Option<String>,
    state: AtomicU8,
    protocol_version: OnceLock<String>,
    requests_handled: AtomicU64,
}

impl McpConnection {
    pub fn new(cfg: McpServerConfig, dispatcher: Dispatcher, session_id: Option<String>) -> Self {
        Self {
            cfg,
            dispatcher,
            session_id,
            state: AtomicU8::new(STATE_NEW),
            protocol_version: OnceLock::new(),
            requests_handled: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> ConnState {
        match self.state.load(Ordering::Acquire) {
            STATE_NEW => ConnState::New,
            STATE_INITIALIZED => ConnState::Initialized,
            _ => ConnState::Ready,
        }
    }

    /// The bound session id, reported only once `initialize` succeeded.
    pub fn session_id(&self) -> Option<&str> {
        if self.state() == ConnState::New {
            return None;
        }
        self.session_id.as_deref()
    }

    pub fn protocol_version(&self) -> Option<&str> {
        self.protocol_version.get().map(String::as_str)
    }

    /// Number of requests (not notifications) answered so far.
    pub fn requests_handled(&self) -> u64 {
        self.requests_handled.load(Ordering::Relaxed)
    }

    /// Handle one message or a batch.
    ///
    /// Returns `None` when nothing needs to be sent back (notifications and
    /// stray responses only).
    pub async fn handle_payload(&self, payload: Value) -> Option<Value> {
        match payload {
            Value::Array(items) if items.is_empty() => Some(to_value(&JsonRpcResponse::err(
                JsonRpcId::Null,
                INVALID_REQUEST,
                "empty batch",
                None,
            ))),
            Value::Array(items) => {
                let mut out = Vec::new();
                for item in items {
                    if let Some(resp) = self.handle_value(item).await {
                        out.push(to_value(&resp));
                    }
                }
                (!out.is_empty()).then_some(Value::Array(out))
            }
            single => self.handle_value(single).await.map(|r| to_value(&r)),
        }
    }

    /// Handle one undecoded message.
    pub async fn handle_value(&self, value: Value) -> Option<JsonRpcResponse> {
        match JsonRpcMessage::from_value(value) {
            Ok(msg) => self.handle_message(msg).await,
            Err(detail) => Some(JsonRpcResponse::err(
                JsonRpcId::Null,
                INVALID_REQUEST,
                "invalid request",
                Some(json!({ "detail": detail })),
            )),
        }
    }

    pub async fn handle_message(&self, msg: JsonRpcMessage) -> Option<JsonRpcResponse> {
        match msg {
            JsonRpcMessage::Request(req) => {
                let resp = self.handle_request(req).await;
                self.requests_handled.fetch_add(1, Ordering::Relaxed);
                Some(resp)
            }
            JsonRpcMessage::Notification(n) => {
                self.handle_notification(&n);
                None
            }
            JsonRpcMessage::Response(_) => None,
        }
    }

    async fn handle_request(&self, req: JsonRpcRequest) -> JsonRpcResponse {
        if req.jsonrpc != "2.0" {
            return JsonRpcResponse::err(req.id, INVALID_REQUEST, "invalid jsonrpc version", None);
        }

        match req.method.as_str() {
            "initialize" => self.handle_initialize(req),
            "ping" => JsonRpcResponse::ok(req.id, json!({})),
            "tools/list" => {
                if self.state() == ConnState::New {
                    return not_initialized(req.id);
                }
                let tools = self.dispatcher.list_tools();
                JsonRpcResponse::ok(req.id, json!({ "tools": tools }))
            }
            "tools/call" => {
                if self.state() == ConnState::New {
                    return not_initialized(req.id);
                }
                let Some(params) = req.params else {
                    return invalid_params(req.id, "missing params".to_string());
                };
                let params: CallToolRequestParam = match serde_json::from_value(params) {
                    Ok(p) => p,
                    Err(e) => return invalid_params(req.id, e.to_string()),
                };
                let args = params.arguments.unwrap_or_default();
                let result = self.dispatcher.call_tool_result(&params.name, &args).await;
                JsonRpcResponse::ok(req.id, to_value(&result))
            }
            _ => JsonRpcResponse::err(req.id, METHOD_NOT_FOUND, "method not found", None),
        }
    }

    fn handle_initialize(&self, req: JsonRpcRequest) -> JsonRpcResponse {
        let Some(params) = req.params else {
            return invalid_params(req.id, "missing params".to_string());
        };
        let init: InitializeParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(e) => return invalid_params(req.id, e.to_string()),
        };

        if self
            .state
            .compare_exchange(
                STATE_NEW,
                STATE_INITIALIZED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return JsonRpcResponse::err(req.id, INVALID_REQUEST, "already initialized", None);
        }

        let negotiated = McpServerConfig::negotiate_protocol(&init.protocol_version);
        let _ = self.protocol_version.set(negotiated.clone());
        tracing::info!(
            name: "mcp.initialized",
            client = %init.client_info.name,
            client_version = %init.client_info.version,
            protocol_version = %negotiated,
            session_id = ?self.session_id,
            "Client initialized"
        );

        let result = InitializeResult {
            protocol_version: negotiated,
            capabilities: json!({ "tools": { "listChanged": false } }),
            server_info: self.cfg.server_info.clone(),
            instructions: self.cfg.instructions.clone(),
        };
        JsonRpcResponse::ok(req.id, to_value(&result))
    }

    fn handle_notification(&self, n: &JsonRpcNotification) {
        if n.jsonrpc == "2.0" && n.method == "notifications/initialized" {
            let _ = self.state.compare_exchange(
                STATE_INITIALIZED,
                STATE_READY,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
    }
}

fn to_value<T: serde::Serialize>(v: &T) -> Value {
    serde_json::to_value(v).unwrap_or(Value::Null)
}

fn not_initialized(id: JsonRpcId) -> JsonRpcResponse {
    JsonRpcResponse::err(id, NOT_INITIALIZED, "not initialized", None)
}

fn invalid_params(id: JsonRpcId, detail: String) -> JsonRpcResponse {
    JsonRpcResponse::err(
        id,
        INVALID_PARAMS,
        "invalid params",
        Some(json!({ "detail": detail })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::tools::tests::FakeUpstream;
    use std::sync::Arc;

    fn mk_conn(session_id: Option<&str>) -> McpConnection {
        let dispatcher = Dispatcher::new(Arc::new(FakeUpstream::default()));
        McpConnection::new(
            McpServerConfig::default_for_binary("test", "0.0.0"),
            dispatcher,
            session_id.map(ToString::to_string),
        )
    }

    fn init(id: i64, version: &str) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "initialize",
            "params": {
                "protocolVersion": version,
                "capabilities": {},
                "clientInfo": { "name": "client", "version": "0.0.0" }
            }
        })
    }

    fn request(id: i64, method: &str, params: Value) -> Value {
        json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
    }

    #[tokio::test]
    async fn lifecycle_requires_initialize() {
        let conn = mk_conn(Some("sid-1"));
        assert_eq!(conn.session_id(), None);

        let resp = conn.handle_payload(request(1, "tools/list", json!({}))).await.unwrap();
        assert_eq!(resp["error"]["code"], NOT_INITIALIZED);

        // ping is allowed in any state
        let resp = conn.handle_payload(json!({"jsonrpc":"2.0","id":2,"method":"ping"})).await.unwrap();
        assert_eq!(resp["result"], json!({}));

        let resp = conn.handle_payload(init(3, "2025-03-26")).await.unwrap();
        assert_eq!(resp["result"]["protocolVersion"], "2025-03-26");
        assert_eq!(resp["result"]["serverInfo"]["name"], "test");
        assert_eq!(conn.state(), ConnState::Initialized);
        assert_eq!(conn.session_id(), Some("sid-1"));

        let none = conn
            .handle_payload(json!({"jsonrpc":"2.0","method":"notifications/initialized"}))
            .await;
        assert!(none.is_none());
        assert_eq!(conn.state(), ConnState::Ready);

        let resp = conn.handle_payload(request(4, "tools/list", json!({}))).await.unwrap();
        let names: Vec<&str> = resp["result"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, ["ping_bridge", "get_product", "get_price"]);
        assert_eq!(resp["result"]["tools"][1]["inputSchema"]["required"], json!(["sku"]));
        assert_eq!(conn.requests_handled(), 4);
    }

    #[tokio::test]
    async fn unknown_protocol_version_falls_back_to_latest() {
        let conn = mk_conn(None);
        let resp = conn.handle_payload(init(1, "1999-01-01")).await.unwrap();
        assert_eq!(resp["result"]["protocolVersion"], PROTOCOL_VERSION_LATEST);
        assert_eq!(conn.protocol_version(), Some(PROTOCOL_VERSION_LATEST));
    }

    #[tokio::test]
    async fn second_initialize_is_rejected() {
        let conn = mk_conn(None);
        conn.handle_payload(init(1, PROTOCOL_VERSION_LATEST)).await;
        let resp = conn.handle_payload(init(2, PROTOCOL_VERSION_LATEST)).await.unwrap();
        assert_eq!(resp["error"]["code"], INVALID_REQUEST);
    }

    #[tokio::test]
    async fn failed_initialize_reports_no_session() {
        let conn = mk_conn(Some("sid-2"));
        let resp = conn
            .handle_payload(request(1, "initialize", json!({"protocolVersion": "x"})))
            .await
            .unwrap();
        assert_eq!(resp["error"]["code"], INVALID_PARAMS);
        assert_eq!(conn.session_id(), None);
    }

    #[tokio::test]
    async fn tool_failures_are_successful_responses() {
        let conn = mk_conn(None);
        conn.handle_payload(init(1, PROTOCOL_VERSION_LATEST)).await;

        let resp = conn
            .handle_payload(request(2, "tools/call", json!({"name": "frobnicate", "arguments": {}})))
            .await
            .unwrap();
        assert!(resp.get("error").is_none());
        let text = resp["result"]["content"][0]["text"].as_str().unwrap();
        let payload: Value = serde_json::from_str(text).unwrap();
        assert_eq!(payload["ok"], false);
        assert_eq!(payload["error"], "Unknown tool: frobnicate");

        // arguments may be omitted entirely
        let resp = conn
            .handle_payload(request(3, "tools/call", json!({"name": "get_price"})))
            .await
            .unwrap();
        let text = resp["result"]["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("Missing argument: sku"));
    }

    #[tokio::test]
    async fn batch_collects_request_responses() {
        let conn = mk_conn(None);
        let resp = conn
            .handle_payload(json!([
                init(1, PROTOCOL_VERSION_LATEST),
                { "jsonrpc": "2.0", "method": "notifications/initialized" },
                request(2, "tools/call", json!({"name": "ping_bridge"}))
            ]))
            .await
            .unwrap();
        let items = resp.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["id"], 1);
        assert_eq!(items[1]["id"], 2);

        let resp = conn.handle_payload(json!([])).await.unwrap();
        assert_eq!(resp["error"]["code"], INVALID_REQUEST);
    }

    #[tokio::test]
    async fn unknown_method_and_malformed_message() {
        let conn = mk_conn(None);
        let resp = conn.handle_payload(request(1, "nope", json!({}))).await.unwrap();
        assert_eq!(resp["error"]["code"], METHOD_NOT_FOUND);

        let resp = conn.handle_payload(json!("hello")).await.unwrap();
        assert_eq!(resp["error"]["code"], INVALID_REQUEST);
        assert_eq!(resp["id"], Value::Null);
    }
}
