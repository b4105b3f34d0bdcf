use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Latest MCP protocol revision spoken by the bridge.
pub const PROTOCOL_VERSION_LATEST: &str = "2025-06-18";

/// Revisions accepted during `initialize` negotiation.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] =
    &[PROTOCOL_VERSION_LATEST, "2025-03-26", "2024-11-05"];

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const NOT_INITIALIZED: i64 = -32002;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcId {
    Number(i64),
    String(String),
    Null,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: JsonRpcId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: JsonRpcId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn ok(id: JsonRpcId, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: JsonRpcId, code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data,
            }),
        }
    }
}

/// One inbound JSON-RPC message.
#[derive(Debug, Clone)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
    Response(JsonRpcResponse),
}

impl JsonRpcMessage {
    /// Classify a decoded JSON value: `method` + `id` is a request, `method`
    /// alone a notification, `result`/`error` a response.
    pub fn from_value(value: Value) -> Result<Self, String> {
        let Some(obj) = value.as_object() else {
            return Err("message must be a JSON object".to_string());
        };
        let parsed = if obj.contains_key("method") {
            if obj.contains_key("id") {
                serde_json::from_value(value).map(Self::Request)
            } else {
                serde_json::from_value(value).map(Self::Notification)
            }
        } else if obj.contains_key("result") || obj.contains_key("error") {
            serde_json::from_value(value).map(Self::Response)
        } else {
            return Err("not a JSON-RPC message".to_string());
        };
        parsed.map_err(|e| e.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Implementation {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: serde_json::Map<String, Value>,
    pub client_info: Implementation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: Value,
    pub server_info: Implementation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// Shape check used by the HTTP front-end before minting a session.
#[derive(Debug, Deserialize)]
struct InitializeRequest {
    #[allow(dead_code)]
    id: JsonRpcId,
    method: String,
    #[allow(dead_code)]
    params: InitializeParams,
}

/// `true` if `body` is, or (for a batch) contains, an `initialize` request.
pub fn is_initialize_request(body: &Value) -> bool {
    let is_init = |v: &Value| {
        serde_json::from_value::<InitializeRequest>(v.clone())
            .is_ok_and(|req| req.method == "initialize")
    };
    match body {
        Value::Array(items) => items.iter().any(is_init),
        other => is_init(other),
    }
}
