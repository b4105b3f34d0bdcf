use std::sync::Arc;

use anyhow::bail;
use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::post,
};
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::AppState;
use crate::config::{AppConfig, ServerConfig};
use crate::mcp::McpConnection;
use crate::mcp::types::{JsonRpcId, JsonRpcResponse, PARSE_ERROR, is_initialize_request};
use crate::session::Session;

/// Header carrying the session identifier in both directions.
pub const SESSION_HEADER: &str = "mcp-session-id";

const BAD_SESSION: &str = "Bad Request: missing/invalid session or initialize first";

/// Start the HTTP front-end with the provided configuration.
pub async fn start_server(config: Arc<AppConfig>) -> anyhow::Result<()> {
    let dispatcher = crate::build_dispatcher(&config.upstream)?;
    let state = AppState::new(dispatcher);

    let reaper = state.sessions.spawn_reaper(
        config.sessions.sweep_interval(),
        config.sessions.idle_timeout(),
    );

    let app = router(state, &config.server);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name: "server.started",
        address = %addr,
        "MCP HTTP server listening"
    );

    let served = axum::serve(listener, app.into_make_service()).await;
    reaper.abort();
    served?;
    Ok(())
}

/// Build the router for the single MCP endpoint `/`.
pub fn router(state: AppState, server: &ServerConfig) -> Router {
    let timeout_duration = server.request_timeout();

    Router::new()
        .route("/", post(mcp_post).get(mcp_get))
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(server.body_limit_bytes))
        .layer(axum::middleware::from_fn(
            move |req: Request, next: Next| {
                let duration = timeout_duration;
                async move {
                    match tokio::time::timeout(duration, next.run(req)).await {
                        Ok(res) => res,
                        Err(_) => {
                            (StatusCode::REQUEST_TIMEOUT, "Request timed out").into_response()
                        }
                    }
                }
            },
        ))
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// GET / - server-initiated streams are not offered.
async fn mcp_get() -> impl IntoResponse {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(header::ALLOW, "POST")],
        "Method Not Allowed",
    )
}

/// POST / - route one message or batch to its session.
async fn mcp_post(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    match route_message(&state, &headers, &body).await {
        Ok(res) => res,
        Err(e) => {
            tracing::error!(name: "http.internal_error", error = ?e, "MCP request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "ok": false, "error": "Internal server error" })),
            )
                .into_response()
        }
    }
}

async fn route_message(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
) -> anyhow::Result<Response> {
    let payload: Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => {
            let resp = JsonRpcResponse::err(
                JsonRpcId::Null,
                PARSE_ERROR,
                "parse error",
                Some(json!({ "detail": e.to_string() })),
            );
            return Ok((StatusCode::BAD_REQUEST, Json(resp)).into_response());
        }
    };

    let session_id = header_str(headers, SESSION_HEADER).filter(|s| !s.is_empty());

    // Reuse the session's handler.
    if let Some(sid) = session_id {
        if let Some(session) = state.sessions.get(sid).await {
            let reply = session.connection().handle_payload(payload).await;
            return jsonrpc_http_response(reply.as_ref(), Some(session.id()));
        }
    } else if is_initialize_request(&payload) {
        return open_session(state, payload).await;
    }

    tracing::debug!(
        name: "session.rejected",
        session_id = ?session_id,
        "No live session and not an initialize request"
    );
    Ok((
        StatusCode::BAD_REQUEST,
        Json(json!({ "ok": false, "error": BAD_SESSION })),
    )
        .into_response())
}

/// Mint a session, run the initialize payload through a fresh handler and
/// register it only if the handshake succeeded.
async fn open_session(state: &AppState, payload: Value) -> anyhow::Result<Response> {
    let sid = Session::generate_id();
    let conn = Arc::new(McpConnection::new(
        state.server_info.clone(),
        state.dispatcher.clone(),
        Some(sid),
    ));

    let reply = conn.handle_payload(payload).await;

    let Some(id) = conn.session_id().map(ToString::to_string) else {
        return jsonrpc_http_response(reply.as_ref(), None);
    };
    if !state
        .sessions
        .insert(Session::new(id.clone(), Arc::clone(&conn)))
        .await
    {
        bail!("session id collision: {id}");
    }

    info!(
        name: "session.created",
        session_id = %id,
        protocol_version = ?conn.protocol_version(),
        "Session created"
    );
    jsonrpc_http_response(reply.as_ref(), Some(&id))
}

fn jsonrpc_http_response(reply: Option<&Value>, session_id: Option<&str>) -> anyhow::Result<Response> {
    let mut builder = Response::builder();
    if let Some(sid) = session_id {
        builder = builder.header(SESSION_HEADER, HeaderValue::from_str(sid)?);
    }

    let res = match reply {
        Some(body) => builder
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(body)?))?,
        None => builder.status(StatusCode::ACCEPTED).body(Body::empty())?,
    };
    Ok(res)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|h| h.to_str().ok())
}
