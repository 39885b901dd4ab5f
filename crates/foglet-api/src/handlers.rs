//! HTTP handlers of the local API.

use axum::extract::{Query, State};
use axum::http::{Method, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::Json;
use bytes::Bytes;
use tracing::{debug, error, info, warn};

use foglet_core::Message;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> axum::response::Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

// ── Config ─────────────────────────────────────────────────────────

#[derive(serde::Deserialize)]
pub struct ConfigRequest {
    pub id: String,
}

/// POST /v2/config/get
pub async fn get_config(
    State(state): State<ApiState>,
    Json(req): Json<ConfigRequest>,
) -> impl IntoResponse {
    match state.registry.find_latest_by_uuid(&req.id) {
        Some(workload) => {
            ApiResponse::ok(serde_json::json!({ "config": workload.config })).into_response()
        }
        None => error_response("workload not found", StatusCode::NOT_FOUND),
    }
}

// ── Messages ───────────────────────────────────────────────────────

#[derive(serde::Deserialize)]
pub struct NextMessagesQuery {
    pub id: String,
}

/// GET /v2/messages/next?id=…
pub async fn next_messages(
    State(state): State<ApiState>,
    Query(query): Query<NextMessagesQuery>,
) -> impl IntoResponse {
    match state.router.next_messages(&query.id).await {
        Ok(messages) => ApiResponse::ok(serde_json::json!({
            "count": messages.len(),
            "messages": messages,
        }))
        .into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::NOT_FOUND),
    }
}

/// POST /v2/messages/new
pub async fn new_message(
    State(state): State<ApiState>,
    Json(message): Json<Message>,
) -> impl IntoResponse {
    if message.publisher.is_empty() {
        return error_response("publisher is required", StatusCode::BAD_REQUEST);
    }
    match state.router.publish(message).await {
        Ok(stamped) => (
            StatusCode::CREATED,
            ApiResponse::ok(serde_json::json!({
                "id": stamped.id,
                "timestamp": stamped.timestamp,
            })),
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "publish via local api failed");
            error_response(&e.to_string(), StatusCode::BAD_REQUEST)
        }
    }
}

#[derive(serde::Deserialize)]
pub struct QueryMessagesRequest {
    pub publishers: Vec<String>,
    #[serde(rename = "timeframestart")]
    pub timeframe_start: u64,
    #[serde(rename = "timeframeend")]
    pub timeframe_end: u64,
}

/// POST /v2/messages/query
pub async fn query_messages(
    State(state): State<ApiState>,
    Json(req): Json<QueryMessagesRequest>,
) -> impl IntoResponse {
    if req.timeframe_end < req.timeframe_start {
        return error_response("empty time window", StatusCode::BAD_REQUEST);
    }
    let messages =
        state
            .router
            .query_history(&req.publishers, req.timeframe_start, req.timeframe_end);
    ApiResponse::ok(serde_json::json!({
        "count": messages.len(),
        "messages": messages,
    }))
    .into_response()
}

// ── Log ────────────────────────────────────────────────────────────

#[derive(serde::Deserialize)]
pub struct LogRequest {
    pub id: String,
    #[serde(default)]
    pub level: String,
    pub message: String,
}

/// POST /v2/log — workload log lines go through the agent's logger.
pub async fn post_log(Json(req): Json<LogRequest>) -> impl IntoResponse {
    match req.level.to_ascii_lowercase().as_str() {
        "error" | "severe" => error!(workload = %req.id, "{}", req.message),
        "warn" | "warning" => warn!(workload = %req.id, "{}", req.message),
        "debug" => debug!(workload = %req.id, "{}", req.message),
        _ => info!(workload = %req.id, "{}", req.message),
    }
    ApiResponse::ok(()).into_response()
}

// ── Command line ───────────────────────────────────────────────────

#[derive(serde::Deserialize)]
pub struct CommandLineRequest {
    pub command: String,
}

/// POST /v2/commandline — agent control commands.
pub async fn command_line(
    State(state): State<ApiState>,
    Json(req): Json<CommandLineRequest>,
) -> impl IntoResponse {
    match req.command.trim() {
        "version" => ApiResponse::ok(serde_json::json!({
            "result": env!("CARGO_PKG_VERSION"),
        }))
        .into_response(),
        "status" => {
            let states = state.status.workload_states();
            ApiResponse::ok(serde_json::json!({
                "result": {
                    "processed_messages": state.status.processed_messages(),
                    "average_speed": state.status.average_speed(),
                    "workloads": states,
                },
            }))
            .into_response()
        }
        other => error_response(
            &format!("unknown command \"{other}\""),
            StatusCode::BAD_REQUEST,
        ),
    }
}

// ── REST-Blue forward ──────────────────────────────────────────────

/// Forward `/v2/restblue[/…]` to the configured REST-Blue endpoint.
pub async fn restblue(
    State(state): State<ApiState>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> impl IntoResponse {
    let Some(base) = state.restblue_url.clone() else {
        return error_response("restblue is not configured", StatusCode::NOT_FOUND);
    };

    let tail = uri
        .path()
        .strip_prefix("/v2/restblue")
        .unwrap_or_default()
        .to_string();
    let target = format!("{}{}", base.trim_end_matches('/'), tail);

    match forward(&method, &target, body).await {
        Ok((status, payload)) => (status, payload).into_response(),
        Err(e) => {
            warn!(%target, error = %e, "restblue forward failed");
            error_response(&e, StatusCode::BAD_GATEWAY)
        }
    }
}

/// Minimal HTTP/1.1 forward over a fresh connection.
async fn forward(method: &Method, target: &str, body: Bytes) -> Result<(StatusCode, Bytes), String> {
    use http_body_util::BodyExt;

    let uri: Uri = target.parse().map_err(|_| "bad target uri".to_string())?;
    let authority = uri
        .authority()
        .ok_or_else(|| "target uri has no authority".to_string())?
        .to_string();
    let addr = if authority.contains(':') {
        authority.clone()
    } else {
        format!("{authority}:80")
    };

    let stream = tokio::net::TcpStream::connect(&addr)
        .await
        .map_err(|e| e.to_string())?;
    let io = hyper_util::rt::TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| e.to_string())?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let request = http::Request::builder()
        .method(method.as_str())
        .uri(target)
        .header("host", authority)
        .body(http_body_util::Full::new(body))
        .map_err(|e| e.to_string())?;

    let response = sender
        .send_request(request)
        .await
        .map_err(|e| e.to_string())?;
    let status = response.status();
    let payload = response
        .into_body()
        .collect()
        .await
        .map_err(|e| e.to_string())?
        .to_bytes();
    Ok((status, payload))
}
