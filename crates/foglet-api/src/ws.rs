//! WebSocket endpoints: control sockets (config-change notifications)
//! and real-time message sockets.

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::ApiState;

/// Frame sent on a control socket when the workload's config changes.
fn config_changed_frame() -> WsMessage {
    WsMessage::Text(r#"{"type":"config-changed"}"#.into())
}

/// GET /v2/control/socket/{id}
///
/// The workload keeps this socket open; whenever the controller
/// replaces its configuration it receives a notification frame and
/// re-fetches via `POST /v2/config/get`.
pub async fn control_socket(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    upgrade: WebSocketUpgrade,
) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| run_control_socket(state, id, socket))
}

async fn run_control_socket(state: ApiState, id: String, mut socket: WebSocket) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    state.registry.subscribe_config_changes(&id, tx);
    info!(workload = %id, "control socket opened");

    loop {
        tokio::select! {
            changed = rx.recv() => {
                if changed.is_none() {
                    break;
                }
                if socket.send(config_changed_frame()).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    // The workload only ever pings on this socket.
                    Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {}
                    Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(other)) => {
                        debug!(workload = %id, ?other, "ignoring control socket frame");
                    }
                }
            }
        }
    }

    state.registry.unsubscribe_config_changes(&id);
    info!(workload = %id, "control socket closed");
}

/// GET /v2/message/socket/{id}
///
/// Enables real-time delivery for the receiver: every message arriving
/// for `id` is pushed as a JSON text frame. Closing the socket
/// disables real-time mode again.
pub async fn message_socket(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    upgrade: WebSocketUpgrade,
) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| run_message_socket(state, id, socket))
}

async fn run_message_socket(state: ApiState, id: String, mut socket: WebSocket) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    if let Err(e) = state.router.enable_realtime_receiving(&id, tx).await {
        warn!(workload = %id, error = %e, "real-time socket rejected");
        let _ = socket
            .send(WsMessage::Close(Some(axum::extract::ws::CloseFrame {
                code: axum::extract::ws::close_code::POLICY,
                reason: "unknown receiver".into(),
            })))
            .await;
        return;
    }
    info!(workload = %id, "real-time message socket opened");

    loop {
        tokio::select! {
            arrived = rx.recv() => {
                let Some(message) = arrived else { break };
                let frame = match serde_json::to_string(&message) {
                    Ok(json) => WsMessage::Text(json.into()),
                    Err(e) => {
                        warn!(workload = %id, error = %e, "message serialization failed");
                        continue;
                    }
                };
                if socket.send(frame).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {}
                    Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(other)) => {
                        debug!(workload = %id, ?other, "ignoring message socket frame");
                    }
                }
            }
        }
    }

    state.router.disable_realtime_receiving(&id).await;
    info!(workload = %id, "real-time message socket closed");
}
