//! foglet-api — the local API served to workloads.
//!
//! Workloads on the node talk to the agent over HTTP and WebSocket:
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/v2/config/get` | Fetch the workload's configuration blob |
//! | GET | `/v2/messages/next?id=…` | Pull pending messages |
//! | POST | `/v2/messages/new` | Publish a message |
//! | POST | `/v2/messages/query` | Range query by time window |
//! | GET | `/v2/control/socket/{id}` | Control websocket (config changes) |
//! | GET | `/v2/message/socket/{id}` | Real-time message websocket |
//! | POST | `/v2/log` | Workload log line |
//! | POST | `/v2/commandline` | Agent control command |
//! | any | `/v2/restblue` | Forwarded to the REST-Blue endpoint |
//!
//! Malformed requests get 400-class responses and never touch core
//! state.

pub mod handlers;
pub mod ws;

use std::sync::Arc;

use axum::routing::{any, get, post};
use axum::Router;

use foglet_registry::WorkloadRegistry;
use foglet_routing::MessageRouter;
use foglet_status::StatusReporter;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub router: Arc<MessageRouter>,
    pub registry: Arc<WorkloadRegistry>,
    pub status: Arc<StatusReporter>,
    /// Forward target for `/v2/restblue`; 404 when unset.
    pub restblue_url: Option<String>,
}

/// Build the complete local API router.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/v2/config/get", post(handlers::get_config))
        .route("/v2/messages/next", get(handlers::next_messages))
        .route("/v2/messages/new", post(handlers::new_message))
        .route("/v2/messages/query", post(handlers::query_messages))
        .route("/v2/log", post(handlers::post_log))
        .route("/v2/commandline", post(handlers::command_line))
        .route("/v2/restblue", any(handlers::restblue))
        .route("/v2/restblue/{*path}", any(handlers::restblue))
        .route("/v2/control/socket/{id}", get(ws::control_socket))
        .route("/v2/message/socket/{id}", get(ws::message_socket))
        .with_state(state)
}
