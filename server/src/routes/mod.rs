//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! One Axum router serves the discovery endpoint clients call once at
//! start-up, the diagnostic module dump, and the websocket upgrade that
//! carries routing sessions.

pub mod discovery;
pub mod ws;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/rocky/routers", get(discovery::routers))
        .route("/rocky/module/{namespace}", get(discovery::module_records))
        .route("/rocky/ws", get(ws::handle_ws))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
