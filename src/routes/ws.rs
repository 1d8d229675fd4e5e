use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::ws;
use crate::state::AppState;
use std::sync::Arc;

/// Create the WebSocket router
///
/// Authentication happens during the upgrade: the JWT travels in the `token`
/// query parameter because browsers cannot set headers on WebSocket requests.
pub fn create_ws_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/voice/transcribe", get(ws::voice_transcribe_handler))
        .layer(TraceLayer::new_for_http())
}
