use axum::{extract::State, http::StatusCode, response::Json};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::core::HealthProbe;
use crate::state::AppState;

/// Health check handler
/// Returns a simple JSON response indicating the server is running
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "OK"
    }))
}

/// Body of `GET /voice/health`
#[derive(Debug, Serialize)]
pub struct VoiceHealthResponse {
    #[serde(flatten)]
    pub probe: HealthProbe,
    pub active_sessions: usize,
}

/// Upstream health handler
///
/// Serves the cached observation while it is fresh and probes the speech
/// service otherwise. Responds 503 while the upstream is unhealthy so load
/// balancers can act on the status code alone.
pub async fn voice_health(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<VoiceHealthResponse>) {
    let core = &state.core_state;
    let probe = core.health.current().await;
    let status = if probe.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(VoiceHealthResponse {
            probe,
            active_sessions: core.registry.len(),
        }),
    )
}
