//! Health check handler.
//!
//! Reports JWKS cache freshness per trust source. No authentication.

use crate::models::HealthResponse;
use crate::routes::AppState;
use axum::extract::State;
use axum::Json;
use std::sync::Arc;
use tracing::instrument;

/// Health check handler.
///
/// Always answers 200 so the orchestrator can read the body; `status` is
/// "healthy" only when every source holds a fresh key set.
///
/// ## Example Response
///
/// ```json
/// {
///   "status": "healthy",
///   "service": "cop-guard",
///   "version": "0.1.0",
///   "sources": [{"source": "apigee", "cached": true, "key_count": 2, "fresh": true}]
/// }
/// ```
#[instrument(skip_all, name = "guard.health.check")]
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let sources = state.engine.cache().snapshot().await;
    let healthy = !sources.is_empty() && sources.iter().all(|s| s.fresh);

    Json(HealthResponse {
        status: if healthy { "healthy" } else { "degraded" }.to_string(),
        service: "cop-guard",
        version: env!("CARGO_PKG_VERSION"),
        sources,
    })
}
