//! HTTP routes for the guard service.
//!
//! Defines the Axum router and application state.

use crate::config::Config;
use crate::engine::AuthEngine;
use crate::handlers;
use crate::middleware::{
    correlation_id, http_metrics_middleware, limit_by_ip, require_auth,
    require_transport_security, AuthState, TransportState,
};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

pub use crate::observability::metrics::init_metrics_recorder;

/// Per-request timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Config,

    /// Token validation, authorization and rate limiting.
    pub engine: Arc<AuthEngine>,
}

/// Build the application routes.
///
/// - `/v1/health` and `/metrics` are public and skip transport checks.
/// - `/v1/auth/...` validation routes sit behind the transport check and
///   the per-IP limit.
/// - `/v1/user/permissions` and `/v1/security/test-permission` also
///   require a valid bearer token.
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let auth_state = AuthState {
        engine: Arc::clone(&state.engine),
    };
    let transport_state = TransportState {
        require_mtls: state.config.require_mtls,
    };
    let limiter = Arc::clone(state.engine.limiter());

    let public_routes = Router::new()
        .route("/v1/health", get(handlers::health_check))
        .with_state(Arc::clone(&state));

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    let validation_routes = Router::new()
        .route("/v1/auth/validate", post(handlers::validate_auto))
        .route("/v1/auth/:provider/validate", post(handlers::validate_pinned))
        .with_state(state);

    let protected_routes = Router::new()
        .route("/v1/user/permissions", get(handlers::get_user_permissions))
        .route(
            "/v1/security/test-permission",
            post(handlers::test_permission),
        )
        .layer(middleware::from_fn_with_state(auth_state, require_auth));

    // Transport check runs before the IP limit
    let api_routes = validation_routes
        .merge(protected_routes)
        .layer(middleware::from_fn_with_state(limiter, limit_by_ip))
        .layer(middleware::from_fn_with_state(
            transport_state,
            require_transport_security,
        ));

    // Outermost to innermost: metrics, correlation span, trace, timeout
    Router::new()
        .merge(public_routes)
        .merge(metrics_routes)
        .merge(api_routes)
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(correlation_id))
        .layer(middleware::from_fn(http_metrics_middleware))
}
