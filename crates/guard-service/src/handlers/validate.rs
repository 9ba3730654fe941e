//! Token validation endpoints.
//!
//! `POST /v1/auth/validate` picks the trust source from the token issuer;
//! `POST /v1/auth/{provider}/validate` pins it.

use crate::config::Provider;
use crate::errors::GuardError;
use crate::middleware::rate_limit::uncounted_ip_key;
use crate::models::{ValidationResponse, STATUS_SUCCESS};
use crate::routes::AppState;
use axum::extract::{Path, Request, State};
use axum::http::header;
use axum::Json;
use std::sync::Arc;
use tracing::instrument;

async fn validate(
    state: &AppState,
    req: Request,
    pinned: Option<Provider>,
) -> Result<Json<ValidationResponse>, GuardError> {
    let ip_key = uncounted_ip_key(&req);
    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let validated = state.engine.validate_request(authorization, pinned).await?;
    state
        .engine
        .rate_check_client(&validated.claims, ip_key.as_deref())?;

    Ok(Json(ValidationResponse {
        code: "200",
        status: STATUS_SUCCESS,
        provider: validated.provider.as_str(),
        claims: validated.claims,
    }))
}

/// Handler for POST /v1/auth/validate
#[instrument(skip_all, name = "guard.handlers.validate")]
pub async fn validate_auto(
    State(state): State<Arc<AppState>>,
    req: Request,
) -> Result<Json<ValidationResponse>, GuardError> {
    validate(&state, req, None).await
}

/// Handler for POST /v1/auth/{provider}/validate
#[instrument(skip_all, name = "guard.handlers.validate", fields(provider = %provider))]
pub async fn validate_pinned(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    req: Request,
) -> Result<Json<ValidationResponse>, GuardError> {
    let pinned = Provider::parse(&provider)
        .ok_or_else(|| GuardError::UnknownProvider(provider.clone()))?;
    validate(&state, req, Some(pinned)).await
}
