//! Authentication and requirement-enforcement middleware.
//!
//! `require_auth` validates the bearer token, applies the per-client rate
//! limit and stores the claims and provider in request extensions.
//! `enforce_requirements` then checks a route's requirement list against
//! those claims.

use crate::auth::claims::TokenClaims;
use crate::authz::requirement::Requirement;
use crate::config::Provider;
use crate::engine::AuthEngine;
use crate::errors::GuardError;
use crate::middleware::rate_limit::uncounted_ip_key;
use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::instrument;

/// State for the authentication middleware.
#[derive(Clone)]
pub struct AuthState {
    pub engine: Arc<AuthEngine>,
}

/// State for requirement enforcement on one group of routes.
#[derive(Clone)]
pub struct RequirementState {
    pub engine: Arc<AuthEngine>,
    pub requirements: Arc<[Requirement]>,
}

impl RequirementState {
    pub fn new(engine: Arc<AuthEngine>, requirements: Vec<Requirement>) -> Self {
        Self {
            engine,
            requirements: requirements.into(),
        }
    }
}

/// Authentication middleware.
///
/// # Response
///
/// - 401 with `WWW-Authenticate` when the token is missing or invalid
/// - 429 when the authenticated client is over its limit
/// - 503 when signing keys are unavailable
#[instrument(skip_all, name = "guard.middleware.auth")]
pub async fn require_auth(
    State(state): State<AuthState>,
    mut req: Request,
    next: Next,
) -> Result<Response, GuardError> {
    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let ip_key = uncounted_ip_key(&req);
    let validated = state.engine.validate_request(authorization, None).await?;
    state
        .engine
        .rate_check_client(&validated.claims, ip_key.as_deref())?;

    req.extensions_mut().insert(validated.provider);
    req.extensions_mut().insert(validated.claims);

    Ok(next.run(req).await)
}

/// Requirement enforcement. Must run after `require_auth`.
pub async fn enforce_requirements(
    State(state): State<RequirementState>,
    req: Request,
    next: Next,
) -> Result<Response, GuardError> {
    let claims = req.claims().ok_or_else(|| {
        tracing::error!(target: "guard.middleware.auth", "Requirements enforced without authentication");
        GuardError::Internal
    })?;

    let decision = state.engine.authorize(claims, &state.requirements);
    if !decision.allowed {
        return Err(GuardError::AccessDenied(decision.reason));
    }

    Ok(next.run(req).await)
}

/// Extension trait for reading authentication results from a request.
pub trait ClaimsExt {
    /// Returns `None` if `require_auth` did not run for this request.
    fn claims(&self) -> Option<&TokenClaims>;

    fn provider(&self) -> Option<Provider>;
}

impl<B> ClaimsExt for axum::http::Request<B> {
    fn claims(&self) -> Option<&TokenClaims> {
        self.extensions().get::<TokenClaims>()
    }

    fn provider(&self) -> Option<Provider> {
        self.extensions().get::<Provider>().copied()
    }
}
