//! COP Guard error types.
//!
//! Every failure the validation pipeline can produce is one `GuardError`
//! variant. All variants map to an HTTP status via `status_code()` and to the
//! gateway's JSON failure envelope via the `IntoResponse` impl:
//!
//! ```json
//! {"code": "401", "status": "auth_error", "error_message": "Token has expired"}
//! ```
//!
//! Messages never contain token content or key material. Upstream fetch
//! details are logged server-side and replaced with a generic message.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use common::jwt::JwtFormatError;
use serde::Serialize;
use thiserror::Error;

/// Value of the `WWW-Authenticate` header attached to every 401.
pub const WWW_AUTHENTICATE_VALUE: &str = "Bearer realm=\"cop-guard\", error=\"invalid_token\"";

/// COP Guard error type.
///
/// Maps to HTTP status codes:
/// - token, claim and provider failures: 401 Unauthorized
/// - AccessDenied: 403 Forbidden
/// - RateLimited: 429 Too Many Requests
/// - Fetch, Stale: 503 Service Unavailable
/// - TlsRequired, ClientCertificateRequired: 426 Upgrade Required
/// - BadRequest: 400 Bad Request
/// - Internal: 500 Internal Server Error
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GuardError {
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Invalid token signature")]
    BadSignature,

    #[error("Unknown signing key")]
    UnknownKey,

    #[error("Token has expired")]
    Expired,

    #[error("Token is not yet valid")]
    NotYetValid,

    #[error("Invalid audience")]
    WrongAudience,

    #[error("Invalid issuer")]
    WrongIssuer,

    #[error("Missing or invalid claim: {0}")]
    MissingClaim(String),

    #[error("Unknown identity provider: {0}")]
    UnknownProvider(String),

    #[error("JWKS fetch failed for {source_name}: {reason}")]
    Fetch { source_name: String, reason: String },

    #[error("JWKS for {0} expired and could not be refreshed")]
    Stale(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Authorization header required")]
    MissingToken,

    #[error("HTTPS connection required")]
    TlsRequired,

    #[error("Client certificate required")]
    ClientCertificateRequired,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error")]
    Internal,
}

impl GuardError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            GuardError::MalformedToken(_)
            | GuardError::UnsupportedAlgorithm(_)
            | GuardError::BadSignature
            | GuardError::UnknownKey
            | GuardError::Expired
            | GuardError::NotYetValid
            | GuardError::WrongAudience
            | GuardError::WrongIssuer
            | GuardError::MissingClaim(_)
            | GuardError::UnknownProvider(_)
            | GuardError::MissingToken => 401,
            GuardError::AccessDenied(_) => 403,
            GuardError::RateLimited => 429,
            GuardError::Fetch { .. } | GuardError::Stale(_) => 503,
            GuardError::TlsRequired | GuardError::ClientCertificateRequired => 426,
            GuardError::BadRequest(_) => 400,
            GuardError::Internal => 500,
        }
    }

    /// Envelope `status` field for this error.
    pub fn status_label(&self) -> &'static str {
        match self.status_code() {
            401 => "auth_error",
            403 => "access_denied",
            429 => "rate_limit_exceeded",
            503 => "service_unavailable",
            426 => "tls_error",
            _ => "error",
        }
    }

    /// Bounded label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            GuardError::MalformedToken(_) => "malformed_token",
            GuardError::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            GuardError::BadSignature => "bad_signature",
            GuardError::UnknownKey => "unknown_key",
            GuardError::Expired => "expired",
            GuardError::NotYetValid => "not_yet_valid",
            GuardError::WrongAudience => "wrong_audience",
            GuardError::WrongIssuer => "wrong_issuer",
            GuardError::MissingClaim(_) => "missing_claim",
            GuardError::UnknownProvider(_) => "unknown_provider",
            GuardError::Fetch { .. } => "jwks_fetch",
            GuardError::Stale(_) => "jwks_stale",
            GuardError::AccessDenied(_) => "access_denied",
            GuardError::RateLimited => "rate_limited",
            GuardError::MissingToken => "missing_token",
            GuardError::TlsRequired => "tls_required",
            GuardError::ClientCertificateRequired => "client_certificate_required",
            GuardError::BadRequest(_) => "bad_request",
            GuardError::Internal => "internal",
        }
    }

    /// Message safe to hand back to the client.
    fn client_message(&self) -> String {
        match self {
            GuardError::Fetch { source_name, reason } => {
                // Log actual error server-side, return generic message to client
                tracing::warn!(
                    target: "guard.availability",
                    source = %source_name,
                    reason = %reason,
                    "Signing keys unavailable"
                );
                "Authentication service temporarily unavailable".to_string()
            }
            GuardError::Stale(source_name) => {
                tracing::warn!(
                    target: "guard.availability",
                    source = %source_name,
                    "Signing keys expired and refresh failed"
                );
                "Authentication service temporarily unavailable".to_string()
            }
            GuardError::Internal => "An internal error occurred".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<JwtFormatError> for GuardError {
    fn from(err: JwtFormatError) -> Self {
        GuardError::MalformedToken(err.to_string())
    }
}

/// Failure envelope returned to clients.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub code: String,
    pub status: &'static str,
    pub error_message: String,
}

impl IntoResponse for GuardError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let envelope = ErrorEnvelope {
            code: status.as_u16().to_string(),
            status: self.status_label(),
            error_message: self.client_message(),
        };

        let mut response = (status, Json(envelope)).into_response();

        // Add WWW-Authenticate header for 401 responses
        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static(WWW_AUTHENTICATE_VALUE),
            );
        }

        response
    }
}
