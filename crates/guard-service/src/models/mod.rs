//! Guard service models.
//!
//! Request and response bodies of the HTTP surface.

use crate::auth::claims::TokenClaims;
use crate::auth::jwks::SourceStatus;
use crate::authz::requirement::MatchedPolicy;
use serde::{Deserialize, Serialize};

/// Success envelope `status` value.
pub const STATUS_SUCCESS: &str = "success";

/// Health check response.
///
/// Returned by the `/v1/health` endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// "healthy" when every source has a fresh key set, "degraded" otherwise.
    pub status: String,

    /// Service name.
    pub service: &'static str,

    /// Crate version.
    pub version: &'static str,

    /// Per trust-source cache state.
    pub sources: Vec<SourceStatus>,
}

/// Success envelope for token validation.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationResponse {
    pub code: &'static str,
    pub status: &'static str,
    pub provider: &'static str,
    pub claims: TokenClaims,
}

/// The caller's access summary.
#[derive(Debug, Clone, Serialize)]
pub struct PermissionsSummary {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub roles: Vec<String>,
    pub scopes: Vec<String>,
    /// Every permission as `type:id:level`.
    pub permissions: Vec<String>,
    /// Grants implied by the caller's roles.
    pub role_permissions: Vec<String>,
    pub functional_permissions: Vec<String>,
    pub correlation_id: String,
}

/// Response for `GET /v1/user/permissions`.
#[derive(Debug, Clone, Serialize)]
pub struct PermissionsResponse {
    pub code: &'static str,
    pub status: &'static str,
    pub message: &'static str,
    pub permissions: PermissionsSummary,
}

/// Body of `POST /v1/security/test-permission`.
#[derive(Debug, Clone, Deserialize)]
pub struct TestPermissionRequest {
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub access_level: Option<String>,
}

/// Response for `POST /v1/security/test-permission`.
#[derive(Debug, Clone, Serialize)]
pub struct TestPermissionResponse {
    pub code: &'static str,
    pub status: &'static str,
    pub message: &'static str,
    pub permission: String,
    pub has_permission: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_policy: Option<MatchedPolicy>,
    pub user_id: String,
    pub correlation_id: String,
}
