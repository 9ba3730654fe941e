//! Caller permission endpoints.
//!
//! Both run behind `require_auth`.

use crate::auth::claims::TokenClaims;
use crate::authz::permission::{AccessLevel, Permission, ResourceType};
use crate::authz::policy;
use crate::errors::GuardError;
use crate::middleware::CorrelationId;
use crate::models::{
    PermissionsResponse, PermissionsSummary, TestPermissionRequest, TestPermissionResponse,
    STATUS_SUCCESS,
};
use crate::observability::metrics;
use axum::extract::rejection::JsonRejection;
use axum::{Extension, Json};
use tracing::instrument;

fn correlation(id: Option<Extension<CorrelationId>>) -> String {
    id.map_or_else(|| "unknown".to_string(), |Extension(CorrelationId(id))| id)
}

/// Handler for GET /v1/user/permissions
#[instrument(skip_all, name = "guard.handlers.permissions")]
pub async fn get_user_permissions(
    Extension(claims): Extension<TokenClaims>,
    correlation_id: Option<Extension<CorrelationId>>,
) -> Json<PermissionsResponse> {
    let correlation_id = correlation(correlation_id);
    tracing::info!(
        target: "guard.handlers.permissions",
        roles = ?claims.roles,
        "User permissions requested"
    );

    let role_permissions = policy::role_permissions(&claims);
    let permissions = claims.permission_strings();

    Json(PermissionsResponse {
        code: "200",
        status: STATUS_SUCCESS,
        message: "User permissions retrieved",
        permissions: PermissionsSummary {
            user_id: claims.sub,
            client_id: claims.client_id,
            roles: claims.roles.into_iter().collect(),
            scopes: claims.scope,
            permissions,
            role_permissions,
            functional_permissions: claims.functional_permissions.into_iter().collect(),
            correlation_id,
        },
    })
}

/// Handler for POST /v1/security/test-permission
///
/// Evaluates one object permission for the caller.
#[instrument(skip_all, name = "guard.handlers.test_permission")]
pub async fn test_permission(
    Extension(claims): Extension<TokenClaims>,
    correlation_id: Option<Extension<CorrelationId>>,
    body: Result<Json<TestPermissionRequest>, JsonRejection>,
) -> Result<Json<TestPermissionResponse>, GuardError> {
    let correlation_id = correlation(correlation_id);
    let Json(body) = body.map_err(|e| GuardError::BadRequest(e.body_text()))?;

    let (Some(resource_type), Some(resource_id), Some(access_level)) = (
        body.resource_type.filter(|s| !s.is_empty()),
        body.resource_id.filter(|s| !s.is_empty()),
        body.access_level.filter(|s| !s.is_empty()),
    ) else {
        return Err(GuardError::BadRequest(
            "Missing required fields: resource_type, resource_id, access_level".to_string(),
        ));
    };

    let resource_type = ResourceType::parse(&resource_type)
        .ok_or_else(|| GuardError::BadRequest(format!("Unknown resource_type: {resource_type}")))?;
    let access_level = AccessLevel::parse(&access_level)
        .ok_or_else(|| GuardError::BadRequest(format!("Unknown access_level: {access_level}")))?;
    let permission = Permission::new(resource_type, resource_id, access_level);

    let matched = policy::check_permission(&claims, &permission);
    metrics::record_authz_decision(matched.is_some());

    tracing::info!(
        target: "guard.handlers.test_permission",
        permission = %permission,
        has_permission = matched.is_some(),
        "Permission test completed"
    );

    Ok(Json(TestPermissionResponse {
        code: "200",
        status: STATUS_SUCCESS,
        message: "Permission test completed",
        permission: permission.to_string(),
        has_permission: matched.is_some(),
        matched_policy: matched,
        user_id: claims.sub,
        correlation_id,
    }))
}
