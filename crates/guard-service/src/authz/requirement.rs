//! Route requirements and authorization decisions.

use crate::authz::permission::Permission;
use serde::Serialize;
use std::fmt;

/// One condition a route places on the caller. A route's requirements are
/// ANDed in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    /// Exact scope membership.
    Scope(String),
    /// At least one of the listed scopes.
    AnyScope(Vec<String>),
    /// Named function in `functional_permissions` AND (when roles are
    /// listed) one of the allowed roles.
    Functional {
        function: String,
        allowed_roles: Vec<String>,
    },
    /// Object-level permission.
    Object(Permission),
}

impl Requirement {
    pub fn scope(scope: impl Into<String>) -> Self {
        Requirement::Scope(scope.into())
    }

    pub fn any_scope<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Requirement::AnyScope(scopes.into_iter().map(Into::into).collect())
    }

    pub fn functional<I, S>(function: impl Into<String>, allowed_roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Requirement::Functional {
            function: function.into(),
            allowed_roles: allowed_roles.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::Scope(scope) => write!(f, "scope {scope}"),
            Requirement::AnyScope(scopes) => write!(f, "any scope of [{}]", scopes.join(", ")),
            Requirement::Functional { function, .. } => write!(f, "function {function}"),
            Requirement::Object(permission) => write!(f, "permission {permission}"),
        }
    }
}

/// Which rule granted access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "policy", content = "detail", rename_all = "snake_case")]
pub enum MatchedPolicy {
    /// Exact tuple in the token's permissions.
    Direct,
    /// `*` resource id with the same level, or wildcard admin on the type.
    Wildcard,
    /// Static role table; carries the granting role.
    Role(String),
    /// Caller owns the resource.
    Ownership,
    /// Scope membership; carries the matching scope.
    Scope(String),
    /// Function and role both present.
    Functional,
    /// Empty requirement list.
    NoRequirements,
}

/// Outcome of one `authorize` call. A denial always carries a reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthDecision {
    pub allowed: bool,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_policy: Option<MatchedPolicy>,
}

impl AuthDecision {
    pub fn allow(policy: MatchedPolicy, reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
            matched_policy: Some(policy),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            allowed: false,
            reason: if reason.is_empty() {
                "access denied".to_string()
            } else {
                reason
            },
            matched_policy: None,
        }
    }
}
