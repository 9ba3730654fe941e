//! Claims validation and the normalised claims type.
//!
//! Runs only on a payload whose signature has already verified. Produces a
//! `TokenClaims` or the first failing check. The `sub` field is redacted in
//! Debug output to prevent exposure in logs.

use crate::authz::permission::{AccessLevel, Permission, ResourceType};
use crate::config::TrustSource;
use crate::errors::GuardError;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

/// Claims consumed by the validator itself; everything else lands in `extra`.
const REGISTERED_CLAIMS: &[&str] = &[
    "sub",
    "iss",
    "aud",
    "exp",
    "iat",
    "nbf",
    "jti",
    "client_id",
    "scope",
    "roles",
    "functional_permissions",
    "resource_permissions",
    "permissions",
];

/// Validated, normalised token claims. Immutable once built.
#[derive(Clone, Serialize)]
pub struct TokenClaims {
    /// Subject - redacted in Debug output.
    pub sub: String,
    pub iss: String,
    /// Audiences, normalised to a sequence.
    pub aud: Vec<String>,
    pub exp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Scopes in token order. A scope repeated in the token is kept once,
    /// at its first position.
    pub scope: Vec<String>,
    pub roles: BTreeSet<String>,
    pub functional_permissions: BTreeSet<String>,
    /// Structured and legacy string permissions, merged.
    pub resource_permissions: Vec<Permission>,
    /// Unregistered claims, passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Custom Debug implementation that redacts the `sub` field.
impl fmt::Debug for TokenClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenClaims")
            .field("sub", &"[REDACTED]")
            .field("iss", &self.iss)
            .field("aud", &self.aud)
            .field("exp", &self.exp)
            .field("iat", &self.iat)
            .field("nbf", &self.nbf)
            .field("jti", &self.jti)
            .field("client_id", &self.client_id)
            .field("scope", &self.scope)
            .field("roles", &self.roles)
            .field("functional_permissions", &self.functional_permissions)
            .field("resource_permissions", &self.resource_permissions)
            .field("extra_claims", &self.extra.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TokenClaims {
    /// Exact scope membership.
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scope.iter().any(|s| s == scope)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// Rate-limit identity from the token's `client_id`.
    ///
    /// `None` when the claim is absent; callers then key by caller IP.
    pub fn rate_key(&self) -> Option<String> {
        self.client_id.as_ref().map(|id| format!("client:{id}"))
    }

    /// Ids listed in an ownership claim such as `accounts`.
    ///
    /// Non-list claims yield nothing; numeric ids are compared as strings.
    pub fn owned_ids(&self, claim: &str) -> Vec<String> {
        match self.extra.get(claim) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Legacy `type:id:level` rendering of every permission.
    pub fn permission_strings(&self) -> Vec<String> {
        self.resource_permissions
            .iter()
            .map(Permission::to_string)
            .collect()
    }
}

/// Validate a verified payload against `source` at unix time `now`.
///
/// Checks, in order: `exp`, `nbf`, `iat`, `iss`, `aud`, `sub`, then claim
/// shapes. One skew value applies to all three time checks and every
/// boundary is inclusive.
///
/// # Errors
///
/// `Expired`, `NotYetValid`, `WrongIssuer`, `WrongAudience` or `MissingClaim`.
pub fn validate(
    payload: &Map<String, Value>,
    source: &TrustSource,
    skew: Duration,
    now: i64,
) -> Result<TokenClaims, GuardError> {
    let skew = i64::try_from(skew.as_secs()).unwrap_or(i64::MAX);

    let exp = numeric_claim(payload, "exp")?.ok_or_else(|| missing("exp"))?;
    if now > exp.saturating_add(skew) {
        tracing::debug!(target: "guard.auth.claims", exp = exp, now = now, "Token expired");
        return Err(GuardError::Expired);
    }

    let nbf = numeric_claim(payload, "nbf")?;
    if let Some(nbf) = nbf {
        if now < nbf.saturating_sub(skew) {
            tracing::debug!(target: "guard.auth.claims", nbf = nbf, now = now, "Token not yet valid");
            return Err(GuardError::NotYetValid);
        }
    }

    let iat = numeric_claim(payload, "iat")?;
    if let Some(iat) = iat {
        if iat > now.saturating_add(skew) {
            tracing::debug!(
                target: "guard.auth.claims",
                iat = iat,
                now = now,
                "Token iat too far in future"
            );
            return Err(GuardError::NotYetValid);
        }
    }

    let iss = string_claim(payload, "iss")?.ok_or_else(|| missing("iss"))?;
    if !source.accepts_issuer(&iss) {
        tracing::debug!(target: "guard.auth.claims", source = %source.name, iss = %iss, "Issuer mismatch");
        return Err(GuardError::WrongIssuer);
    }

    let aud = match payload.get("aud") {
        None | Some(Value::Null) => return Err(missing("aud")),
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| missing("aud"))?,
        Some(_) => return Err(missing("aud")),
    };
    if !aud.iter().any(|a| *a == source.expected_audience) {
        tracing::debug!(
            target: "guard.auth.claims",
            source = %source.name,
            aud = ?aud,
            expected = %source.expected_audience,
            "Audience mismatch"
        );
        return Err(GuardError::WrongAudience);
    }

    let sub = string_claim(payload, "sub")?
        .filter(|s| !s.is_empty())
        .ok_or_else(|| missing("sub"))?;

    let jti = string_claim(payload, "jti")?;
    let client_id = string_claim(payload, "client_id")?;

    let scope = dedup_ordered(string_list(payload, "scope")?);
    let roles = string_list(payload, "roles")?.into_iter().collect();
    let functional_permissions = string_list(payload, "functional_permissions")?
        .into_iter()
        .collect();

    let mut resource_permissions = structured_permissions(payload)?;
    for permission in legacy_permissions(payload)? {
        if !resource_permissions.contains(&permission) {
            resource_permissions.push(permission);
        }
    }

    let extra = payload
        .iter()
        .filter(|(name, _)| !REGISTERED_CLAIMS.contains(&name.as_str()))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    Ok(TokenClaims {
        sub,
        iss,
        aud,
        exp,
        iat,
        nbf,
        jti,
        client_id,
        scope,
        roles,
        functional_permissions,
        resource_permissions,
        extra,
    })
}

fn missing(claim: &str) -> GuardError {
    GuardError::MissingClaim(claim.to_string())
}

/// Integer or float seconds; absent and `null` are `None`.
fn numeric_claim(payload: &Map<String, Value>, name: &str) -> Result<Option<i64>, GuardError> {
    match payload.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.floor() as i64))
            .map(Some)
            .ok_or_else(|| missing(name)),
        Some(_) => Err(missing(name)),
    }
}

fn string_claim(payload: &Map<String, Value>, name: &str) -> Result<Option<String>, GuardError> {
    match payload.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(missing(name)),
    }
}

/// A space-delimited string or an array of strings. Absent is empty.
fn string_list(payload: &Map<String, Value>, name: &str) -> Result<Vec<String>, GuardError> {
    match payload.get(name) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(s)) => Ok(s.split_whitespace().map(str::to_string).collect()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| missing(name)),
        Some(_) => Err(missing(name)),
    }
}

fn dedup_ordered(values: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    values
        .into_iter()
        .filter(|v| seen.insert(v.clone()))
        .collect()
}

/// `resource_permissions`: array of `{resource_type, resource_id, access_level}`.
fn structured_permissions(payload: &Map<String, Value>) -> Result<Vec<Permission>, GuardError> {
    let entries = match payload.get("resource_permissions") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(entries)) => entries,
        Some(_) => return Err(missing("resource_permissions")),
    };

    let mut permissions = Vec::with_capacity(entries.len());
    for entry in entries {
        let parsed = entry.as_object().and_then(|object| {
            let resource_type = ResourceType::parse(object.get("resource_type")?.as_str()?)?;
            let resource_id = match object.get("resource_id")? {
                Value::String(s) if !s.is_empty() => s.clone(),
                Value::Number(n) => n.to_string(),
                _ => return None,
            };
            let access_level = AccessLevel::parse(object.get("access_level")?.as_str()?)?;
            Some(Permission::new(resource_type, resource_id, access_level))
        });

        match parsed {
            Some(permission) => permissions.push(permission),
            None => {
                tracing::warn!(
                    target: "guard.auth.claims",
                    entry = %entry,
                    "Skipping malformed resource permission"
                );
            }
        }
    }
    Ok(permissions)
}

/// `permissions`: array of `type:id:level` strings.
fn legacy_permissions(payload: &Map<String, Value>) -> Result<Vec<Permission>, GuardError> {
    let entries = match payload.get("permissions") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(entries)) => entries,
        Some(_) => return Err(missing("permissions")),
    };

    Ok(entries
        .iter()
        .filter_map(|entry| {
            let parsed = entry.as_str().and_then(Permission::parse);
            if parsed.is_none() {
                tracing::warn!(
                    target: "guard.auth.claims",
                    entry = %entry,
                    "Skipping malformed permission string"
                );
            }
            parsed
        })
        .collect())
}
