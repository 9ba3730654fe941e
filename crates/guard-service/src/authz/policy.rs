//! Layered access-control evaluation.
//!
//! Object requirements are checked in a fixed order and the first match
//! wins: direct tuple, wildcard, role table, ownership. Anything else is
//! denied. Scope and functional requirements have their own single rule.

use crate::auth::claims::TokenClaims;
use crate::authz::permission::{AccessLevel, Permission, ResourceType, WILDCARD};
use crate::authz::requirement::{AuthDecision, MatchedPolicy, Requirement};

pub const DENY_SCOPE: &str = "insufficient scope";
pub const DENY_FUNCTION: &str = "insufficient functional permission";
pub const DENY_ROLE_FOR_FUNCTION: &str = "insufficient role for function";

const READ_WRITE: &[AccessLevel] = &[AccessLevel::Read, AccessLevel::Write];
const READ: &[AccessLevel] = &[AccessLevel::Read];

/// Levels the static role table grants `role` on `resource_type`.
pub fn role_grants(role: &str, resource_type: ResourceType) -> &'static [AccessLevel] {
    use ResourceType::*;

    match (role, resource_type) {
        ("admin", _) => &AccessLevel::ALL,
        ("manager", Account | Transaction | Customer | Loan | Card | Document | Report) => {
            READ_WRITE
        }
        ("manager", User) => READ,
        ("teller", Account | Transaction) => READ_WRITE,
        ("teller", Customer | Card) => READ,
        ("customer_service", Account | Transaction | Document) => READ,
        ("customer_service", Customer | Card) => READ_WRITE,
        ("auditor", Account | Transaction | Customer | Loan | Card | Document | Report) => READ,
        _ => &[],
    }
}

/// Every `type:*:level` grant the caller's roles imply, sorted.
pub fn role_permissions(claims: &TokenClaims) -> Vec<String> {
    let mut grants: Vec<Permission> = claims
        .roles
        .iter()
        .flat_map(|role| {
            ResourceType::ALL.into_iter().flat_map(move |resource_type| {
                role_grants(role, resource_type)
                    .iter()
                    .map(move |level| Permission::new(resource_type, WILDCARD, *level))
            })
        })
        .collect();
    grants.sort_by_key(|p| (p.resource_type, p.access_level));
    grants.dedup();
    grants.iter().map(Permission::to_string).collect()
}

/// Claim listing owned ids for a resource type, if ownership applies to it.
fn ownership_claim(resource_type: ResourceType) -> Option<&'static str> {
    match resource_type {
        ResourceType::Account => Some("accounts"),
        ResourceType::Card => Some("cards"),
        ResourceType::Loan => Some("loans"),
        _ => None,
    }
}

/// Whether the caller owns the resource named by `permission`.
///
/// Ownership grants read and write only.
pub fn owns_resource(claims: &TokenClaims, permission: &Permission) -> bool {
    if !matches!(permission.access_level, AccessLevel::Read | AccessLevel::Write) {
        return false;
    }
    if permission.is_wildcard() {
        return false;
    }
    if permission.resource_type == ResourceType::User {
        return permission.resource_id == claims.sub;
    }
    ownership_claim(permission.resource_type).is_some_and(|claim| {
        claims
            .owned_ids(claim)
            .iter()
            .any(|id| *id == permission.resource_id)
    })
}

/// First rule granting `permission`, if any.
pub fn check_permission(claims: &TokenClaims, permission: &Permission) -> Option<MatchedPolicy> {
    if claims.resource_permissions.contains(permission) {
        return Some(MatchedPolicy::Direct);
    }

    let wildcard = claims.resource_permissions.iter().any(|held| {
        held.resource_type == permission.resource_type
            && held.is_wildcard()
            && (held.access_level == permission.access_level
                || held.access_level == AccessLevel::Admin)
    });
    if wildcard {
        return Some(MatchedPolicy::Wildcard);
    }

    if let Some(role) = claims
        .roles
        .iter()
        .find(|role| role_grants(role, permission.resource_type).contains(&permission.access_level))
    {
        return Some(MatchedPolicy::Role(role.clone()));
    }

    if owns_resource(claims, permission) {
        return Some(MatchedPolicy::Ownership);
    }

    None
}

/// Evaluate one requirement.
pub fn evaluate(claims: &TokenClaims, requirement: &Requirement) -> AuthDecision {
    match requirement {
        Requirement::Scope(scope) => {
            if claims.has_scope(scope) {
                AuthDecision::allow(MatchedPolicy::Scope(scope.clone()), format!("scope {scope} present"))
            } else {
                AuthDecision::deny(DENY_SCOPE)
            }
        }
        Requirement::AnyScope(scopes) => match scopes.iter().find(|s| claims.has_scope(s)) {
            Some(scope) => {
                AuthDecision::allow(MatchedPolicy::Scope(scope.clone()), format!("scope {scope} present"))
            }
            None => AuthDecision::deny(DENY_SCOPE),
        },
        Requirement::Functional {
            function,
            allowed_roles,
        } => {
            if !claims.functional_permissions.contains(function) {
                return AuthDecision::deny(DENY_FUNCTION);
            }
            if !allowed_roles.is_empty() && !allowed_roles.iter().any(|r| claims.has_role(r)) {
                return AuthDecision::deny(DENY_ROLE_FOR_FUNCTION);
            }
            AuthDecision::allow(
                MatchedPolicy::Functional,
                format!("function {function} granted"),
            )
        }
        Requirement::Object(permission) => match check_permission(claims, permission) {
            Some(policy) => AuthDecision::allow(policy, format!("permission {permission} granted")),
            None => AuthDecision::deny(format!("no permission for {permission}")),
        },
    }
}

/// Evaluate `requirements` in order (AND). The first failing requirement
/// supplies the denial reason; an empty list is allowed.
pub fn authorize(claims: &TokenClaims, requirements: &[Requirement]) -> AuthDecision {
    let mut last_allowed = None;

    for requirement in requirements {
        let decision = evaluate(claims, requirement);
        if !decision.allowed {
            tracing::info!(
                target: "guard.authz",
                requirement = %requirement,
                reason = %decision.reason,
                "Access denied"
            );
            return decision;
        }
        tracing::debug!(
            target: "guard.authz",
            requirement = %requirement,
            policy = ?decision.matched_policy,
            "Requirement satisfied"
        );
        last_allowed = Some(decision);
    }

    match (requirements.len(), last_allowed) {
        (1, Some(decision)) => decision,
        (_, Some(decision)) => AuthDecision {
            reason: format!("all {} requirements satisfied", requirements.len()),
            ..decision
        },
        (_, None) => AuthDecision::allow(MatchedPolicy::NoRequirements, "no requirements"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn claims() -> TokenClaims {
        TokenClaims {
            sub: "alice".to_string(),
            iss: "https://idpA".to_string(),
            aud: vec!["TSIAM".to_string()],
            exp: 4_000_000_000,
            iat: None,
            nbf: None,
            jti: None,
            client_id: None,
            scope: vec!["TSIAM-Read".to_string()],
            roles: BTreeSet::new(),
            functional_permissions: BTreeSet::new(),
            resource_permissions: Vec::new(),
            extra: serde_json::Map::new(),
        }
    }

    fn with_roles(roles: &[&str]) -> TokenClaims {
        TokenClaims {
            roles: roles.iter().map(|r| r.to_string()).collect(),
            ..claims()
        }
    }

    fn perm(value: &str) -> Permission {
        Permission::parse(value).unwrap()
    }

    #[test]
    fn test_scope_requirement() {
        let claims = claims();
        assert!(authorize(&claims, &[Requirement::scope("TSIAM-Read")]).allowed);

        let denied = authorize(&claims, &[Requirement::scope("TSIAM-Write")]);
        assert!(!denied.allowed);
        assert_eq!(denied.reason, "insufficient scope");
    }

    #[test]
    fn test_any_scope_requirement() {
        let claims = claims();
        let decision = authorize(
            &claims,
            &[Requirement::any_scope(["TSIAM-Write", "TSIAM-Read"])],
        );
        assert!(decision.allowed);
        assert_eq!(
            decision.matched_policy,
            Some(MatchedPolicy::Scope("TSIAM-Read".to_string()))
        );

        assert!(!authorize(&claims, &[Requirement::any_scope(["A", "B"])]).allowed);
    }

    #[test]
    fn test_empty_requirements_allowed() {
        let decision = authorize(&claims(), &[]);
        assert!(decision.allowed);
        assert_eq!(decision.reason, "no requirements");
        assert_eq!(decision.matched_policy, Some(MatchedPolicy::NoRequirements));
    }

    #[test]
    fn test_admin_role_grants_everything() {
        let admin = with_roles(&["admin"]);
        for resource_type in ResourceType::ALL {
            for level in AccessLevel::ALL {
                let permission = Permission::new(resource_type, "any-id", level);
                assert_eq!(
                    check_permission(&admin, &permission),
                    Some(MatchedPolicy::Role("admin".to_string())),
                    "admin should hold {permission}"
                );
            }
        }
    }

    #[test]
    fn test_role_table() {
        let teller = with_roles(&["teller"]);
        assert!(check_permission(&teller, &perm("account:1:write")).is_some());
        assert!(check_permission(&teller, &perm("customer:1:read")).is_some());
        assert!(check_permission(&teller, &perm("customer:1:write")).is_none());
        assert!(check_permission(&teller, &perm("loan:1:read")).is_none());

        let manager = with_roles(&["manager"]);
        assert!(check_permission(&manager, &perm("report:1:write")).is_some());
        assert!(check_permission(&manager, &perm("user:bob:read")).is_some());
        assert!(check_permission(&manager, &perm("user:bob:write")).is_none());
        assert!(check_permission(&manager, &perm("account:1:delete")).is_none());

        let support = with_roles(&["customer_service"]);
        assert!(check_permission(&support, &perm("card:1:write")).is_some());
        assert!(check_permission(&support, &perm("document:1:write")).is_none());

        let auditor = with_roles(&["auditor"]);
        assert!(check_permission(&auditor, &perm("loan:1:read")).is_some());
        assert!(check_permission(&auditor, &perm("loan:1:write")).is_none());
        assert!(check_permission(&auditor, &perm("system:1:read")).is_none());
    }

    #[test]
    fn test_direct_and_wildcard_permissions() {
        let holder = TokenClaims {
            resource_permissions: vec![
                perm("account:12345:read"),
                perm("transaction:*:read"),
                perm("card:*:admin"),
            ],
            ..claims()
        };

        assert_eq!(
            check_permission(&holder, &perm("account:12345:read")),
            Some(MatchedPolicy::Direct)
        );
        assert_eq!(check_permission(&holder, &perm("account:12345:write")), None);
        assert_eq!(check_permission(&holder, &perm("account:999:read")), None);
        assert_eq!(
            check_permission(&holder, &perm("transaction:77:read")),
            Some(MatchedPolicy::Wildcard)
        );
        assert_eq!(check_permission(&holder, &perm("transaction:77:write")), None);
        // Wildcard admin covers every level of the type
        assert_eq!(
            check_permission(&holder, &perm("card:5:delete")),
            Some(MatchedPolicy::Wildcard)
        );
        assert_eq!(check_permission(&holder, &perm("loan:5:read")), None);
    }

    #[test]
    fn test_ownership() {
        let mut owner = claims();
        owner
            .extra
            .insert("accounts".to_string(), serde_json::json!(["A-1"]));
        owner.extra.insert("cards".to_string(), serde_json::json!(["C-9"]));

        assert_eq!(
            check_permission(&owner, &perm("account:A-1:write")),
            Some(MatchedPolicy::Ownership)
        );
        assert_eq!(
            check_permission(&owner, &perm("card:C-9:read")),
            Some(MatchedPolicy::Ownership)
        );
        assert_eq!(check_permission(&owner, &perm("account:A-2:read")), None);
        assert_eq!(check_permission(&owner, &perm("account:A-1:delete")), None);
        assert_eq!(
            check_permission(&owner, &perm("user:alice:read")),
            Some(MatchedPolicy::Ownership)
        );
        assert_eq!(check_permission(&owner, &perm("user:bob:read")), None);
    }

    #[test]
    fn test_object_denial_reason_names_permission() {
        let decision = authorize(
            &claims(),
            &[Requirement::Object(perm("account:12345:write"))],
        );
        assert!(!decision.allowed);
        assert_eq!(decision.reason, "no permission for account:12345:write");
    }

    #[test]
    fn test_functional_requires_function_and_role() {
        let requirement = Requirement::functional("user_management", ["admin", "manager"]);

        let neither = claims();
        assert_eq!(authorize(&neither, &[requirement.clone()]).reason, DENY_FUNCTION);

        let role_only = with_roles(&["manager"]);
        assert_eq!(authorize(&role_only, &[requirement.clone()]).reason, DENY_FUNCTION);

        let function_only = TokenClaims {
            functional_permissions: ["user_management".to_string()].into_iter().collect(),
            ..with_roles(&["teller"])
        };
        assert_eq!(
            authorize(&function_only, &[requirement.clone()]).reason,
            DENY_ROLE_FOR_FUNCTION
        );

        let both = TokenClaims {
            functional_permissions: ["user_management".to_string()].into_iter().collect(),
            ..with_roles(&["manager"])
        };
        let decision = authorize(&both, &[requirement]);
        assert!(decision.allowed);
        assert_eq!(decision.matched_policy, Some(MatchedPolicy::Functional));
    }

    #[test]
    fn test_functional_without_role_list_checks_function_only() {
        let holder = TokenClaims {
            functional_permissions: ["reports".to_string()].into_iter().collect(),
            ..claims()
        };
        let requirement = Requirement::functional("reports", Vec::<String>::new());
        assert!(authorize(&holder, &[requirement]).allowed);
    }

    #[test]
    fn test_first_failing_requirement_supplies_reason() {
        let requirements = [
            Requirement::scope("TSIAM-Read"),
            Requirement::Object(perm("loan:1:read")),
            Requirement::scope("TSIAM-Write"),
        ];
        let decision = authorize(&claims(), &requirements);
        assert!(!decision.allowed);
        assert_eq!(decision.reason, "no permission for loan:1:read");
    }

    #[test]
    fn test_all_requirements_satisfied() {
        let decision = authorize(
            &with_roles(&["auditor"]),
            &[
                Requirement::scope("TSIAM-Read"),
                Requirement::Object(perm("report:q3:read")),
            ],
        );
        assert!(decision.allowed);
        assert_eq!(decision.reason, "all 2 requirements satisfied");
    }

    #[test]
    fn test_role_permissions_listing() {
        let grants = role_permissions(&with_roles(&["teller"]));
        assert_eq!(
            grants,
            vec![
                "account:*:read",
                "account:*:write",
                "transaction:*:read",
                "transaction:*:write",
                "customer:*:read",
                "card:*:read",
            ]
        );
    }
}
