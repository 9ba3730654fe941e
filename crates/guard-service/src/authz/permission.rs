//! Object-level permission vocabulary.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Resource id that matches every resource of a type.
pub const WILDCARD: &str = "*";

/// Kinds of protected resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Account,
    Transaction,
    Customer,
    Loan,
    Card,
    Document,
    Report,
    User,
    System,
}

impl ResourceType {
    pub const ALL: [ResourceType; 9] = [
        ResourceType::Account,
        ResourceType::Transaction,
        ResourceType::Customer,
        ResourceType::Loan,
        ResourceType::Card,
        ResourceType::Document,
        ResourceType::Report,
        ResourceType::User,
        ResourceType::System,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Account => "account",
            ResourceType::Transaction => "transaction",
            ResourceType::Customer => "customer",
            ResourceType::Loan => "loan",
            ResourceType::Card => "card",
            ResourceType::Document => "document",
            ResourceType::Report => "report",
            ResourceType::User => "user",
            ResourceType::System => "system",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == value)
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Access levels, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Read,
    Write,
    Delete,
    Admin,
}

impl AccessLevel {
    pub const ALL: [AccessLevel; 4] = [
        AccessLevel::Read,
        AccessLevel::Write,
        AccessLevel::Delete,
        AccessLevel::Admin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::Read => "read",
            AccessLevel::Write => "write",
            AccessLevel::Delete => "delete",
            AccessLevel::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.as_str() == value)
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `(resource_type, resource_id, access_level)` tuple, rendered as
/// `type:id:level`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permission {
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub access_level: AccessLevel,
}

impl Permission {
    pub fn new(
        resource_type: ResourceType,
        resource_id: impl Into<String>,
        access_level: AccessLevel,
    ) -> Self {
        Self {
            resource_type,
            resource_id: resource_id.into(),
            access_level,
        }
    }

    /// Parse the compact `type:id:level` form. Exactly three parts are
    /// required and the id must be non-empty.
    pub fn parse(value: &str) -> Option<Self> {
        let mut parts = value.split(':');
        let (Some(resource_type), Some(resource_id), Some(access_level), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return None;
        };
        if resource_id.is_empty() {
            return None;
        }
        Some(Self::new(
            ResourceType::parse(resource_type)?,
            resource_id,
            AccessLevel::parse(access_level)?,
        ))
    }

    pub fn is_wildcard(&self) -> bool {
        self.resource_id == WILDCARD
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.resource_type, self.resource_id, self.access_level
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_parse_and_render() {
        let permission = Permission::parse("account:12345:read").unwrap();
        assert_eq!(permission.resource_type, ResourceType::Account);
        assert_eq!(permission.resource_id, "12345");
        assert_eq!(permission.access_level, AccessLevel::Read);
        assert_eq!(permission.to_string(), "account:12345:read");
    }

    #[test]
    fn test_permission_parse_rejects_bad_shapes() {
        assert!(Permission::parse("account:12345").is_none());
        assert!(Permission::parse("account:1:2:read").is_none());
        assert!(Permission::parse("spaceship:1:read").is_none());
        assert!(Permission::parse("account:1:launch").is_none());
        assert!(Permission::parse("account::read").is_none());
        assert!(Permission::parse("").is_none());
    }

    #[test]
    fn test_wildcard() {
        assert!(Permission::parse("card:*:admin").unwrap().is_wildcard());
        assert!(!Permission::parse("card:77:admin").unwrap().is_wildcard());
    }

    #[test]
    fn test_serde_uses_lowercase_names() {
        let permission = Permission::new(ResourceType::Loan, "L-1", AccessLevel::Delete);
        let json = serde_json::to_value(&permission).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"resource_type": "loan", "resource_id": "L-1", "access_level": "delete"})
        );
    }
}
