//! Builder patterns for test data construction
//!
//! Provides a fluent API for the claims of test tokens. Defaults describe a
//! token the default test server accepts: issuer `https://idpA`, audience
//! `TSIAM`, five minutes of validity.

use chrono::{Duration, Utc};
use serde_json::{json, Map, Value};

/// Default issuer of test tokens.
pub const TEST_ISSUER: &str = "https://idpA";

/// Default audience of test tokens.
pub const TEST_AUDIENCE: &str = "TSIAM";

/// Builder for creating test JWT claims
///
/// # Example
/// ```rust,ignore
/// let claims = TestTokenBuilder::new()
///     .subject("alice")
///     .scopes(&["TSIAM-Read"])
///     .roles(&["teller"])
///     .expires_in(300)
///     .build();
/// ```
pub struct TestTokenBuilder {
    claims: Map<String, Value>,
}

impl TestTokenBuilder {
    /// Create a new token builder with defaults
    pub fn new() -> Self {
        let now = Utc::now();
        let mut claims = Map::new();
        claims.insert("sub".to_string(), json!("test-subject"));
        claims.insert("iss".to_string(), json!(TEST_ISSUER));
        claims.insert("aud".to_string(), json!(TEST_AUDIENCE));
        claims.insert("iat".to_string(), json!(now.timestamp()));
        claims.insert(
            "exp".to_string(),
            json!((now + Duration::seconds(300)).timestamp()),
        );
        claims.insert("scope".to_string(), json!([]));
        Self { claims }
    }

    pub fn subject(self, sub: &str) -> Self {
        self.claim("sub", json!(sub))
    }

    pub fn issuer(self, iss: &str) -> Self {
        self.claim("iss", json!(iss))
    }

    pub fn audience(self, aud: &str) -> Self {
        self.claim("aud", json!(aud))
    }

    pub fn client_id(self, client_id: &str) -> Self {
        self.claim("client_id", json!(client_id))
    }

    pub fn scopes(self, scopes: &[&str]) -> Self {
        self.claim("scope", json!(scopes))
    }

    pub fn roles(self, roles: &[&str]) -> Self {
        self.claim("roles", json!(roles))
    }

    pub fn functional_permissions(self, functions: &[&str]) -> Self {
        self.claim("functional_permissions", json!(functions))
    }

    /// Legacy `type:id:level` permission strings.
    pub fn permissions(self, permissions: &[&str]) -> Self {
        self.claim("permissions", json!(permissions))
    }

    /// Set expiration in seconds from now (negative for an expired token)
    pub fn expires_in(self, seconds: i64) -> Self {
        self.claim("exp", json!((Utc::now() + Duration::seconds(seconds)).timestamp()))
    }

    /// Set an arbitrary claim, replacing any previous value.
    pub fn claim(mut self, name: &str, value: Value) -> Self {
        self.claims.insert(name.to_string(), value);
        self
    }

    /// Remove a claim entirely.
    pub fn without(mut self, name: &str) -> Self {
        self.claims.remove(name);
        self
    }

    /// Build the claims as a JSON value
    pub fn build(self) -> Value {
        Value::Object(self.claims)
    }
}

impl Default for TestTokenBuilder {
    fn default() -> Self {
        Self::new()
    }
}
