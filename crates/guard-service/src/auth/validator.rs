//! Token validation pipeline.
//!
//! Bearer extraction, fixed algorithm allowlist, provider resolution, key
//! lookup, signature verification and claims validation, in that order.
//! The pipeline stops at the first failure and has no side effects other
//! than JWKS cache fills.

use crate::auth::claims::{self, TokenClaims};
use crate::auth::jwks::JwksCache;
use crate::auth::provider::ProviderResolver;
use crate::auth::verifier::{allowed_algorithm, verify};
use crate::config::Provider;
use crate::errors::GuardError;
use chrono::Utc;
use common::jwt::{parse_payload, split_token};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// A token that passed signature and claims validation.
#[derive(Debug, Clone)]
pub struct ValidatedToken {
    pub provider: Provider,
    pub claims: TokenClaims,
}

/// Pull the token out of an `Authorization: Bearer <token>` header value.
///
/// The scheme is matched case-insensitively.
pub fn extract_bearer(authorization: Option<&str>) -> Result<&str, GuardError> {
    let header = authorization.ok_or_else(|| {
        tracing::debug!(target: "guard.auth.validator", "Missing Authorization header");
        GuardError::MissingToken
    })?;

    let (scheme, token) = header.trim().split_once(' ').ok_or_else(|| {
        GuardError::MalformedToken("invalid Authorization header format".to_string())
    })?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        tracing::debug!(target: "guard.auth.validator", "Invalid Authorization header scheme");
        return Err(GuardError::MalformedToken(
            "invalid Authorization header format".to_string(),
        ));
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(GuardError::MissingToken);
    }
    Ok(token)
}

/// Validates bearer tokens against the configured trust sources.
pub struct TokenValidator {
    resolver: ProviderResolver,
    cache: Arc<JwksCache>,
    clock_skew: Duration,
    retry_unknown_kid: bool,
}

impl TokenValidator {
    pub fn new(
        resolver: ProviderResolver,
        cache: Arc<JwksCache>,
        clock_skew: Duration,
        retry_unknown_kid: bool,
    ) -> Self {
        Self {
            resolver,
            cache,
            clock_skew,
            retry_unknown_kid,
        }
    }

    pub fn resolver(&self) -> &ProviderResolver {
        &self.resolver
    }

    /// Validate `token` at the current time.
    #[instrument(skip_all, fields(pinned = ?pinned))]
    pub async fn validate(
        &self,
        token: &str,
        pinned: Option<Provider>,
    ) -> Result<ValidatedToken, GuardError> {
        self.validate_at(token, pinned, Utc::now().timestamp()).await
    }

    /// Validate `token` as of unix time `now`.
    ///
    /// An unknown `kid` triggers at most one forced (throttled) refresh of
    /// the source's key set when retries are enabled.
    pub async fn validate_at(
        &self,
        token: &str,
        pinned: Option<Provider>,
        now: i64,
    ) -> Result<ValidatedToken, GuardError> {
        let parts = split_token(token)?;

        // Fixed allowlist runs before anything reads the payload
        allowed_algorithm(&parts.header.alg)?;

        let unverified = parse_payload(&parts.payload_bytes()?)?;
        let source = self.resolver.resolve(&unverified, pinned)?;

        let key_set = self.cache.get_keys(source.provider).await?;

        let verified = match verify(token, &key_set, &source.algorithms) {
            Err(GuardError::UnknownKey) if self.retry_unknown_kid => {
                tracing::debug!(
                    target: "guard.auth.validator",
                    source = %source.name,
                    "Unknown kid, forcing JWKS refresh"
                );
                let refreshed = self.cache.force_refresh(source.provider).await.map_err(|e| {
                    tracing::warn!(
                        target: "guard.auth.validator",
                        source = %source.name,
                        error = %e,
                        "Forced JWKS refresh failed"
                    );
                    GuardError::UnknownKey
                })?;
                verify(token, &refreshed, &source.algorithms)?
            }
            other => other?,
        };

        let claims = claims::validate(&verified.payload, source, self.clock_skew, now)?;

        tracing::debug!(target: "guard.auth.validator", source = %source.name, "Token validated successfully");
        Ok(ValidatedToken {
            provider: source.provider,
            claims,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::auth::jwks::{JwksCacheSettings, JwksDocument, JwksFetcher};
    use crate::config::TrustSource;
    use async_trait::async_trait;
    use guard_test_utils::crypto_fixtures::TestKeypair;
    use jsonwebtoken::Algorithm;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct StaticFetcher {
        jwks: Mutex<serde_json::Value>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl JwksFetcher for StaticFetcher {
        async fn fetch(&self, _source: &TrustSource) -> Result<JwksDocument, GuardError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let jwks = self.jwks.lock().unwrap().clone();
            Ok(serde_json::from_value(jwks).unwrap())
        }
    }

    fn source() -> TrustSource {
        TrustSource {
            provider: Provider::Apigee,
            name: "apigee".to_string(),
            jwks_url: "https://idpA/jwks".to_string(),
            expected_issuers: vec!["https://idpA".to_string()],
            expected_audience: "TSIAM".to_string(),
            client_id: None,
            algorithms: vec![Algorithm::EdDSA],
        }
    }

    fn validator(keys: &[&TestKeypair], retry: bool) -> (TokenValidator, Arc<StaticFetcher>) {
        let fetcher = Arc::new(StaticFetcher {
            jwks: Mutex::new(json!({"keys": keys.iter().map(|k| k.jwk_json()).collect::<Vec<_>>()})),
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(JwksCache::new(
            vec![source()],
            fetcher.clone(),
            JwksCacheSettings {
                ttl: Duration::from_secs(900),
                fetch_timeout: Duration::from_secs(5),
                min_forced_refresh: Duration::ZERO,
            },
        ));
        (
            TokenValidator::new(
                ProviderResolver::new(vec![source()]),
                cache,
                Duration::from_secs(120),
                retry,
            ),
            fetcher,
        )
    }

    fn claims(now: i64) -> serde_json::Value {
        json!({
            "sub": "alice",
            "iss": "https://idpA",
            "aud": "TSIAM",
            "exp": now + 300,
            "scope": ["TSIAM-Read"],
        })
    }

    #[test]
    fn test_extract_bearer() {
        assert_eq!(extract_bearer(Some("Bearer abc.def.ghi")).unwrap(), "abc.def.ghi");
        assert_eq!(extract_bearer(Some("bearer abc")).unwrap(), "abc");
        assert_eq!(extract_bearer(None).unwrap_err(), GuardError::MissingToken);
        assert_eq!(extract_bearer(Some("Bearer ")).unwrap_err(), GuardError::MissingToken);
        assert!(matches!(
            extract_bearer(Some("Basic dXNlcjpwYXNz")),
            Err(GuardError::MalformedToken(_))
        ));
        assert!(matches!(
            extract_bearer(Some("abc.def.ghi")),
            Err(GuardError::MalformedToken(_))
        ));
    }

    #[tokio::test]
    async fn test_valid_token() {
        let keypair = TestKeypair::new(1, "key-1");
        let (validator, _) = validator(&[&keypair], true);
        let now = 1_700_000_000;

        let validated = validator
            .validate_at(&keypair.sign_token(&claims(now)), None, now)
            .await
            .unwrap();
        assert_eq!(validated.provider, Provider::Apigee);
        assert_eq!(validated.claims.sub, "alice");
        assert_eq!(validated.claims.scope, vec!["TSIAM-Read".to_string()]);
    }

    #[tokio::test]
    async fn test_unsupported_algorithm_rejected_before_provider_resolution() {
        let keypair = TestKeypair::new(1, "key-1");
        let (validator, fetcher) = validator(&[&keypair], true);

        // Issuer nobody trusts: the algorithm check must still win
        let header = base64_json(&json!({"alg": "none", "kid": "key-1"}));
        let payload = base64_json(&json!({"iss": "https://nobody"}));
        let token = format!("{header}.{payload}.");

        let result = validator.validate_at(&token, None, 0).await;
        assert_eq!(
            result.unwrap_err(),
            GuardError::UnsupportedAlgorithm("none".to_string())
        );
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_issuer_is_unknown_provider() {
        let keypair = TestKeypair::new(1, "key-1");
        let (validator, _) = validator(&[&keypair], true);
        let now = 1_700_000_000;
        let mut body = claims(now);
        body["iss"] = json!("https://idpZ");

        let result = validator
            .validate_at(&keypair.sign_token(&body), None, now)
            .await;
        assert!(matches!(result, Err(GuardError::UnknownProvider(_))));
    }

    #[tokio::test]
    async fn test_rotated_key_is_picked_up_by_forced_refresh() {
        let old = TestKeypair::new(1, "key-old");
        let new = TestKeypair::new(2, "key-new");
        let (validator, fetcher) = validator(&[&old], true);
        let now = 1_700_000_000;

        validator
            .validate_at(&old.sign_token(&claims(now)), None, now)
            .await
            .unwrap();

        *fetcher.jwks.lock().unwrap() = json!({"keys": [old.jwk_json(), new.jwk_json()]});

        let validated = validator
            .validate_at(&new.sign_token(&claims(now)), None, now)
            .await
            .unwrap();
        assert_eq!(validated.claims.sub, "alice");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unknown_kid_without_retry() {
        let old = TestKeypair::new(1, "key-old");
        let stranger = TestKeypair::new(2, "key-stranger");
        let (validator, fetcher) = validator(&[&old], false);
        let now = 1_700_000_000;

        let result = validator
            .validate_at(&stranger.sign_token(&claims(now)), None, now)
            .await;
        assert_eq!(result.unwrap_err(), GuardError::UnknownKey);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_token() {
        let keypair = TestKeypair::new(1, "key-1");
        let (validator, _) = validator(&[&keypair], true);
        let now = 1_700_000_000;

        let token = keypair.sign_token(&claims(now));
        // exp = now + 300, skew 120: one second past exp + skew
        let result = validator.validate_at(&token, None, now + 421).await;
        assert_eq!(result.unwrap_err(), GuardError::Expired);

        let at_boundary = validator.validate_at(&token, None, now + 420).await;
        assert!(at_boundary.is_ok());
    }

    fn base64_json(value: &serde_json::Value) -> String {
        use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
        URL_SAFE_NO_PAD.encode(value.to_string())
    }
}
