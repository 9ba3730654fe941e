//! The authentication and authorization engine.
//!
//! `AuthEngine` owns the JWKS cache, the validation pipeline and the rate
//! limiter, and is the one entry point the HTTP layer talks to.

use crate::auth::claims::TokenClaims;
use crate::auth::jwks::{HttpJwksFetcher, JwksCache, JwksCacheSettings, JwksFetcher};
use crate::auth::provider::ProviderResolver;
use crate::auth::validator::{extract_bearer, TokenValidator, ValidatedToken};
use crate::authz::policy;
use crate::authz::requirement::{AuthDecision, Requirement};
use crate::config::{Config, Provider};
use crate::errors::GuardError;
use crate::observability::metrics;
use crate::rate_limit::RateLimiter;
use std::sync::Arc;
use tracing::instrument;

/// Token validation, access decisions and rate limiting behind one handle.
pub struct AuthEngine {
    validator: TokenValidator,
    cache: Arc<JwksCache>,
    limiter: Arc<RateLimiter>,
}

impl AuthEngine {
    /// Build an engine that fetches JWKS documents over HTTPS.
    pub fn from_config(config: &Config) -> Self {
        let fetcher = Arc::new(HttpJwksFetcher::new(config.jwks_fetch_timeout));
        Self::new(config, fetcher)
    }

    /// Build an engine around an arbitrary fetcher.
    pub fn new(config: &Config, fetcher: Arc<dyn JwksFetcher>) -> Self {
        let cache = Arc::new(JwksCache::new(
            config.trust_sources.clone(),
            fetcher,
            JwksCacheSettings {
                ttl: config.jwks_cache_ttl,
                fetch_timeout: config.jwks_fetch_timeout,
                min_forced_refresh: config.jwks_min_forced_refresh,
            },
        ));

        let validator = TokenValidator::new(
            ProviderResolver::new(config.trust_sources.clone()),
            Arc::clone(&cache),
            config.clock_skew,
            config.jwks_retry_unknown_kid,
        );

        let limiter = Arc::new(RateLimiter::new(
            config.rate_limit_window,
            config.rate_limit_max_requests,
        ));

        Self {
            validator,
            cache,
            limiter,
        }
    }

    pub fn cache(&self) -> &Arc<JwksCache> {
        &self.cache
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn resolver(&self) -> &ProviderResolver {
        self.validator.resolver()
    }

    /// Fetch every configured source once; failures are logged, not fatal.
    pub async fn warm_up(&self) {
        self.cache.warm_up().await;
    }

    /// Validate the bearer token in an `Authorization` header value.
    ///
    /// `provider_hint` pins the trust source; without it the source is
    /// picked from the unverified issuer.
    #[instrument(skip_all, fields(provider_hint = ?provider_hint))]
    pub async fn validate_request(
        &self,
        authorization_header: Option<&str>,
        provider_hint: Option<Provider>,
    ) -> Result<ValidatedToken, GuardError> {
        let label = provider_hint.map_or("auto", |p| p.as_str());

        let result = match extract_bearer(authorization_header) {
            Ok(token) => self.validator.validate(token, provider_hint).await,
            Err(e) => Err(e),
        };

        match &result {
            Ok(validated) => {
                metrics::record_token_validation(validated.provider.as_str(), "success");
            }
            Err(e) => {
                tracing::debug!(target: "guard.engine", error = %e, "Token rejected");
                metrics::record_token_validation(label, e.kind());
            }
        }
        result
    }

    /// Evaluate `requirements` (AND) against validated claims.
    pub fn authorize(&self, claims: &TokenClaims, requirements: &[Requirement]) -> AuthDecision {
        let decision = policy::authorize(claims, requirements);
        metrics::record_authz_decision(decision.allowed);
        decision
    }

    /// Count one request for `client_key`; `false` means over the limit.
    pub fn rate_check(&self, client_key: &str) -> bool {
        self.limiter.allow(client_key)
    }

    /// Post-authentication limit for a validated caller.
    ///
    /// Keys by `client_id` when the token carries one, otherwise by
    /// `ip_key`. A `None` IP key means the caller's IP was already counted
    /// for this request, so nothing is counted twice.
    pub fn rate_check_client(
        &self,
        claims: &TokenClaims,
        ip_key: Option<&str>,
    ) -> Result<(), GuardError> {
        let client_key = claims.rate_key();
        let Some(key) = client_key.as_deref().or(ip_key) else {
            return Ok(());
        };
        if !self.rate_check(key) {
            metrics::record_rate_limit_rejection("post_auth");
            return Err(GuardError::RateLimited);
        }
        Ok(())
    }
}
