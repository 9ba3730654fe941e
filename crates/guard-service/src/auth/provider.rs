//! Trust-source selection.
//!
//! The unverified `iss` claim only picks which key set to verify against.
//! The claims validator re-checks `iss` against the same source once the
//! signature has verified.

use crate::config::{Provider, TrustSource};
use crate::errors::GuardError;
use serde_json::{Map, Value};

/// Resolves a token to one configured trust source.
#[derive(Debug, Clone)]
pub struct ProviderResolver {
    sources: Vec<TrustSource>,
}

impl ProviderResolver {
    /// `sources` in auto-detect order.
    pub fn new(sources: Vec<TrustSource>) -> Self {
        Self { sources }
    }

    pub fn sources(&self) -> &[TrustSource] {
        &self.sources
    }

    /// Pick the trust source for a token.
    ///
    /// A pinned provider wins unconditionally. Otherwise the unverified `iss`
    /// is matched case-sensitively against each source's issuers in
    /// configuration order and the first match wins.
    ///
    /// # Errors
    ///
    /// `GuardError::UnknownProvider` when the pin is not configured or no
    /// source claims the issuer.
    pub fn resolve(
        &self,
        unverified_payload: &Map<String, Value>,
        pinned: Option<Provider>,
    ) -> Result<&TrustSource, GuardError> {
        if let Some(provider) = pinned {
            return self
                .sources
                .iter()
                .find(|source| source.provider == provider)
                .ok_or_else(|| {
                    tracing::debug!(target: "guard.auth.provider", provider = %provider, "Pinned provider not configured");
                    GuardError::UnknownProvider(provider.as_str().to_string())
                });
        }

        let iss = unverified_payload
            .get("iss")
            .and_then(Value::as_str)
            .ok_or_else(|| GuardError::UnknownProvider("token has no issuer".to_string()))?;

        self.sources
            .iter()
            .find(|source| source.accepts_issuer(iss))
            .ok_or_else(|| {
                tracing::debug!(target: "guard.auth.provider", "No trust source for token issuer");
                GuardError::UnknownProvider("issuer is not trusted".to_string())
            })
    }
}
