//! JWKS cache for the configured trust sources.
//!
//! Fetches each source's JSON Web Key Set, turns the usable keys into
//! verification keys and caches the result with a TTL.
//!
//! # Behaviour
//!
//! - A cached key set within TTL is served with no I/O.
//! - A missing or expired key set is fetched on demand. If that fetch fails
//!   while an expired set exists the request fails with `GuardError::Stale`,
//!   otherwise with `GuardError::Fetch`.
//! - Concurrent fetches for one source share a single in-flight fetch. The
//!   fetch runs on its own task and publishes its result through a watch
//!   channel, so a cancelled request never strands the other waiters.
//! - Key sets are immutable and swapped as a whole (`Arc` pointer swap).
//! - Forced refreshes (unknown `kid`) are throttled per source.
//!
//! # Security
//!
//! - Keys with `use` other than `sig`, without a `kid`, or with unusable
//!   material are skipped with a warning.
//! - A document with zero usable keys never replaces a previous key set.
//! - Verification keys redact their material in Debug output.

use crate::config::{Provider, TrustSource};
use crate::errors::GuardError;
use crate::observability::metrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::Instant;
use tracing::instrument;

/// Key family as given by the JWK `kty` member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum KeyFamily {
    Rsa,
    Ec,
    Okp,
}

impl KeyFamily {
    /// Key family able to verify `algorithm`, or `None` for symmetric algorithms.
    pub fn for_algorithm(algorithm: Algorithm) -> Option<Self> {
        match algorithm {
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => Some(KeyFamily::Rsa),
            Algorithm::ES256 | Algorithm::ES384 => Some(KeyFamily::Ec),
            Algorithm::EdDSA => Some(KeyFamily::Okp),
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => None,
        }
    }

    fn from_kty(kty: &str) -> Option<Self> {
        match kty {
            "RSA" => Some(KeyFamily::Rsa),
            "EC" => Some(KeyFamily::Ec),
            "OKP" => Some(KeyFamily::Okp),
            _ => None,
        }
    }
}

/// Curve an EC algorithm requires.
pub fn curve_for_algorithm(algorithm: Algorithm) -> Option<&'static str> {
    match algorithm {
        Algorithm::ES256 => Some("P-256"),
        Algorithm::ES384 => Some("P-384"),
        _ => None,
    }
}

/// JSON Web Key as published by an identity provider.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key type ("RSA", "EC" or "OKP").
    pub kty: String,

    /// Key ID - used to select the correct key for verification.
    #[serde(default)]
    pub kid: Option<String>,

    /// Key use (must be "sig" when present).
    #[serde(default, rename = "use")]
    pub key_use: Option<String>,

    /// Algorithm the key is pinned to, if any.
    #[serde(default)]
    pub alg: Option<String>,

    /// RSA modulus (base64url).
    #[serde(default)]
    pub n: Option<String>,

    /// RSA public exponent (base64url).
    #[serde(default)]
    pub e: Option<String>,

    /// Curve name for EC and OKP keys.
    #[serde(default)]
    pub crv: Option<String>,

    /// EC x coordinate or OKP public key (base64url).
    #[serde(default)]
    pub x: Option<String>,

    /// EC y coordinate (base64url).
    #[serde(default)]
    pub y: Option<String>,
}

/// Raw JWKS document. Individual keys stay untyped so one bad entry
/// does not reject the whole set.
#[derive(Debug, Clone, Deserialize)]
pub struct JwksDocument {
    pub keys: Vec<serde_json::Value>,
}

/// Public key material ready for signature verification.
#[derive(Clone)]
pub struct VerificationKey {
    pub kid: String,
    pub family: KeyFamily,
    pub curve: Option<String>,
    /// Algorithm the JWK is pinned to.
    pub algorithm: Option<Algorithm>,
    decoding_key: DecodingKey,
}

/// Custom Debug implementation that omits key material.
impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationKey")
            .field("kid", &self.kid)
            .field("family", &self.family)
            .field("curve", &self.curve)
            .field("algorithm", &self.algorithm)
            .field("decoding_key", &"[REDACTED]")
            .finish()
    }
}

impl VerificationKey {
    /// Build a verification key from a JWK.
    ///
    /// Returns a human-readable reason when the key is unusable.
    pub fn from_jwk(jwk: &Jwk) -> Result<Self, String> {
        let kid = jwk
            .kid
            .as_deref()
            .filter(|kid| !kid.is_empty())
            .ok_or_else(|| "missing kid".to_string())?
            .to_string();

        if let Some(key_use) = &jwk.key_use {
            if key_use != "sig" {
                return Err(format!("use is '{key_use}', not 'sig'"));
            }
        }

        let family = KeyFamily::from_kty(&jwk.kty)
            .ok_or_else(|| format!("unsupported kty '{}'", jwk.kty))?;

        let algorithm = match jwk.alg.as_deref() {
            None => None,
            Some(alg) => {
                if !common::jwt::is_allowed_algorithm(alg) {
                    return Err(format!("alg '{alg}' is not an accepted signature algorithm"));
                }
                let algorithm = Algorithm::from_str(alg).map_err(|e| format!("alg '{alg}': {e}"))?;
                if KeyFamily::for_algorithm(algorithm) != Some(family) {
                    return Err(format!("alg '{alg}' does not match kty '{}'", jwk.kty));
                }
                Some(algorithm)
            }
        };

        let missing = |field: &str| format!("missing {field}");

        let decoding_key = match family {
            KeyFamily::Rsa => {
                let n = jwk.n.as_deref().ok_or_else(|| missing("n"))?;
                let e = jwk.e.as_deref().ok_or_else(|| missing("e"))?;
                DecodingKey::from_rsa_components(n, e)
                    .map_err(|err| format!("invalid RSA components: {err}"))?
            }
            KeyFamily::Ec => {
                let crv = jwk.crv.as_deref().ok_or_else(|| missing("crv"))?;
                if crv != "P-256" && crv != "P-384" {
                    return Err(format!("unsupported EC curve '{crv}'"));
                }
                let x = jwk.x.as_deref().ok_or_else(|| missing("x"))?;
                let y = jwk.y.as_deref().ok_or_else(|| missing("y"))?;
                DecodingKey::from_ec_components(x, y)
                    .map_err(|err| format!("invalid EC components: {err}"))?
            }
            KeyFamily::Okp => {
                let crv = jwk.crv.as_deref().unwrap_or("Ed25519");
                if crv != "Ed25519" {
                    return Err(format!("unsupported OKP curve '{crv}'"));
                }
                let x = jwk.x.as_deref().ok_or_else(|| missing("x"))?;
                DecodingKey::from_ed_components(x)
                    .map_err(|err| format!("invalid OKP key: {err}"))?
            }
        };

        Ok(Self {
            kid,
            family,
            curve: jwk.crv.clone(),
            algorithm,
            decoding_key,
        })
    }

    /// Key used by `jsonwebtoken::crypto::verify`.
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }
}

/// Immutable set of verification keys for one trust source.
#[derive(Debug)]
pub struct KeySet {
    source: String,
    keys: HashMap<String, VerificationKey>,
    fetched_at: Instant,
    fetched_at_utc: DateTime<Utc>,
    expires_at: Instant,
}

impl KeySet {
    /// Build a key set from a fetched document, skipping unusable keys.
    ///
    /// # Errors
    ///
    /// Returns `GuardError::Fetch` when no key in the document is usable.
    pub fn from_document(
        source: &str,
        document: JwksDocument,
        ttl: Duration,
    ) -> Result<Self, GuardError> {
        let mut keys = HashMap::new();

        for raw in document.keys {
            let jwk: Jwk = match serde_json::from_value(raw) {
                Ok(jwk) => jwk,
                Err(e) => {
                    tracing::warn!(target: "guard.auth.jwks", source = %source, error = %e, "Skipping unparseable JWK");
                    continue;
                }
            };

            match VerificationKey::from_jwk(&jwk) {
                Ok(key) => {
                    keys.insert(key.kid.clone(), key);
                }
                Err(reason) => {
                    tracing::warn!(
                        target: "guard.auth.jwks",
                        source = %source,
                        kid = ?jwk.kid,
                        reason = %reason,
                        "Skipping unusable JWK"
                    );
                }
            }
        }

        if keys.is_empty() {
            return Err(GuardError::Fetch {
                source_name: source.to_string(),
                reason: "JWKS contains no usable signing keys".to_string(),
            });
        }

        let fetched_at = Instant::now();
        Ok(Self {
            source: source.to_string(),
            keys,
            fetched_at,
            fetched_at_utc: Utc::now(),
            expires_at: fetched_at + ttl,
        })
    }

    /// Look up a key by id.
    ///
    /// # Errors
    ///
    /// Returns `GuardError::UnknownKey` when the id is absent.
    pub fn get(&self, kid: &str) -> Result<&VerificationKey, GuardError> {
        self.keys.get(kid).ok_or_else(|| {
            tracing::debug!(target: "guard.auth.jwks", source = %self.source, kid = %kid, "Key not found in JWKS");
            GuardError::UnknownKey
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Key ids, sorted for stable output.
    pub fn key_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.keys.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at_utc
    }

    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }

    pub fn is_fresh(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Source of JWKS documents.
///
/// The HTTP implementation is used in production; tests substitute
/// counting or failing fetchers.
#[async_trait]
pub trait JwksFetcher: Send + Sync {
    async fn fetch(&self, source: &TrustSource) -> Result<JwksDocument, GuardError>;
}

/// Fetches JWKS documents over HTTPS.
pub struct HttpJwksFetcher {
    http_client: reqwest::Client,
}

impl HttpJwksFetcher {
    pub fn new(timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(target: "guard.auth.jwks", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });

        Self { http_client }
    }
}

#[async_trait]
impl JwksFetcher for HttpJwksFetcher {
    async fn fetch(&self, source: &TrustSource) -> Result<JwksDocument, GuardError> {
        let fail = |reason: String| GuardError::Fetch {
            source_name: source.name.clone(),
            reason,
        };

        tracing::debug!(target: "guard.auth.jwks", source = %source.name, url = %source.jwks_url, "Fetching JWKS");

        let response = self
            .http_client
            .get(&source.jwks_url)
            .send()
            .await
            .map_err(|e| fail(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(fail(format!("JWKS endpoint returned {}", response.status())));
        }

        response
            .json::<JwksDocument>()
            .await
            .map_err(|e| fail(format!("invalid JWKS document: {e}")))
    }
}

type FetchResult = Result<Arc<KeySet>, GuardError>;
type FetchReceiver = watch::Receiver<Option<FetchResult>>;

/// Per-source cache state.
struct SourceSlot {
    source: TrustSource,
    current: RwLock<Option<Arc<KeySet>>>,
    in_flight: Mutex<Option<FetchReceiver>>,
    last_forced: Mutex<Option<Instant>>,
    last_error: RwLock<Option<String>>,
}

impl SourceSlot {
    async fn current(&self) -> Option<Arc<KeySet>> {
        self.current.read().await.clone()
    }
}

/// Cache tuning.
#[derive(Debug, Clone, Copy)]
pub struct JwksCacheSettings {
    pub ttl: Duration,
    pub fetch_timeout: Duration,
    pub min_forced_refresh: Duration,
}

/// Freshness report for one source, as shown by the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub source: String,
    pub cached: bool,
    pub key_count: usize,
    pub key_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetched_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_seconds: Option<u64>,
    pub fresh: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// JWKS cache owning one slot per trust source.
pub struct JwksCache {
    slots: Vec<Arc<SourceSlot>>,
    fetcher: Arc<dyn JwksFetcher>,
    settings: JwksCacheSettings,
}

impl JwksCache {
    /// Create a cache for `sources` (auto-detect order is preserved).
    pub fn new(
        sources: Vec<TrustSource>,
        fetcher: Arc<dyn JwksFetcher>,
        settings: JwksCacheSettings,
    ) -> Self {
        let slots = sources
            .into_iter()
            .map(|source| {
                Arc::new(SourceSlot {
                    source,
                    current: RwLock::new(None),
                    in_flight: Mutex::new(None),
                    last_forced: Mutex::new(None),
                    last_error: RwLock::new(None),
                })
            })
            .collect();

        Self {
            slots,
            fetcher,
            settings,
        }
    }

    fn slot(&self, provider: Provider) -> Result<&Arc<SourceSlot>, GuardError> {
        self.slots
            .iter()
            .find(|slot| slot.source.provider == provider)
            .ok_or_else(|| GuardError::UnknownProvider(provider.as_str().to_string()))
    }

    /// Return the key set for `provider`, fetching when missing or expired.
    ///
    /// # Errors
    ///
    /// - `GuardError::UnknownProvider` if the provider is not configured
    /// - `GuardError::Fetch` if nothing is cached and the fetch fails
    /// - `GuardError::Stale` if the cached set expired and the fetch fails
    #[instrument(skip_all, fields(source = %provider))]
    pub async fn get_keys(&self, provider: Provider) -> Result<Arc<KeySet>, GuardError> {
        let slot = self.slot(provider)?;

        let cached = slot.current().await;
        if let Some(key_set) = &cached {
            if key_set.is_fresh() {
                tracing::trace!(target: "guard.auth.jwks", source = %slot.source.name, "JWKS cache hit");
                return Ok(Arc::clone(key_set));
            }
        }

        match self.fetch_coalesced(slot).await {
            Ok(key_set) => Ok(key_set),
            Err(e) if cached.is_some() => {
                tracing::warn!(
                    target: "guard.auth.jwks",
                    source = %slot.source.name,
                    error = %e,
                    "Cached JWKS expired and refresh failed"
                );
                Err(GuardError::Stale(slot.source.name.clone()))
            }
            Err(e) => Err(e),
        }
    }

    /// Refetch `provider`'s key set after an unknown `kid`.
    ///
    /// Within the minimum forced-refresh interval the current key set is
    /// returned without a fetch.
    #[instrument(skip_all, fields(source = %provider))]
    pub async fn force_refresh(&self, provider: Provider) -> Result<Arc<KeySet>, GuardError> {
        let slot = self.slot(provider)?;

        {
            let mut last_forced = slot.last_forced.lock().await;
            if let Some(at) = *last_forced {
                if at.elapsed() < self.settings.min_forced_refresh {
                    if let Some(key_set) = slot.current().await {
                        tracing::debug!(
                            target: "guard.auth.jwks",
                            source = %slot.source.name,
                            "Forced refresh throttled, reusing current JWKS"
                        );
                        return Ok(key_set);
                    }
                }
            }
            *last_forced = Some(Instant::now());
        }

        self.fetch_coalesced(slot).await
    }

    /// Refetch every source. Failures are logged and keep the previous set.
    ///
    /// Returns the number of sources refreshed successfully.
    pub async fn refresh_all(&self) -> usize {
        let mut refreshed = 0;
        for slot in &self.slots {
            match self.fetch_coalesced(slot).await {
                Ok(_) => refreshed += 1,
                Err(e) => {
                    tracing::warn!(
                        target: "guard.auth.jwks",
                        source = %slot.source.name,
                        error = %e,
                        "Background JWKS refresh failed, keeping previous key set"
                    );
                }
            }
        }
        refreshed
    }

    /// Fetch every source once at startup. Failures are not fatal.
    pub async fn warm_up(&self) {
        let refreshed = self.refresh_all().await;
        tracing::info!(
            target: "guard.auth.jwks",
            refreshed = refreshed,
            sources = self.slots.len(),
            "JWKS warm-up complete"
        );
    }

    /// Per-source freshness, in configuration order.
    pub async fn snapshot(&self) -> Vec<SourceStatus> {
        let mut statuses = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            let current = slot.current().await;
            let last_error = slot.last_error.read().await.clone();
            statuses.push(match current {
                Some(key_set) => SourceStatus {
                    source: slot.source.name.clone(),
                    cached: true,
                    key_count: key_set.len(),
                    key_ids: key_set.key_ids(),
                    fetched_at: Some(key_set.fetched_at()),
                    age_seconds: Some(key_set.age().as_secs()),
                    fresh: key_set.is_fresh(),
                    last_error,
                },
                None => SourceStatus {
                    source: slot.source.name.clone(),
                    cached: false,
                    key_count: 0,
                    key_ids: Vec::new(),
                    fetched_at: None,
                    age_seconds: None,
                    fresh: false,
                    last_error,
                },
            });
        }
        statuses
    }

    /// Join the in-flight fetch for `slot`, starting one if none is running.
    async fn fetch_coalesced(&self, slot: &Arc<SourceSlot>) -> FetchResult {
        let mut receiver = {
            let mut in_flight = slot.in_flight.lock().await;
            match in_flight.as_ref() {
                Some(receiver) => receiver.clone(),
                None => {
                    let (sender, receiver) = watch::channel(None);
                    *in_flight = Some(receiver.clone());
                    tokio::spawn(run_fetch(
                        Arc::clone(slot),
                        Arc::clone(&self.fetcher),
                        self.settings,
                        sender,
                    ));
                    receiver
                }
            }
        };

        let outcome = match receiver.wait_for(Option::is_some).await {
            Ok(published) => published.clone(),
            Err(_) => None,
        };

        outcome.unwrap_or_else(|| {
            Err(GuardError::Fetch {
                source_name: slot.source.name.clone(),
                reason: "fetch task ended without a result".to_string(),
            })
        })
    }
}

/// Body of the shared fetch task: fetch, parse, swap, publish, clear marker.
async fn run_fetch(
    slot: Arc<SourceSlot>,
    fetcher: Arc<dyn JwksFetcher>,
    settings: JwksCacheSettings,
    sender: watch::Sender<Option<FetchResult>>,
) {
    let started = Instant::now();
    let name = slot.source.name.clone();

    let outcome = match tokio::time::timeout(settings.fetch_timeout, fetcher.fetch(&slot.source)).await
    {
        Ok(Ok(document)) => KeySet::from_document(&name, document, settings.ttl).map(Arc::new),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(GuardError::Fetch {
            source_name: name.clone(),
            reason: format!(
                "timed out after {} seconds",
                settings.fetch_timeout.as_secs()
            ),
        }),
    };

    match &outcome {
        Ok(key_set) => {
            *slot.current.write().await = Some(Arc::clone(key_set));
            *slot.last_error.write().await = None;
            tracing::info!(
                target: "guard.auth.jwks",
                source = %name,
                key_count = key_set.len(),
                "JWKS cache refreshed"
            );
            metrics::record_jwks_fetch(&name, "success", started.elapsed());
        }
        Err(e) => {
            *slot.last_error.write().await = Some(e.to_string());
            tracing::error!(target: "guard.auth.jwks", source = %name, error = %e, "Failed to fetch JWKS");
            metrics::record_jwks_fetch(&name, "error", started.elapsed());
        }
    }

    sender.send_replace(Some(outcome));
    slot.in_flight.lock().await.take();
}
