//! COP Guard configuration.
//!
//! Configuration is loaded from environment variables and validated eagerly.
//! Nothing here is secret (JWKS documents are public), so Debug output is
//! printed as-is at startup.

use common::jwt::{is_allowed_algorithm, DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use jsonwebtoken::Algorithm;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default server bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default audience every trust source expects.
pub const DEFAULT_AUDIENCE: &str = "TSIAM";

/// Default client id registered with the Apigee proxy.
pub const DEFAULT_APIGEE_CLIENT_ID: &str = "EBSSH";

/// Default JWKS cache TTL in seconds (15 minutes).
pub const DEFAULT_JWKS_CACHE_TTL_SECONDS: u64 = 900;

/// Default background JWKS refresh interval in seconds (10 minutes).
pub const DEFAULT_JWKS_REFRESH_INTERVAL_SECONDS: u64 = 600;

/// Default JWKS fetch timeout in seconds.
pub const DEFAULT_JWKS_FETCH_TIMEOUT_SECONDS: u64 = 10;

/// Maximum JWKS fetch timeout in seconds.
pub const MAX_JWKS_FETCH_TIMEOUT_SECONDS: u64 = 60;

/// Default minimum spacing between forced JWKS refreshes per source.
pub const DEFAULT_JWKS_MIN_FORCED_REFRESH_SECONDS: u64 = 5;

/// Default rate-limit window in seconds.
pub const DEFAULT_RATE_LIMIT_WINDOW_SECONDS: u64 = 60;

/// Default requests allowed per client per window.
pub const DEFAULT_RATE_LIMIT_MAX_REQUESTS: u32 = 100;

/// Identity provider families the gateway knows how to trust.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    /// Apigee API-management issuer.
    Apigee,
    /// PingFederate federation issuer.
    PingFederate,
}

impl Provider {
    /// Every provider, in auto-detect order.
    pub const ALL: [Provider; 2] = [Provider::Apigee, Provider::PingFederate];

    /// Short name used in routes, logs and metrics labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Apigee => "apigee",
            Provider::PingFederate => "pingfed",
        }
    }

    /// Parse a provider name as it appears in a route or header.
    ///
    /// Case-insensitive; accepts `pingfederate` as an alias for `pingfed`.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "apigee" => Some(Provider::Apigee),
            "pingfed" | "pingfederate" => Some(Provider::PingFederate),
            _ => None,
        }
    }

    fn env_prefix(&self) -> &'static str {
        match self {
            Provider::Apigee => "APIGEE",
            Provider::PingFederate => "PINGFED",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One external issuer configuration. Immutable after load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustSource {
    /// Provider family.
    pub provider: Provider,

    /// Display name (same as `provider.as_str()` for configured sources).
    pub name: String,

    /// JWKS endpoint.
    pub jwks_url: String,

    /// Accepted `iss` values, in configuration order.
    pub expected_issuers: Vec<String>,

    /// Audience that must appear in `aud`.
    pub expected_audience: String,

    /// Client id this gateway is registered under at the provider.
    pub client_id: Option<String>,

    /// Signature algorithms accepted from this source. Always a subset of
    /// the fixed allowlist.
    pub algorithms: Vec<Algorithm>,
}

impl TrustSource {
    /// Whether `iss` exactly matches one of this source's issuers.
    pub fn accepts_issuer(&self, iss: &str) -> bool {
        self.expected_issuers.iter().any(|expected| expected == iss)
    }
}

/// COP Guard configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Configured trust sources, in auto-detect order.
    pub trust_sources: Vec<TrustSource>,

    /// Symmetric clock skew for exp/nbf/iat checks.
    pub clock_skew: Duration,

    /// How long a fetched key set is considered fresh.
    pub jwks_cache_ttl: Duration,

    /// Background refresh period.
    pub jwks_refresh_interval: Duration,

    /// Bound on a single JWKS fetch.
    pub jwks_fetch_timeout: Duration,

    /// Minimum spacing between forced refreshes of one source.
    pub jwks_min_forced_refresh: Duration,

    /// Whether an unknown `kid` triggers one forced refresh per request.
    pub jwks_retry_unknown_kid: bool,

    /// Rate-limit window length.
    pub rate_limit_window: Duration,

    /// Requests allowed per client per window.
    pub rate_limit_max_requests: u32,

    /// Require HTTPS and a forwarded client certificate.
    pub require_mtls: bool,

    /// Emit JSON logs instead of text.
    pub log_json: bool,

    /// Graceful-shutdown drain period.
    pub drain_period: Duration,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("No trust source configured: set APIGEE_JWKS_URL/APIGEE_ISSUERS or PINGFED_JWKS_URL/PINGFED_ISSUERS")]
    NoTrustSource,

    #[error("Incomplete trust source configuration: {0}")]
    IncompleteTrustSource(String),

    #[error("Invalid JWKS URL: {0}")]
    InvalidJwksUrl(String),

    #[error("Invalid algorithm configuration: {0}")]
    InvalidAlgorithm(String),

    #[error("Invalid JWT clock skew configuration: {0}")]
    InvalidJwtClockSkew(String),

    #[error("Invalid duration configuration: {0}")]
    InvalidDuration(String),

    #[error("Invalid rate limit configuration: {0}")]
    InvalidRateLimit(String),

    #[error("Invalid boolean configuration: {0}")]
    InvalidBool(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let expected_audience = vars
            .get("EXPECTED_AUDIENCE")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_AUDIENCE.to_string());

        let mut trust_sources = Vec::new();
        for provider in Provider::ALL {
            if let Some(source) = parse_trust_source(vars, provider, &expected_audience)? {
                trust_sources.push(source);
            }
        }
        if trust_sources.is_empty() {
            return Err(ConfigError::NoTrustSource);
        }

        // Parse JWT clock skew tolerance with validation
        let clock_skew = if let Some(value_str) = vars.get("JWT_CLOCK_SKEW_SECONDS") {
            let value: u64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must be a valid positive integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value == 0 {
                return Err(ConfigError::InvalidJwtClockSkew(
                    "JWT_CLOCK_SKEW_SECONDS must be positive, got 0".to_string(),
                ));
            }

            if value > MAX_CLOCK_SKEW.as_secs() {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must not exceed {} seconds, got {}",
                    MAX_CLOCK_SKEW.as_secs(),
                    value
                )));
            }

            Duration::from_secs(value)
        } else {
            DEFAULT_CLOCK_SKEW
        };

        let jwks_cache_ttl = parse_positive_secs(
            vars,
            "JWKS_CACHE_TTL_SECONDS",
            DEFAULT_JWKS_CACHE_TTL_SECONDS,
        )?;
        let jwks_refresh_interval = parse_positive_secs(
            vars,
            "JWKS_REFRESH_INTERVAL_SECONDS",
            DEFAULT_JWKS_REFRESH_INTERVAL_SECONDS,
        )?;
        let jwks_fetch_timeout = parse_positive_secs(
            vars,
            "JWKS_FETCH_TIMEOUT_SECONDS",
            DEFAULT_JWKS_FETCH_TIMEOUT_SECONDS,
        )?;
        if jwks_fetch_timeout.as_secs() > MAX_JWKS_FETCH_TIMEOUT_SECONDS {
            return Err(ConfigError::InvalidDuration(format!(
                "JWKS_FETCH_TIMEOUT_SECONDS must not exceed {} seconds, got {}",
                MAX_JWKS_FETCH_TIMEOUT_SECONDS,
                jwks_fetch_timeout.as_secs()
            )));
        }
        let jwks_min_forced_refresh = parse_secs(
            vars,
            "JWKS_MIN_FORCED_REFRESH_SECONDS",
            DEFAULT_JWKS_MIN_FORCED_REFRESH_SECONDS,
        )?;
        let jwks_retry_unknown_kid = parse_bool(vars, "JWKS_RETRY_UNKNOWN_KID", true)?;

        let rate_limit_window = parse_positive_secs(
            vars,
            "RATE_LIMIT_WINDOW_SECONDS",
            DEFAULT_RATE_LIMIT_WINDOW_SECONDS,
        )?;

        // Parse rate limit with validation
        let rate_limit_max_requests = if let Some(value_str) = vars.get("RATE_LIMIT_MAX_REQUESTS")
        {
            let value: u32 = value_str.parse().map_err(|e| {
                ConfigError::InvalidRateLimit(format!(
                    "RATE_LIMIT_MAX_REQUESTS must be a valid positive integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value == 0 {
                return Err(ConfigError::InvalidRateLimit(
                    "RATE_LIMIT_MAX_REQUESTS must be greater than 0".to_string(),
                ));
            }

            value
        } else {
            DEFAULT_RATE_LIMIT_MAX_REQUESTS
        };

        let require_mtls = parse_bool(vars, "REQUIRE_MTLS", false)?;

        let log_json = vars
            .get("LOG_FORMAT")
            .is_some_and(|format| format.eq_ignore_ascii_case("json"));

        // Unparseable drain values fall back to no drain
        let drain_period = Duration::from_secs(
            vars.get("GUARD_DRAIN_SECONDS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
        );

        Ok(Config {
            bind_address,
            trust_sources,
            clock_skew,
            jwks_cache_ttl,
            jwks_refresh_interval,
            jwks_fetch_timeout,
            jwks_min_forced_refresh,
            jwks_retry_unknown_kid,
            rate_limit_window,
            rate_limit_max_requests,
            require_mtls,
            log_json,
            drain_period,
        })
    }

    /// Look up the trust source configured for `provider`.
    pub fn trust_source(&self, provider: Provider) -> Option<&TrustSource> {
        self.trust_sources.iter().find(|s| s.provider == provider)
    }
}

fn parse_trust_source(
    vars: &HashMap<String, String>,
    provider: Provider,
    expected_audience: &str,
) -> Result<Option<TrustSource>, ConfigError> {
    let prefix = provider.env_prefix();
    let url_var = format!("{prefix}_JWKS_URL");
    let issuers_var = format!("{prefix}_ISSUERS");

    let jwks_url = non_empty(vars, &url_var);
    let issuers: Vec<String> = non_empty(vars, &issuers_var)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let jwks_url = match (jwks_url, issuers.is_empty()) {
        (None, true) => return Ok(None),
        (Some(url), false) => url,
        (None, false) => {
            return Err(ConfigError::IncompleteTrustSource(format!(
                "{issuers_var} is set but {url_var} is missing"
            )))
        }
        (Some(_), true) => {
            return Err(ConfigError::IncompleteTrustSource(format!(
                "{url_var} is set but {issuers_var} is missing"
            )))
        }
    };

    validate_jwks_url(&url_var, &jwks_url)?;

    let client_id = non_empty(vars, &format!("{prefix}_CLIENT_ID")).or_else(|| match provider {
        Provider::Apigee => Some(DEFAULT_APIGEE_CLIENT_ID.to_string()),
        Provider::PingFederate => None,
    });

    let algorithms_var = format!("{prefix}_ALGORITHMS");
    let algorithms = match non_empty(vars, &algorithms_var) {
        Some(raw) => parse_algorithms(&algorithms_var, &raw)?,
        None => vec![Algorithm::RS256],
    };

    Ok(Some(TrustSource {
        provider,
        name: provider.as_str().to_string(),
        jwks_url,
        expected_issuers: issuers,
        expected_audience: expected_audience.to_string(),
        client_id,
        algorithms,
    }))
}

/// JWKS URLs must be HTTPS; plain HTTP is tolerated only for loopback hosts.
fn validate_jwks_url(var: &str, url: &str) -> Result<(), ConfigError> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| ConfigError::InvalidJwksUrl(format!("{var} is not a valid URL: {e}")))?;

    match parsed.scheme() {
        "https" => Ok(()),
        "http" => {
            let loopback = parsed.host_str().is_some_and(|host| {
                host == "localhost"
                    || host
                        .trim_start_matches('[')
                        .trim_end_matches(']')
                        .parse::<IpAddr>()
                        .is_ok_and(|ip| ip.is_loopback())
            });
            if loopback {
                Ok(())
            } else {
                Err(ConfigError::InvalidJwksUrl(format!(
                    "{var} must use https, got '{url}'"
                )))
            }
        }
        other => Err(ConfigError::InvalidJwksUrl(format!(
            "{var} has unsupported scheme '{other}'"
        ))),
    }
}

fn parse_algorithms(var: &str, raw: &str) -> Result<Vec<Algorithm>, ConfigError> {
    let mut algorithms = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !is_allowed_algorithm(name) {
            return Err(ConfigError::InvalidAlgorithm(format!(
                "{var} contains '{name}', which is not an accepted signature algorithm"
            )));
        }
        let algorithm = Algorithm::from_str(name).map_err(|e| {
            ConfigError::InvalidAlgorithm(format!("{var} contains '{name}': {e}"))
        })?;
        if !algorithms.contains(&algorithm) {
            algorithms.push(algorithm);
        }
    }
    if algorithms.is_empty() {
        return Err(ConfigError::InvalidAlgorithm(format!(
            "{var} must name at least one algorithm"
        )));
    }
    Ok(algorithms)
}

fn non_empty(vars: &HashMap<String, String>, name: &str) -> Option<String> {
    vars.get(name)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn parse_secs(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
) -> Result<Duration, ConfigError> {
    match vars.get(name) {
        Some(value_str) => value_str.trim().parse::<u64>().map(Duration::from_secs).map_err(|e| {
            ConfigError::InvalidDuration(format!(
                "{name} must be a valid non-negative integer, got '{value_str}': {e}"
            ))
        }),
        None => Ok(Duration::from_secs(default)),
    }
}

fn parse_positive_secs(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
) -> Result<Duration, ConfigError> {
    let value = parse_secs(vars, name, default)?;
    if value.is_zero() {
        return Err(ConfigError::InvalidDuration(format!(
            "{name} must be greater than 0"
        )));
    }
    Ok(value)
}

fn parse_bool(
    vars: &HashMap<String, String>,
    name: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    match vars.get(name).map(|s| s.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(value) => match value.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidBool(format!(
                "{name} must be true or false, got '{value}'"
            ))),
        },
    }
}
