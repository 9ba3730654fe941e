//! Compact JWT parsing shared across COP Guard crates.
//!
//! This module provides the format-level half of token validation:
//! - Size limits for DoS prevention
//! - Clock skew constants
//! - Splitting a compact token into its three segments
//! - JOSE header decoding and the fixed signature-algorithm allowlist
//! - Unverified payload decoding (used only to pick a trust source)
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - Only asymmetric signature algorithms are accepted; `none` and HMAC
//!   algorithms are always rejected
//! - A payload decoded before verification may only select a key set. It is
//!   never used for an authorization decision.
//!
//! # Usage
//!
//! ```rust,ignore
//! use common::jwt::{split_token, is_allowed_algorithm};
//!
//! let token = split_token(raw)?;
//! if !is_allowed_algorithm(&token.header.alg) {
//!     return Err(...);
//! }
//! // verify token.signing_input() against token.signature() with the selected key
//! ```

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed JWT size in bytes (8KB).
///
/// Typical gateway tokens are well under 2KB even with role and permission
/// claims. Oversized tokens are rejected before any base64 decode or
/// cryptographic work.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// Default JWT clock skew tolerance (2 minutes).
///
/// Applied symmetrically to `exp`, `nbf` and `iat` checks.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(120);

/// Maximum allowed JWT clock skew tolerance (10 minutes).
///
/// Prevents misconfiguration from weakening expiry enforcement.
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

/// Signature algorithms this gateway will ever verify.
///
/// Asymmetric only. A trust source may narrow this list further but can never
/// widen it.
pub const ALLOWED_ALGORITHMS: &[&str] = &[
    "RS256", "RS384", "RS512", "PS256", "PS384", "PS512", "ES256", "ES384", "EdDSA",
];

// =============================================================================
// Error Types
// =============================================================================

/// Errors produced while taking a compact JWT apart.
///
/// The messages are safe to return to clients: they never echo token content.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtFormatError {
    /// Token size exceeds [`MAX_JWT_SIZE_BYTES`].
    #[error("token exceeds maximum size")]
    TokenTooLarge,

    /// Token is not three dot-separated segments.
    #[error("token must have three segments")]
    WrongSegmentCount,

    /// A segment is not valid base64url.
    #[error("token {0} is not valid base64url")]
    InvalidEncoding(&'static str),

    /// A segment does not decode to the expected JSON shape.
    #[error("token {0} is not a valid JSON object")]
    InvalidJson(&'static str),

    /// Header has no usable `alg` value.
    #[error("token header is missing alg")]
    MissingAlgorithm,
}

// =============================================================================
// Header and Token Types
// =============================================================================

/// The JOSE header fields this gateway cares about.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JoseHeader {
    /// Signature algorithm as written in the token.
    #[serde(default)]
    pub alg: String,

    /// Key ID used to select the verification key.
    #[serde(default)]
    pub kid: Option<String>,

    /// Token type, usually `JWT`.
    #[serde(default)]
    pub typ: Option<String>,
}

impl JoseHeader {
    /// The key id, if present and non-empty.
    #[must_use]
    pub fn key_id(&self) -> Option<&str> {
        self.kid.as_deref().filter(|kid| !kid.is_empty())
    }
}

/// A compact JWT split into its segments, header decoded.
///
/// Borrowing from the raw token keeps the signing input byte-exact.
#[derive(Debug, Clone)]
pub struct CompactToken<'a> {
    /// Decoded header.
    pub header: JoseHeader,
    signing_input: &'a str,
    payload_b64: &'a str,
    signature_b64: &'a str,
}

impl<'a> CompactToken<'a> {
    /// `header.payload`, the exact bytes the signature covers.
    #[must_use]
    pub fn signing_input(&self) -> &'a str {
        self.signing_input
    }

    /// The base64url signature segment.
    #[must_use]
    pub fn signature(&self) -> &'a str {
        self.signature_b64
    }

    /// Decode the payload segment to raw bytes.
    ///
    /// # Errors
    ///
    /// Returns `JwtFormatError::InvalidEncoding` if the payload is not base64url.
    pub fn payload_bytes(&self) -> Result<Vec<u8>, JwtFormatError> {
        URL_SAFE_NO_PAD.decode(self.payload_b64).map_err(|e| {
            tracing::debug!(target: "common.jwt", error = %e, "Failed to decode JWT payload base64");
            JwtFormatError::InvalidEncoding("payload")
        })
    }
}

// =============================================================================
// Functions
// =============================================================================

/// Split a compact JWT and decode its header without verifying anything.
///
/// # Errors
///
/// - `TokenTooLarge` - token exceeds [`MAX_JWT_SIZE_BYTES`]
/// - `WrongSegmentCount` - not exactly three segments, or an empty segment
/// - `InvalidEncoding` / `InvalidJson` - header is not base64url JSON
/// - `MissingAlgorithm` - header has no `alg`
pub fn split_token(token: &str) -> Result<CompactToken<'_>, JwtFormatError> {
    // Check token size first (DoS prevention)
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtFormatError::TokenTooLarge);
    }

    if token.split('.').count() != 3 {
        tracing::debug!(target: "common.jwt", "Token rejected: invalid JWT format");
        return Err(JwtFormatError::WrongSegmentCount);
    }

    let (signing_input, signature_b64) = token
        .rsplit_once('.')
        .ok_or(JwtFormatError::WrongSegmentCount)?;
    let (header_b64, payload_b64) = signing_input
        .split_once('.')
        .ok_or(JwtFormatError::WrongSegmentCount)?;

    if header_b64.is_empty() || payload_b64.is_empty() {
        return Err(JwtFormatError::WrongSegmentCount);
    }

    let header_bytes = URL_SAFE_NO_PAD.decode(header_b64).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to decode JWT header base64");
        JwtFormatError::InvalidEncoding("header")
    })?;

    let header: JoseHeader = serde_json::from_slice(&header_bytes).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to parse JWT header JSON");
        JwtFormatError::InvalidJson("header")
    })?;

    if header.alg.is_empty() {
        return Err(JwtFormatError::MissingAlgorithm);
    }

    Ok(CompactToken {
        header,
        signing_input,
        payload_b64,
        signature_b64,
    })
}

/// Whether `alg` is on the fixed asymmetric allowlist.
///
/// Comparison is exact: `none`, `None`, `HS256` and friends are all rejected.
#[must_use]
pub fn is_allowed_algorithm(alg: &str) -> bool {
    ALLOWED_ALGORITHMS.contains(&alg)
}

/// Parse raw payload bytes into a JSON object.
///
/// # Errors
///
/// Returns `JwtFormatError::InvalidJson` if the bytes are not a JSON object.
pub fn parse_payload(bytes: &[u8]) -> Result<Map<String, Value>, JwtFormatError> {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(JwtFormatError::InvalidJson("payload")),
        Err(e) => {
            tracing::debug!(target: "common.jwt", error = %e, "Failed to parse JWT payload JSON");
            Err(JwtFormatError::InvalidJson("payload"))
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
