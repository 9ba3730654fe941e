//! Signature verification against a cached key set.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - `none` and HMAC algorithms are rejected by the fixed allowlist
//! - The trust source's own algorithm list is enforced on top of it
//! - Key family (and EC curve) must fit the header algorithm, and a key
//!   pinned to an `alg` only verifies that algorithm
//! - The payload is not interpreted until the signature verifies

use crate::auth::jwks::{curve_for_algorithm, KeyFamily, KeySet};
use crate::errors::GuardError;
use common::jwt::{is_allowed_algorithm, parse_payload, split_token, JoseHeader};
use jsonwebtoken::Algorithm;
use serde_json::{Map, Value};
use std::str::FromStr;

/// A token whose signature has verified. Claims are not validated yet.
#[derive(Debug)]
pub struct VerifiedToken {
    pub header: JoseHeader,
    pub algorithm: Algorithm,
    pub payload: Map<String, Value>,
}

/// Map a header `alg` onto the fixed allowlist.
///
/// # Errors
///
/// `GuardError::UnsupportedAlgorithm` for anything off the list.
pub fn allowed_algorithm(alg: &str) -> Result<Algorithm, GuardError> {
    if !is_allowed_algorithm(alg) {
        tracing::debug!(target: "guard.auth.verify", alg = %alg, "Algorithm not on allowlist");
        return Err(GuardError::UnsupportedAlgorithm(alg.to_string()));
    }
    Algorithm::from_str(alg).map_err(|_| GuardError::UnsupportedAlgorithm(alg.to_string()))
}

/// Verify `raw_token` against `key_set`.
///
/// # Errors
///
/// - `MalformedToken` - size, structure, encoding, missing `kid`, non-object payload
/// - `UnsupportedAlgorithm` - off the fixed list, off `allowed`, or key mismatch
/// - `UnknownKey` - `kid` not in `key_set`
/// - `BadSignature` - signature does not verify
pub fn verify(
    raw_token: &str,
    key_set: &KeySet,
    allowed: &[Algorithm],
) -> Result<VerifiedToken, GuardError> {
    let token = split_token(raw_token)?;

    let algorithm = allowed_algorithm(&token.header.alg)?;
    if !allowed.contains(&algorithm) {
        tracing::debug!(
            target: "guard.auth.verify",
            source = %key_set.source(),
            alg = %token.header.alg,
            "Algorithm not accepted by trust source"
        );
        return Err(GuardError::UnsupportedAlgorithm(token.header.alg.clone()));
    }

    let kid = token
        .header
        .key_id()
        .ok_or_else(|| GuardError::MalformedToken("token header is missing kid".to_string()))?;

    let key = key_set.get(kid)?;

    if KeyFamily::for_algorithm(algorithm) != Some(key.family) {
        tracing::warn!(
            target: "guard.auth.verify",
            kid = %kid,
            alg = %token.header.alg,
            family = ?key.family,
            "Key family does not match token algorithm"
        );
        return Err(GuardError::UnsupportedAlgorithm(token.header.alg.clone()));
    }
    if let Some(pinned) = key.algorithm {
        if pinned != algorithm {
            tracing::warn!(
                target: "guard.auth.verify",
                kid = %kid,
                alg = %token.header.alg,
                pinned = ?pinned,
                "Key is pinned to a different algorithm"
            );
            return Err(GuardError::UnsupportedAlgorithm(token.header.alg.clone()));
        }
    }
    if let Some(required_curve) = curve_for_algorithm(algorithm) {
        if key.curve.as_deref() != Some(required_curve) {
            return Err(GuardError::UnsupportedAlgorithm(token.header.alg.clone()));
        }
    }

    let verified = jsonwebtoken::crypto::verify(
        token.signature(),
        token.signing_input().as_bytes(),
        key.decoding_key(),
        algorithm,
    )
    .unwrap_or_else(|e| {
        tracing::debug!(target: "guard.auth.verify", error = %e, "Signature verification error");
        false
    });

    if !verified {
        tracing::debug!(target: "guard.auth.verify", kid = %kid, "Token signature invalid");
        return Err(GuardError::BadSignature);
    }

    let payload = parse_payload(&token.payload_bytes()?)?;

    Ok(VerifiedToken {
        header: token.header,
        algorithm,
        payload,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::auth::jwks::JwksDocument;
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use guard_test_utils::crypto_fixtures::TestKeypair;
    use guard_test_utils::static_keys::StaticKeypair;
    use serde_json::json;
    use std::time::Duration;

    fn key_set_for(keypairs: &[&TestKeypair]) -> KeySet {
        key_set_of(keypairs.iter().map(|k| k.jwk_json()).collect())
    }

    fn key_set_of(keys: Vec<Value>) -> KeySet {
        KeySet::from_document("apigee", JwksDocument { keys }, Duration::from_secs(60)).unwrap()
    }

    fn claims() -> Value {
        json!({"sub": "alice", "iss": "https://idpA", "aud": "TSIAM", "exp": 4_000_000_000_i64})
    }

    fn forge(header: Value, payload: Value) -> String {
        format!(
            "{}.{}.{}",
            URL_SAFE_NO_PAD.encode(header.to_string()),
            URL_SAFE_NO_PAD.encode(payload.to_string()),
            URL_SAFE_NO_PAD.encode(b"not-a-signature")
        )
    }

    #[test]
    fn test_valid_signature() {
        let keypair = TestKeypair::new(1, "key-1");
        let token = keypair.sign_token(&claims());

        let verified = verify(&token, &key_set_for(&[&keypair]), &[Algorithm::EdDSA]).unwrap();
        assert_eq!(verified.algorithm, Algorithm::EdDSA);
        assert_eq!(verified.header.key_id(), Some("key-1"));
        assert_eq!(verified.payload["sub"], "alice");
    }

    #[test]
    fn test_signature_from_other_key_is_rejected() {
        let signer = TestKeypair::new(1, "key-1");
        let published = TestKeypair::new(2, "key-1");
        let token = signer.sign_token(&claims());

        let result = verify(&token, &key_set_for(&[&published]), &[Algorithm::EdDSA]);
        assert_eq!(result.unwrap_err(), GuardError::BadSignature);
    }

    #[test]
    fn test_tampered_payload_is_rejected() {
        let keypair = TestKeypair::new(1, "key-1");
        let token = keypair.sign_token(&claims());
        let mut parts: Vec<&str> = token.split('.').collect();
        let tampered_payload = URL_SAFE_NO_PAD.encode(
            json!({"sub": "mallory", "iss": "https://idpA", "aud": "TSIAM", "exp": 4_000_000_000_i64})
                .to_string(),
        );
        parts[1] = &tampered_payload;
        let tampered = parts.join(".");

        let result = verify(&tampered, &key_set_for(&[&keypair]), &[Algorithm::EdDSA]);
        assert_eq!(result.unwrap_err(), GuardError::BadSignature);
    }

    #[test]
    fn test_none_and_hmac_are_unsupported() {
        let keypair = TestKeypair::new(1, "key-1");
        let key_set = key_set_for(&[&keypair]);

        for alg in ["none", "HS256", "HS384", "HS512", "None"] {
            let token = forge(json!({"alg": alg, "kid": "key-1"}), claims());
            assert_eq!(
                verify(&token, &key_set, &[Algorithm::EdDSA]).unwrap_err(),
                GuardError::UnsupportedAlgorithm(alg.to_string()),
                "{alg} must be rejected"
            );
        }
    }

    #[test]
    fn test_source_allowlist_is_enforced() {
        let keypair = TestKeypair::new(1, "key-1");
        let token = keypair.sign_token(&claims());

        let result = verify(&token, &key_set_for(&[&keypair]), &[Algorithm::RS256]);
        assert_eq!(
            result.unwrap_err(),
            GuardError::UnsupportedAlgorithm("EdDSA".to_string())
        );
    }

    #[test]
    fn test_key_family_mismatch() {
        let keypair = TestKeypair::new(1, "key-1");
        // RS256 header naming an OKP key
        let token = forge(json!({"alg": "RS256", "kid": "key-1"}), claims());

        let result = verify(
            &token,
            &key_set_for(&[&keypair]),
            &[Algorithm::RS256, Algorithm::EdDSA],
        );
        assert_eq!(
            result.unwrap_err(),
            GuardError::UnsupportedAlgorithm("RS256".to_string())
        );
    }

    #[test]
    fn test_missing_kid_is_malformed() {
        let keypair = TestKeypair::new(1, "key-1");
        let token = forge(json!({"alg": "EdDSA"}), claims());

        let result = verify(&token, &key_set_for(&[&keypair]), &[Algorithm::EdDSA]);
        assert!(matches!(result, Err(GuardError::MalformedToken(_))));
    }

    #[test]
    fn test_unknown_kid() {
        let keypair = TestKeypair::new(1, "key-1");
        let other = TestKeypair::new(1, "key-2");
        let token = other.sign_token(&claims());

        let result = verify(&token, &key_set_for(&[&keypair]), &[Algorithm::EdDSA]);
        assert_eq!(result.unwrap_err(), GuardError::UnknownKey);
    }

    #[test]
    fn test_oversized_token_is_malformed() {
        let keypair = TestKeypair::new(1, "key-1");
        let token = "a".repeat(common::jwt::MAX_JWT_SIZE_BYTES + 1);

        let result = verify(&token, &key_set_for(&[&keypair]), &[Algorithm::EdDSA]);
        assert!(matches!(result, Err(GuardError::MalformedToken(_))));
    }

    #[test]
    fn test_non_object_payload_is_malformed() {
        let keypair = TestKeypair::new(1, "key-1");
        let token = keypair.sign_token(&json!(["not", "an", "object"]));

        let result = verify(&token, &key_set_for(&[&keypair]), &[Algorithm::EdDSA]);
        assert!(matches!(result, Err(GuardError::MalformedToken(_))));
    }

    #[test]
    fn test_rsa_signatures() {
        let key = StaticKeypair::rsa("rsa-1");
        let key_set = key_set_of(vec![key.jwk_json()]);

        for algorithm in [Algorithm::RS256, Algorithm::PS256] {
            let token = key.sign_token(algorithm, &claims());
            let verified = verify(&token, &key_set, &[algorithm]).unwrap();
            assert_eq!(verified.algorithm, algorithm);
            assert_eq!(verified.payload["sub"], "alice");
        }
    }

    #[test]
    fn test_rsa_signature_from_other_key_is_rejected() {
        let signer = StaticKeypair::rsa_alternate("rsa-1");
        let key_set = key_set_of(vec![StaticKeypair::rsa("rsa-1").jwk_json()]);

        for algorithm in [Algorithm::RS256, Algorithm::PS256] {
            let token = signer.sign_token(algorithm, &claims());
            assert_eq!(
                verify(&token, &key_set, &[algorithm]).unwrap_err(),
                GuardError::BadSignature
            );
        }
    }

    #[test]
    fn test_es256_signature() {
        let key = StaticKeypair::p256("ec-1");
        let token = key.sign_token(Algorithm::ES256, &claims());

        let verified =
            verify(&token, &key_set_of(vec![key.jwk_json()]), &[Algorithm::ES256]).unwrap();
        assert_eq!(verified.algorithm, Algorithm::ES256);
        assert_eq!(verified.header.key_id(), Some("ec-1"));
    }

    #[test]
    fn test_es256_signature_from_other_key_is_rejected() {
        let signer = StaticKeypair::p256_alternate("ec-1");
        let token = signer.sign_token(Algorithm::ES256, &claims());

        let key_set = key_set_of(vec![StaticKeypair::p256("ec-1").jwk_json()]);
        assert_eq!(
            verify(&token, &key_set, &[Algorithm::ES256]).unwrap_err(),
            GuardError::BadSignature
        );
    }

    #[test]
    fn test_es384_header_against_p256_key() {
        let key_set = key_set_of(vec![StaticKeypair::p256("ec-1").jwk_json()]);
        let token = forge(json!({"alg": "ES384", "kid": "ec-1"}), claims());

        let result = verify(&token, &key_set, &[Algorithm::ES256, Algorithm::ES384]);
        assert_eq!(
            result.unwrap_err(),
            GuardError::UnsupportedAlgorithm("ES384".to_string())
        );
    }
}
