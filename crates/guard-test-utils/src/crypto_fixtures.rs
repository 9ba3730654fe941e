//! Deterministic cryptographic fixtures for testing
//!
//! Provides reproducible Ed25519 keypairs that sign compact JWTs and publish
//! the matching JWK. The same seed always produces the same keypair.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use ring::signature::{Ed25519KeyPair, KeyPair};
use serde::Serialize;
use serde_json::{json, Value};

/// Ed25519 signing key with a `kid`.
pub struct TestKeypair {
    kid: String,
    public_key_bytes: Vec<u8>,
    private_key_pkcs8: Vec<u8>,
}

impl TestKeypair {
    /// Create a deterministic keypair from `seed`.
    ///
    /// # Example
    /// ```rust,ignore
    /// let keypair = TestKeypair::new(1, "key-1");
    /// let token = keypair.sign_token(&json!({"sub": "alice"}));
    /// ```
    pub fn new(seed: u8, kid: &str) -> Self {
        let seed_bytes = seed_bytes(seed);

        let key_pair = Ed25519KeyPair::from_seed_unchecked(&seed_bytes)
            .expect("seed must produce an Ed25519 keypair");

        Self {
            kid: kid.to_string(),
            public_key_bytes: key_pair.public_key().as_ref().to_vec(),
            private_key_pkcs8: build_pkcs8_from_seed(&seed_bytes),
        }
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn public_key_bytes(&self) -> &[u8] {
        &self.public_key_bytes
    }

    /// Sign `claims` as an EdDSA JWT carrying this key's `kid`.
    pub fn sign_token<T: Serialize>(&self, claims: &T) -> String {
        let mut header = Header::new(Algorithm::EdDSA);
        header.typ = Some("JWT".to_string());
        header.kid = Some(self.kid.clone());

        let encoding_key = EncodingKey::from_ed_der(&self.private_key_pkcs8);
        encode(&header, claims, &encoding_key).expect("signing test token should succeed")
    }

    /// The public key as a JWK, as an identity provider would publish it.
    pub fn jwk_json(&self) -> Value {
        json!({
            "kty": "OKP",
            "kid": self.kid,
            "crv": "Ed25519",
            "x": URL_SAFE_NO_PAD.encode(&self.public_key_bytes),
            "alg": "EdDSA",
            "use": "sig"
        })
    }
}

/// JWKS document containing every key in `keypairs`.
pub fn jwks_json(keypairs: &[&TestKeypair]) -> Value {
    json!({ "keys": keypairs.iter().map(|k| k.jwk_json()).collect::<Vec<_>>() })
}

/// Expand a one-byte seed into 32 deterministic bytes.
fn seed_bytes(seed: u8) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    bytes[0] = seed;
    for (i, byte) in bytes.iter_mut().enumerate().skip(1) {
        *byte = seed.wrapping_mul(i as u8).wrapping_add(i as u8);
    }
    bytes
}

/// Build PKCS#8 v1 document from Ed25519 seed
///
/// This is a test-only utility. Production code must use ring::rand::SystemRandom.
pub fn build_pkcs8_from_seed(seed: &[u8; 32]) -> Vec<u8> {
    let mut pkcs8 = Vec::with_capacity(48);

    // SEQUENCE, 46 bytes
    pkcs8.extend_from_slice(&[0x30, 0x2e]);
    // version INTEGER 0
    pkcs8.extend_from_slice(&[0x02, 0x01, 0x00]);
    // AlgorithmIdentifier SEQUENCE { OID 1.3.101.112 }
    pkcs8.extend_from_slice(&[0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70]);
    // privateKey OCTET STRING { OCTET STRING seed }
    pkcs8.extend_from_slice(&[0x04, 0x22, 0x04, 0x20]);
    pkcs8.extend_from_slice(seed);

    pkcs8
}
