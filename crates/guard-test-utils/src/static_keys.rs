//! Fixed RSA and P-256 signing keys for testing
//!
//! RSA and ECDSA keys cannot be derived from a one-byte seed the way the
//! Ed25519 fixtures are, so these are pre-generated PKCS#8 PEM files with
//! their public JWK parameters recorded alongside.

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Serialize;
use serde_json::{json, Value};

const RSA_PRIMARY_PEM: &str = include_str!("keys/rsa_primary.pem");
const RSA_PRIMARY_N: &str = "yvhwG7zmo4xNwxS1QRHf1zYA-TsuVPW_ywPdjKnzFvGtvnFCQZHW5hSNUNM1D5V6J7RGeEND_621O9jSDqB9qN3pty5oIozppV2-FK7QOsnXvkRkReROrSTfcw5Ls2EnrA2VcUP8DmrCUZZScOjlHyQKqKfqMHJwDYYLUcGJFcqfgoo4FfiHyEcIhS-ut1AZPVudZoy2hgke1eeTc1-MeOffYEjFVPOcJe2G4Byf333VQgCuAB5l0N4207JKjQTP33o2g3w9C1TxU96yj2MN3Wfp1HSilgeREDBCesRZjU8PhYSuIZVvCVo6D3gv2hetgME3W52Z7GON1CnhcXnqUw";

const RSA_ALTERNATE_PEM: &str = include_str!("keys/rsa_alternate.pem");
const RSA_ALTERNATE_N: &str = "36cTBiM3779iir_Wi8JQFXDDEH7wZlerENE5ajSfDQ0zuuOqIYfJmd8NwtbUf98aU3tLgpISjNdNS1JxLEhwIFn5BSZ9oTPVG0de9yHN0rBPo5ofTTlcqZE7nj1gPS-PmnkGWxNahCPceLDxU2-CJDQrw0ABpRyA19_EatE19nO6qcoeE9h9w6kyXovvNUfGiexiYllsZTLZbbmAMEH-Oy6786r7j20c0kcb67gkwszQSaiuz0CCH0O8Pv9WD-43Rqa0VB7oVJJy8t4q4dY_OhqjcO6Gs5nNxwdmkh11y7kLOZgVOjT7kk7QRL6kbp65wMItksRjR5g7qhN2MUFBKw";

const RSA_EXPONENT: &str = "AQAB";

const P256_PRIMARY_PEM: &str = include_str!("keys/p256_primary.pem");
const P256_PRIMARY_X: &str = "YIPOP6yoivlqyeTGnmSRX_KoQezKs9Jv1WF0rIZRBoI";
const P256_PRIMARY_Y: &str = "yh7wnZXbiCDwkhjeFNZBcKBMMNLXx68yrL4QW9essxY";

const P256_ALTERNATE_PEM: &str = include_str!("keys/p256_alternate.pem");
const P256_ALTERNATE_X: &str = "ubd81kJKuA19Kd8R89aS__8XJncbi5LcN3x9ID2cjU4";
const P256_ALTERNATE_Y: &str = "xmPgO4rEX-Ps94hktSXpL3NcWWsdg7gPbMmjLbIIFMs";

enum Material {
    Rsa { n: &'static str },
    P256 { x: &'static str, y: &'static str },
}

/// A pre-generated RSA-2048 or P-256 key with a `kid`.
///
/// # Example
/// ```rust,ignore
/// let key = StaticKeypair::rsa("rsa-1");
/// let token = key.sign_token(Algorithm::PS256, &json!({"sub": "alice"}));
/// ```
pub struct StaticKeypair {
    kid: String,
    pem: &'static str,
    material: Material,
}

impl StaticKeypair {
    pub fn rsa(kid: &str) -> Self {
        Self::new(kid, RSA_PRIMARY_PEM, Material::Rsa { n: RSA_PRIMARY_N })
    }

    /// A second RSA key, distinct from [`StaticKeypair::rsa`].
    pub fn rsa_alternate(kid: &str) -> Self {
        Self::new(kid, RSA_ALTERNATE_PEM, Material::Rsa { n: RSA_ALTERNATE_N })
    }

    pub fn p256(kid: &str) -> Self {
        Self::new(
            kid,
            P256_PRIMARY_PEM,
            Material::P256 {
                x: P256_PRIMARY_X,
                y: P256_PRIMARY_Y,
            },
        )
    }

    /// A second P-256 key, distinct from [`StaticKeypair::p256`].
    pub fn p256_alternate(kid: &str) -> Self {
        Self::new(
            kid,
            P256_ALTERNATE_PEM,
            Material::P256 {
                x: P256_ALTERNATE_X,
                y: P256_ALTERNATE_Y,
            },
        )
    }

    fn new(kid: &str, pem: &'static str, material: Material) -> Self {
        Self {
            kid: kid.to_string(),
            pem,
            material,
        }
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Sign `claims` with `algorithm`, carrying this key's `kid`.
    ///
    /// RSA keys sign RS*/PS* tokens; P-256 keys sign ES256.
    pub fn sign_token<T: Serialize>(&self, algorithm: Algorithm, claims: &T) -> String {
        let mut header = Header::new(algorithm);
        header.typ = Some("JWT".to_string());
        header.kid = Some(self.kid.clone());

        let encoding_key = match self.material {
            Material::Rsa { .. } => EncodingKey::from_rsa_pem(self.pem.as_bytes()),
            Material::P256 { .. } => EncodingKey::from_ec_pem(self.pem.as_bytes()),
        }
        .expect("fixture PEM should parse");
        encode(&header, claims, &encoding_key).expect("signing test token should succeed")
    }

    /// The public key as a JWK. No `alg` is pinned so one key can serve
    /// every algorithm of its family.
    pub fn jwk_json(&self) -> Value {
        match self.material {
            Material::Rsa { n } => json!({
                "kty": "RSA",
                "kid": self.kid,
                "n": n,
                "e": RSA_EXPONENT,
                "use": "sig"
            }),
            Material::P256 { x, y } => json!({
                "kty": "EC",
                "kid": self.kid,
                "crv": "P-256",
                "x": x,
                "y": y,
                "use": "sig"
            }),
        }
    }
}
