use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A public JSON Web Key, RSA flavor (the only kind `KeyRotator` produces).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublicJwk {
    pub kty: String,
    pub alg: String,
    pub kid: String,
    #[serde(rename = "use")]
    pub use_: String,
    /// Base64url-encoded modulus.
    pub n: String,
    /// Base64url-encoded public exponent.
    pub e: String,
}

/// A private signing key, kept only in `Keys::signing_key`, never serialized
/// to the public JWKS response.
#[derive(Clone, Serialize, Deserialize)]
pub struct PrivateJwk {
    pub kid: String,
    /// PKCS#1 DER-encoded RSA private key.
    pub pkcs1_der: Vec<u8>,
}

impl std::fmt::Debug for PrivateJwk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateJwk")
            .field("kid", &self.kid)
            .field("pkcs1_der", &"[REDACTED]")
            .finish()
    }
}

/// A public key retained after its private half was demoted, still valid
/// for verification until `expiry`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerificationKey {
    pub public: PublicJwk,
    #[serde(with = "time::serde::rfc3339")]
    pub expiry: OffsetDateTime,
}

/// The singleton signing-key record. Exactly one exists process-wide,
/// shared by every replica through `Storage`.
#[derive(Clone, Serialize, Deserialize)]
pub struct Keys {
    pub signing_key: PrivateJwk,
    pub signing_key_pub: PublicJwk,
    pub verification_keys: Vec<VerificationKey>,
    #[serde(with = "time::serde::rfc3339")]
    pub next_rotation: OffsetDateTime,
}

impl std::fmt::Debug for Keys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keys")
            .field("signing_key", &self.signing_key)
            .field("signing_key_pub", &self.signing_key_pub)
            .field("verification_keys", &self.verification_keys)
            .field("next_rotation", &self.next_rotation)
            .finish()
    }
}

impl Keys {
    /// All public keys currently valid for verification: the current
    /// signer plus any retained verification keys.
    pub fn all_public_keys(&self) -> Vec<PublicJwk> {
        std::iter::once(self.signing_key_pub.clone())
            .chain(self.verification_keys.iter().map(|v| v.public.clone()))
            .collect()
    }
}

/// JWKS response body for `GET /keys`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwksResponse {
    pub keys: Vec<PublicJwk>,
}
