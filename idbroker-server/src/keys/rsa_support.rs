//! RSA-2048 keypair generation and JWK/jsonwebtoken conversion.
//!
//! Tokens are signed RS256, so this module pulls in the `rsa` crate
//! directly for PKCS#1 DER generation and converts n/e into the
//! base64url form a JWK expects.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use idbroker_types::{PrivateJwk, PublicJwk};
use jsonwebtoken::{DecodingKey, EncodingKey};
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};

const RSA_BITS: usize = 2048;

pub fn generate_signing_key(kid: String) -> anyhow::Result<(PrivateJwk, PublicJwk)> {
    let mut rng = rand::rngs::OsRng;
    let private_key = RsaPrivateKey::new(&mut rng, RSA_BITS)?;
    let public_key = RsaPublicKey::from(&private_key);

    let pkcs1_der = private_key.to_pkcs1_der()?.as_bytes().to_vec();
    let n = URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be());
    let e = URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be());

    let public_jwk = PublicJwk {
        kty: "RSA".to_string(),
        alg: "RS256".to_string(),
        kid: kid.clone(),
        use_: "sig".to_string(),
        n,
        e,
    };
    let private_jwk = PrivateJwk { kid, pkcs1_der };

    Ok((private_jwk, public_jwk))
}

pub fn encoding_key_for(private: &PrivateJwk) -> anyhow::Result<EncodingKey> {
    Ok(EncodingKey::from_rsa_der(&private.pkcs1_der))
}

pub fn decoding_key_for(public: &PublicJwk) -> anyhow::Result<DecodingKey> {
    // jsonwebtoken wants raw (non-base64url) modulus/exponent bytes and
    // re-encodes them internally as a component-based RSA public key.
    Ok(DecodingKey::from_rsa_raw_components(
        &URL_SAFE_NO_PAD.decode(&public.n)?,
        &URL_SAFE_NO_PAD.decode(&public.e)?,
    ))
}
