//! Stateless JWS sign/verify. `StorageBackedSigner` holds
//! no key state itself — every call re-fetches `Keys` from `Storage`,
//! so it stays correct across rotation without needing a cache
//! invalidation path.

use std::sync::Arc;

use async_trait::async_trait;
use idbroker_types::Keys;
use jsonwebtoken::{Algorithm, Header, Validation, decode, encode};
use serde::{Serialize, de::DeserializeOwned};
use time::OffsetDateTime;

use crate::keys::{decoding_key_for, encoding_key_for};
use crate::storage::{Storage, StorageError};

#[derive(thiserror::Error, Debug)]
pub enum SignerError {
    #[error("no signing key provisioned")]
    NoSigningKey,
    #[error("unknown key id")]
    UnknownKeyId,
    #[error("bad signature")]
    BadSignature,
    #[error("expired")]
    Expired,
    #[error("storage error: {0}")]
    Storage(String),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<StorageError> for SignerError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound => SignerError::NoSigningKey,
            other => SignerError::Storage(other.to_string()),
        }
    }
}

pub type SignerResult<T> = std::result::Result<T, SignerError>;

/// Object-safe core: both methods traffic in `serde_json::Value` so the
/// trait can live behind `Arc<dyn Signer>`. [`sign`] and [`verify`]
/// below are the typed, ergonomic entry points handlers actually call.
#[async_trait]
pub trait Signer: Send + Sync {
    async fn sign_value(&self, claims: serde_json::Value) -> SignerResult<String>;
    async fn verify_value(&self, token: &str) -> SignerResult<serde_json::Value>;
}

pub async fn sign<T: Serialize + Send + Sync>(
    signer: &dyn Signer,
    claims: &T,
) -> SignerResult<String> {
    let value = serde_json::to_value(claims).map_err(|e| SignerError::Encode(e.to_string()))?;
    signer.sign_value(value).await
}

pub async fn verify<T: DeserializeOwned>(signer: &dyn Signer, token: &str) -> SignerResult<T> {
    let value = signer.verify_value(token).await?;
    serde_json::from_value(value).map_err(|e| SignerError::Decode(e.to_string()))
}

pub struct StorageBackedSigner {
    storage: Arc<dyn Storage>,
}

impl StorageBackedSigner {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl Signer for StorageBackedSigner {
    async fn sign_value(&self, claims: serde_json::Value) -> SignerResult<String> {
        let keys = self.storage.get_keys().await?;
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(keys.signing_key.kid.clone());
        let encoding_key =
            encoding_key_for(&keys.signing_key).map_err(|e| SignerError::Encode(e.to_string()))?;
        encode(&header, &claims, &encoding_key).map_err(|e| SignerError::Encode(e.to_string()))
    }

    async fn verify_value(&self, token: &str) -> SignerResult<serde_json::Value> {
        let keys = self.storage.get_keys().await?;
        let header =
            jsonwebtoken::decode_header(token).map_err(|_| SignerError::BadSignature)?;
        let kid = header.kid.as_deref().ok_or(SignerError::BadSignature)?;

        let public = find_key_by_kid(&keys, kid, OffsetDateTime::now_utc())
            .ok_or(SignerError::UnknownKeyId)?;
        let decoding_key =
            decoding_key_for(public).map_err(|e| SignerError::Decode(e.to_string()))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = true;

        decode::<serde_json::Value>(token, &decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => SignerError::Expired,
                jsonwebtoken::errors::ErrorKind::InvalidSignature => SignerError::BadSignature,
                _ => SignerError::Decode(e.to_string()),
            })
    }
}

/// Key-ID-match-first lookup: the current signing key, then any
/// retained verification key, matched by `kid` before anything else is
/// checked. A retained key whose `expiry` has passed is never returned,
/// even if `KeyRotator`'s own pruning hasn't caught up to it yet.
fn find_key_by_kid<'a>(
    keys: &'a Keys,
    kid: &str,
    now: OffsetDateTime,
) -> Option<&'a idbroker_types::PublicJwk> {
    if keys.signing_key_pub.kid == kid {
        return Some(&keys.signing_key_pub);
    }
    keys.verification_keys
        .iter()
        .find(|vk| vk.public.kid == kid && vk.expiry > now)
        .map(|vk| &vk.public)
}
