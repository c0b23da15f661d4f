//! Signing-key rotation.
//!
//! Rotation is a single atomic `Storage::update_keys` call: the mutator
//! decides, from the value it was handed under the backend's per-key
//! lock, whether a rotation is due. If another replica already rotated
//! past the deadline the mutator just returns the current value
//! unchanged — `AlreadyRotated` is a normal outcome, not an error, so
//! callers never see a distinguished error variant for it.

mod rsa_support;

use idbroker_types::{Keys, VerificationKey, random_token};
use time::OffsetDateTime;

use crate::config::KeyRotationConfig;
use crate::storage::{Storage, StorageError, StorageResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationOutcome {
    Rotated,
    AlreadyRotated,
}

/// Runs one rotation decision to completion, blocking until the write
/// lands. Called once eagerly at startup and then every 30s.
pub async fn rotate_once_blocking(
    storage: &dyn Storage,
    config: &KeyRotationConfig,
) -> anyhow::Result<RotationOutcome> {
    let now = OffsetDateTime::now_utc();
    let valid_for = config.id_token_valid_for;
    let frequency = config.rotation_frequency;

    let outcome = std::sync::Arc::new(std::sync::Mutex::new(RotationOutcome::AlreadyRotated));
    let outcome_clone = outcome.clone();

    storage
        .update_keys(Box::new(move |current| {
            build_next(current, now, valid_for, frequency, &outcome_clone)
        }))
        .await?;

    let result = *outcome.lock().unwrap();
    if result == RotationOutcome::Rotated {
        log::info!("rotated signing key");
    }
    Ok(result)
}

fn build_next(
    current: Option<Keys>,
    now: OffsetDateTime,
    valid_for: std::time::Duration,
    frequency: std::time::Duration,
    outcome: &std::sync::Mutex<RotationOutcome>,
) -> StorageResult<Keys> {
    if let Some(keys) = &current {
        if keys.next_rotation > now {
            *outcome.lock().unwrap() = RotationOutcome::AlreadyRotated;
            return Ok(keys.clone());
        }
    }

    let (private_jwk, public_jwk) = rsa_support::generate_signing_key(random_token())
        .map_err(|e| StorageError::Backend(format!("key generation failed: {e}")))?;

    let mut verification_keys: Vec<VerificationKey> = current
        .as_ref()
        .map(|k| k.verification_keys.clone())
        .unwrap_or_default();

    if let Some(old) = current {
        verification_keys.push(VerificationKey {
            public: old.signing_key_pub,
            expiry: now + valid_for,
        });
    }

    // Prune anything whose verification window has already closed.
    verification_keys.retain(|vk| vk.expiry > now);

    *outcome.lock().unwrap() = RotationOutcome::Rotated;

    Ok(Keys {
        signing_key: private_jwk,
        signing_key_pub: public_jwk,
        verification_keys,
        next_rotation: now + frequency,
    })
}

pub use rsa_support::{decoding_key_for, encoding_key_for};
