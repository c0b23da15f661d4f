//! Refresh token lifecycle: an ordered decision procedure over
//! `rotation_enabled`, `absolute_lifetime`, `valid_if_not_used_for`,
//! and `reuse_interval`.
//!
//! Reuse of an obsolete secret outside the grace window revokes the
//! whole session: delete the single `RefreshToken` plus the matching
//! `OfflineSession` entry — this server has no token-family concept,
//! just one token per (client, user, connector).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use idbroker_types::{OfflineSession, RefreshToken, random_token};
use time::OffsetDateTime;

use crate::config::RefreshTokenPolicyConfig;
use crate::storage::{Storage, StorageError};

#[derive(thiserror::Error, Debug)]
pub enum RefreshError {
    #[error("refresh token not found")]
    NotFound,
    #[error("refresh token expired")]
    Expired,
    #[error("refresh token reuse detected, session revoked")]
    ReuseDetected,
    #[error("presented secret does not match")]
    SecretMismatch,
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<StorageError> for RefreshError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound => RefreshError::NotFound,
            other => RefreshError::Storage(other.to_string()),
        }
    }
}

/// What the pure decision procedure concludes about a presented
/// `(token record, secret)` pair at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    CompletelyExpired,
    ExpiredBecauseUnused,
    ReuseDetected,
    SecretMismatch,
    Rotate,
}

/// The ordered decision procedure itself, pure and total: given a
/// token record, the presented secret, policy knobs, and "now", decide
/// what should happen. No I/O, no mutation — easy to proptest.
pub fn decide(
    token: &RefreshToken,
    presented_secret: &str,
    policy: &RefreshTokenPolicyConfig,
    now: OffsetDateTime,
) -> Decision {
    if policy.absolute_lifetime > Duration::ZERO
        && now > token.created_at + time_duration(policy.absolute_lifetime)
    {
        return Decision::CompletelyExpired;
    }
    if policy.valid_if_not_used_for > Duration::ZERO
        && now > token.last_used + time_duration(policy.valid_if_not_used_for)
    {
        return Decision::ExpiredBecauseUnused;
    }
    if presented_secret == token.token {
        return Decision::Rotate;
    }
    if let Some(obsolete) = &token.obsolete_token {
        if presented_secret == obsolete {
            let grace = now <= token.last_used + time_duration(policy.reuse_interval);
            return if grace {
                // Within the grace window this is a legitimate retry of
                // the rotation response the client never received, not
                // an attack: re-issuing the same current secret is safe
                // because nothing else could have observed it yet.
                Decision::Rotate
            } else {
                Decision::ReuseDetected
            };
        }
    }
    Decision::SecretMismatch
}

fn time_duration(d: Duration) -> time::Duration {
    time::Duration::try_from(d).unwrap_or(time::Duration::MAX)
}

/// What a terminal (non-`Rotate`) decision leaves behind for the caller
/// to act on once the mutator's abort has unwound back out of `Storage`.
struct Terminal {
    decision: Decision,
    snapshot: RefreshToken,
}

/// Runs `decide` against the record `Storage` actually hands the
/// mutator under its per-key lock, not a snapshot read beforehand: two
/// concurrent callers racing the same presented secret must see each
/// other's effect before either commits. `Rotate` is the only decision
/// that mutates; anything else aborts the write (`Err`) and stashes
/// itself in `terminal` so `rotate` below can react once the abort has
/// propagated back out.
fn apply_decision(
    current: RefreshToken,
    presented_secret: &str,
    policy: &RefreshTokenPolicyConfig,
    now: OffsetDateTime,
    terminal: &Mutex<Option<Terminal>>,
) -> Result<RefreshToken, StorageError> {
    match decide(&current, presented_secret, policy, now) {
        Decision::Rotate if presented_secret == current.token => {
            let mut t = current;
            if policy.rotation_enabled {
                t.obsolete_token = Some(t.token.clone());
                t.token = random_token();
            }
            t.last_used = now;
            Ok(t)
        }
        // A grace-window replay of the already-obsolete secret: this is
        // not a fresh rotation, it is a retry of one that already
        // happened, so the client-facing secret must stay the one that
        // rotation already emitted rather than mint another.
        Decision::Rotate => Ok(current),
        decision => {
            *terminal.lock().unwrap() = Some(Terminal { decision, snapshot: current });
            Err(StorageError::Backend("refresh token rejected".to_string()))
        }
    }
}

/// Orchestrates `decide` against `Storage`: applies the decision,
/// deleting on terminal outcomes and rotating in place otherwise.
/// Returns the new opaque client-facing token string on success.
pub async fn rotate(
    storage: &dyn Storage,
    token_id: &str,
    presented_secret: &str,
    policy: &RefreshTokenPolicyConfig,
) -> Result<(RefreshToken, String), RefreshError> {
    let now = OffsetDateTime::now_utc();
    let policy = policy.clone();
    let presented_secret = presented_secret.to_string();
    let terminal: Arc<Mutex<Option<Terminal>>> = Arc::new(Mutex::new(None));
    let terminal_for_closure = terminal.clone();

    let result = storage
        .update_refresh_token(
            token_id,
            Box::new(move |current| {
                apply_decision(current, &presented_secret, &policy, now, &terminal_for_closure)
            }),
        )
        .await;

    match result {
        Ok(updated) => {
            let opaque = format!("{}.{}", updated.id, updated.token);
            Ok((updated, opaque))
        }
        Err(StorageError::NotFound) => Err(RefreshError::NotFound),
        Err(_) => match terminal.lock().unwrap().take() {
            Some(Terminal { decision: Decision::SecretMismatch, .. }) | None => {
                Err(RefreshError::SecretMismatch)
            }
            Some(Terminal {
                decision: Decision::CompletelyExpired | Decision::ExpiredBecauseUnused,
                snapshot,
            }) => {
                revoke(storage, &snapshot).await?;
                Err(RefreshError::Expired)
            }
            Some(Terminal { decision: Decision::ReuseDetected, snapshot }) => {
                revoke(storage, &snapshot).await?;
                Err(RefreshError::ReuseDetected)
            }
            Some(Terminal { decision: Decision::Rotate, .. }) => {
                unreachable!("Rotate always succeeds the mutator")
            }
        },
    }
}

/// Deletes the `RefreshToken` and its matching `OfflineSession` entry.
async fn revoke(storage: &dyn Storage, token: &RefreshToken) -> Result<(), RefreshError> {
    storage.delete_refresh_token(&token.id).await.ok();
    let session_key = OfflineSession::key(&token.claims.subject, &token.connector_id);
    if let Ok(session) = storage.get_offline_session(&session_key).await {
        let client_id = token.client_id.clone();
        let remaining = session
            .refresh
            .iter()
            .filter(|(_, r)| r.client_id != client_id)
            .count();
        if remaining == 0 {
            storage.delete_offline_session(&session_key).await.ok();
        } else {
            let client_id_for_closure = client_id.clone();
            storage
                .upsert_offline_session(
                    &session_key,
                    &session.user_id,
                    &session.connector_id,
                    Box::new(move |mut s: OfflineSession| {
                        s.refresh.retain(|_, r| r.client_id != client_id_for_closure);
                        Ok(s)
                    }),
                )
                .await
                .ok();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use idbroker_types::AuthClaims;
    use proptest::prelude::*;

    fn sample_policy() -> RefreshTokenPolicyConfig {
        RefreshTokenPolicyConfig {
            rotation_enabled: true,
            absolute_lifetime: Duration::from_secs(3600),
            valid_if_not_used_for: Duration::from_secs(600),
            reuse_interval: Duration::from_secs(30),
        }
    }

    fn sample_token(created_at: OffsetDateTime, last_used: OffsetDateTime) -> RefreshToken {
        let (mut token, _) = RefreshToken::new(
            "client-a".into(),
            "mock".into(),
            vec!["openid".into()],
            None,
            AuthClaims::default(),
            Vec::new(),
        );
        token.created_at = created_at;
        token.last_used = last_used;
        token
    }

    #[test]
    fn rotates_on_matching_secret() {
        let now = OffsetDateTime::now_utc();
        let token = sample_token(now, now);
        let secret = token.token.clone();
        assert_eq!(decide(&token, &secret, &sample_policy(), now), Decision::Rotate);
    }

    #[test]
    fn completely_expired_wins_over_everything_else() {
        let now = OffsetDateTime::now_utc();
        let created = now - time::Duration::hours(2);
        let token = sample_token(created, now);
        let secret = token.token.clone();
        assert_eq!(
            decide(&token, &secret, &sample_policy(), now),
            Decision::CompletelyExpired
        );
    }

    #[test]
    fn obsolete_token_within_grace_window_rotates_again() {
        let now = OffsetDateTime::now_utc();
        let mut token = sample_token(now - time::Duration::seconds(5), now - time::Duration::seconds(5));
        token.obsolete_token = Some("old-secret".to_string());
        assert_eq!(
            decide(&token, "old-secret", &sample_policy(), now),
            Decision::Rotate
        );
    }

    #[test]
    fn obsolete_token_outside_grace_window_is_reuse() {
        let now = OffsetDateTime::now_utc();
        let mut token = sample_token(
            now - time::Duration::minutes(5),
            now - time::Duration::minutes(5),
        );
        token.obsolete_token = Some("old-secret".to_string());
        assert_eq!(
            decide(&token, "old-secret", &sample_policy(), now),
            Decision::ReuseDetected
        );
    }

    proptest! {
        #[test]
        fn decision_is_always_one_of_the_five_variants(
            age_secs in 0i64..10_000,
            idle_secs in 0i64..10_000,
            use_obsolete in any::<bool>(),
        ) {
            let now = OffsetDateTime::now_utc();
            let created = now - time::Duration::seconds(age_secs);
            let last_used = now - time::Duration::seconds(idle_secs.min(age_secs));
            let mut token = sample_token(created, last_used);
            token.obsolete_token = Some("obsolete".to_string());
            let secret = if use_obsolete { "obsolete".to_string() } else { token.token.clone() };
            let decision = decide(&token, &secret, &sample_policy(), now);
            prop_assert!(matches!(
                decision,
                Decision::CompletelyExpired
                    | Decision::ExpiredBecauseUnused
                    | Decision::ReuseDetected
                    | Decision::SecretMismatch
                    | Decision::Rotate
            ));
        }
    }
}
