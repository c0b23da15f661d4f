pub mod api;
pub mod config;
pub mod connector;
pub mod error;
pub mod keys;
pub mod refresh_policy;
pub mod scopes;
pub mod signer;
pub mod state;
pub mod storage;

use std::sync::Arc;

use config::ServerConfig;
use state::AppState;

/// Builds the fully-wired `AppState` and eagerly runs one blocking key
/// rotation: the server must not report readiness with no valid
/// signing key.
pub async fn build_state(config: ServerConfig) -> anyhow::Result<AppState> {
    let storage: Arc<dyn storage::Storage> = if let Some(database_url) = &config.database_url {
        Arc::new(storage::postgres::PostgresStorage::connect(database_url).await?)
    } else {
        Arc::new(storage::memory::InMemoryStorage::new())
    };

    keys::rotate_once_blocking(storage.as_ref(), &config.key_rotation).await?;

    let signer: Arc<dyn signer::Signer> =
        Arc::new(signer::StorageBackedSigner::new(storage.clone()));

    let connectors =
        connector::ConnectorRegistry::from_config(&config.connectors, storage.clone())?;

    Ok(AppState {
        config: Arc::new(config),
        storage,
        signer,
        connectors: Arc::new(connectors),
        http_client: reqwest::Client::new(),
    })
}

/// Spawns the recurring (30s) key rotation background task. Returns its
/// `JoinHandle` so callers can await it during shutdown if desired.
pub fn spawn_key_rotator(state: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(30));
        loop {
            ticker.tick().await;
            if let Err(e) = keys::rotate_once_blocking(
                state.storage.as_ref(),
                &state.config.key_rotation,
            )
            .await
            {
                log::warn!("key rotation tick failed, will retry in 30s: {e}");
            }
        }
    })
}

/// Spawns the recurring garbage-collection task for expired `AuthRequest`s
/// and `AuthCode`s.
pub fn spawn_garbage_collector(state: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            ticker.tick().await;
            let before = time::OffsetDateTime::now_utc();
            match state.storage.garbage_collect(before).await {
                Ok(counts) if counts.auth_requests > 0 || counts.auth_codes > 0 => {
                    log::info!(
                        "garbage collected {} auth requests, {} auth codes",
                        counts.auth_requests,
                        counts.auth_codes
                    );
                }
                Ok(_) => {}
                Err(e) => log::warn!("garbage collection failed: {e}"),
            }
        }
    })
}
