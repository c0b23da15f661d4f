//! The abstract, transactional Storage contract.
//!
//! `Create`/`Get`/`Delete`/`Update` are the only primitive operations;
//! `Update`'s mutator is a boxed `FnOnce` rather than a generic parameter
//! so the trait stays object-safe and the server can hold one `Arc<dyn
//! Storage>` shared across every handler and the key-rotation background
//! task.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use idbroker_types::{
    AuthCode, AuthRequest, Client, Connector, Keys, OfflineSession, Password, RefreshToken,
};
use time::OffsetDateTime;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// A pure mutator applied under an exclusive per-key lock: sees the
/// latest committed value, returns the new value or aborts the write.
pub type Mutator<T> = Box<dyn FnOnce(T) -> StorageResult<T> + Send>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcCounts {
    pub auth_requests: u64,
    pub auth_codes: u64,
}

#[async_trait]
pub trait Storage: Send + Sync {
    // -- Client --
    async fn create_client(&self, client: Client) -> StorageResult<()>;
    async fn get_client(&self, id: &str) -> StorageResult<Client>;
    async fn update_client(&self, id: &str, mutator: Mutator<Client>) -> StorageResult<Client>;
    async fn delete_client(&self, id: &str) -> StorageResult<()>;
    async fn list_clients(&self) -> StorageResult<Vec<Client>>;

    // -- Connector --
    async fn create_connector(&self, connector: Connector) -> StorageResult<()>;
    async fn get_connector(&self, id: &str) -> StorageResult<Connector>;
    async fn update_connector(
        &self,
        id: &str,
        mutator: Mutator<Connector>,
    ) -> StorageResult<Connector>;
    async fn delete_connector(&self, id: &str) -> StorageResult<()>;
    async fn list_connectors(&self) -> StorageResult<Vec<Connector>>;

    // -- Password (local connector only) --
    async fn create_password(&self, password: Password) -> StorageResult<()>;
    async fn get_password(&self, email: &str) -> StorageResult<Password>;
    async fn list_passwords(&self) -> StorageResult<Vec<Password>>;

    // -- AuthRequest --
    async fn create_auth_request(&self, req: AuthRequest) -> StorageResult<()>;
    async fn get_auth_request(&self, id: &str) -> StorageResult<AuthRequest>;
    async fn update_auth_request(
        &self,
        id: &str,
        mutator: Mutator<AuthRequest>,
    ) -> StorageResult<AuthRequest>;
    async fn delete_auth_request(&self, id: &str) -> StorageResult<()>;

    // -- AuthCode: create, get, single delete. No update; a code is
    // consumed exactly once and never mutated in place. --
    async fn create_auth_code(&self, code: AuthCode) -> StorageResult<()>;
    async fn get_auth_code(&self, id: &str) -> StorageResult<AuthCode>;
    async fn delete_auth_code(&self, id: &str) -> StorageResult<()>;

    // -- RefreshToken --
    async fn create_refresh_token(&self, token: RefreshToken) -> StorageResult<()>;
    async fn get_refresh_token(&self, id: &str) -> StorageResult<RefreshToken>;
    async fn update_refresh_token(
        &self,
        id: &str,
        mutator: Mutator<RefreshToken>,
    ) -> StorageResult<RefreshToken>;
    async fn delete_refresh_token(&self, id: &str) -> StorageResult<()>;

    // -- OfflineSession, keyed by "{user_id}:{connector_id}" --
    async fn get_offline_session(&self, key: &str) -> StorageResult<OfflineSession>;
    /// Creates the session if absent, otherwise applies `mutator` to the
    /// existing one.
    async fn upsert_offline_session(
        &self,
        key: &str,
        user_id: &str,
        connector_id: &str,
        mutator: Mutator<OfflineSession>,
    ) -> StorageResult<OfflineSession>;
    async fn delete_offline_session(&self, key: &str) -> StorageResult<()>;

    // -- Keys (singleton) --
    async fn get_keys(&self) -> StorageResult<Keys>;
    /// `mutator` receives `None` when the record does not yet exist;
    /// the signing key set is created lazily on first rotation.
    async fn update_keys(&self, mutator: Box<dyn FnOnce(Option<Keys>) -> StorageResult<Keys> + Send>)
    -> StorageResult<Keys>;

    // -- Garbage collection --
    async fn garbage_collect(&self, before: OffsetDateTime) -> StorageResult<GcCounts>;
}
