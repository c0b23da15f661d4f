//! Local username/password connector, backed directly by `Storage`'s
//! `Password` table. Hashes and verifies credentials with `argon2`,
//! going through the same `ConnectorAdapter` seam as every other
//! identity source instead of being a special case in the token handler.

use std::collections::HashMap;
use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordVerifier,
};
use async_trait::async_trait;
use idbroker_types::Identity;

use crate::config::ConnectorConfig;
use crate::storage::Storage;

use super::{ConnectorAdapter, ConnectorError, ConnectorResult, LoginResult};

pub struct LocalPasswordConnector {
    id: String,
    storage: Arc<dyn Storage>,
}

impl LocalPasswordConnector {
    pub fn from_config(cfg: &ConnectorConfig, storage: Arc<dyn Storage>) -> anyhow::Result<Self> {
        Ok(Self {
            id: cfg.id.clone(),
            storage,
        })
    }

    async fn verify(&self, email: &str, password: &str) -> ConnectorResult<LoginResult> {
        let entry = self
            .storage
            .get_password(email)
            .await
            .map_err(|_| ConnectorError::LoginFailed("unknown account".to_string()))?;

        let parsed_hash = PasswordHash::new(&entry.password_hash)
            .map_err(|e| ConnectorError::Upstream(format!("corrupt password hash: {e}")))?;

        Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .map_err(|_| ConnectorError::LoginFailed("invalid credentials".to_string()))?;

        Ok(LoginResult {
            identity: Identity {
                user_id: entry.user_id,
                username: entry.username.clone(),
                preferred_username: entry.username,
                email: entry.email,
                email_verified: true,
                groups: Vec::new(),
                connector_data: Vec::new(),
            },
            connector_data: Vec::new(),
        })
    }
}

#[async_trait]
impl ConnectorAdapter for LocalPasswordConnector {
    fn id(&self) -> &str {
        &self.id
    }

    /// The local connector has no interactive upstream: the callback
    /// URL is this server's own login form, not an external IdP.
    fn login_url(&self, callback_url: &str, state: &str) -> ConnectorResult<String> {
        Ok(format!("{callback_url}/login?state={state}"))
    }

    async fn handle_callback(
        &self,
        query: &HashMap<String, String>,
    ) -> ConnectorResult<LoginResult> {
        let email = query
            .get("email")
            .ok_or_else(|| ConnectorError::LoginFailed("missing email".to_string()))?;
        let password = query
            .get("password")
            .ok_or_else(|| ConnectorError::LoginFailed("missing password".to_string()))?;
        self.verify(email, password).await
    }

    async fn password_login(&self, username: &str, password: &str) -> ConnectorResult<LoginResult> {
        self.verify(username, password).await
    }
}
