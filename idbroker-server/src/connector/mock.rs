//! Fixed-identity connector for local development and end-to-end
//! testing. No upstream round trip: `login_url` points straight back
//! at this server's own callback with the configured identity baked
//! into the query string.

use std::collections::HashMap;

use async_trait::async_trait;
use idbroker_types::Identity;
use serde::Deserialize;

use crate::config::ConnectorConfig;

use super::{ConnectorAdapter, ConnectorError, ConnectorResult, LoginResult};

#[derive(Clone, Debug, Deserialize)]
struct MockConfig {
    #[serde(default = "default_user_id")]
    user_id: String,
    #[serde(default = "default_username")]
    username: String,
    #[serde(default = "default_email")]
    email: String,
    #[serde(default)]
    groups: Vec<String>,
}

fn default_user_id() -> String {
    "mock-user".to_string()
}
fn default_username() -> String {
    "mockuser".to_string()
}
fn default_email() -> String {
    "mockuser@example.com".to_string()
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            user_id: default_user_id(),
            username: default_username(),
            email: default_email(),
            groups: Vec::new(),
        }
    }
}

pub struct MockConnector {
    id: String,
    config: MockConfig,
}

impl MockConnector {
    pub fn from_config(cfg: &ConnectorConfig) -> anyhow::Result<Self> {
        let as_json = serde_json::to_value(&cfg.config)?;
        let config: MockConfig = serde_json::from_value(as_json)?;
        Ok(Self {
            id: cfg.id.clone(),
            config,
        })
    }
}

#[async_trait]
impl ConnectorAdapter for MockConnector {
    fn id(&self) -> &str {
        &self.id
    }

    fn login_url(&self, callback_url: &str, state: &str) -> ConnectorResult<String> {
        Ok(format!("{callback_url}?state={state}&code=mock-auth-code"))
    }

    async fn handle_callback(
        &self,
        query: &HashMap<String, String>,
    ) -> ConnectorResult<LoginResult> {
        if query.get("code").map(String::as_str) != Some("mock-auth-code") {
            return Err(ConnectorError::LoginFailed(
                "missing or unrecognized mock code".to_string(),
            ));
        }
        Ok(self.identity())
    }

    async fn refresh(&self, _connector_data: &[u8]) -> ConnectorResult<LoginResult> {
        Ok(self.identity())
    }
}

impl MockConnector {
    fn identity(&self) -> LoginResult {
        LoginResult {
            identity: Identity {
                user_id: self.config.user_id.clone(),
                username: self.config.username.clone(),
                preferred_username: self.config.username.clone(),
                email: self.config.email.clone(),
                email_verified: true,
                groups: self.config.groups.clone(),
                connector_data: Vec::new(),
            },
            connector_data: Vec::new(),
        }
    }
}
