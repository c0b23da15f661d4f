use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::request::AuthClaims;

/// A long-lived refresh token.
///
/// The opaque value handed to the client is `"{id}.{token}"`; `id` is the
/// lookup key, `token` is the secret half compared on refresh.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct RefreshToken {
    pub id: String,
    pub token: String,
    pub obsolete_token: Option<String>,
    pub client_id: String,
    pub connector_id: String,
    pub scopes: Vec<String>,
    pub nonce: Option<String>,
    pub claims: AuthClaims,
    #[serde(default)]
    pub connector_data: Vec<u8>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_used: OffsetDateTime,
}

impl std::fmt::Debug for RefreshToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshToken")
            .field("id", &self.id)
            .field("token", &"[REDACTED]")
            .field("obsolete_token", &self.obsolete_token.as_ref().map(|_| "[REDACTED]"))
            .field("client_id", &self.client_id)
            .field("connector_id", &self.connector_id)
            .field("scopes", &self.scopes)
            .field("created_at", &self.created_at)
            .field("last_used", &self.last_used)
            .finish()
    }
}

impl RefreshToken {
    pub fn new(
        client_id: String,
        connector_id: String,
        scopes: Vec<String>,
        nonce: Option<String>,
        claims: AuthClaims,
        connector_data: Vec<u8>,
    ) -> (Self, String) {
        let id = random_token();
        let secret = random_token();
        let now = OffsetDateTime::now_utc();
        let opaque = format!("{id}.{secret}");
        (
            Self {
                id,
                token: secret,
                obsolete_token: None,
                client_id,
                connector_id,
                scopes,
                nonce,
                claims,
                connector_data,
                created_at: now,
                last_used: now,
            },
            opaque,
        )
    }

    /// Parses the opaque client-facing value into `(id, secret)`.
    pub fn parse_opaque(opaque: &str) -> Option<(&str, &str)> {
        opaque.split_once('.')
    }
}

pub fn random_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// A single client's hold on offline access for a `(user, connector)` pair.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefreshTokenRef {
    pub id: String,
    pub client_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_used: OffsetDateTime,
}

/// Per-(user, connector) record listing the clients holding refresh
/// tokens for that pair.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct OfflineSession {
    pub user_id: String,
    pub connector_id: String,
    pub refresh: std::collections::HashMap<String, RefreshTokenRef>,
    #[serde(default)]
    pub connector_data: Vec<u8>,
}

impl OfflineSession {
    pub fn new(user_id: String, connector_id: String) -> Self {
        Self {
            user_id,
            connector_id,
            refresh: std::collections::HashMap::new(),
            connector_data: Vec::new(),
        }
    }

    pub fn key(user_id: &str, connector_id: &str) -> String {
        format!("{user_id}:{connector_id}")
    }
}
