use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PkceChallenge {
    /// `plain` or `S256`.
    pub method: String,
    pub challenge: String,
}

/// Claims captured from the connector at callback time and carried through
/// to the minted ID token.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AuthClaims {
    pub subject: String,
    pub username: String,
    pub preferred_username: String,
    pub email: String,
    pub email_verified: bool,
    pub groups: Vec<String>,
}

/// Server-side record of an in-flight authorization request.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct AuthRequest {
    pub id: String,
    pub client_id: String,
    pub response_types: Vec<String>,
    pub scopes: Vec<String>,
    pub redirect_uri: String,
    pub nonce: Option<String>,
    pub state: Option<String>,
    pub force_approval_prompt: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub expiry: OffsetDateTime,
    pub logged_in: bool,
    pub claims: Option<AuthClaims>,
    pub connector_id: Option<String>,
    #[serde(default)]
    pub connector_data: Vec<u8>,
    pub pkce: Option<PkceChallenge>,
    pub hmac_key: String,
}

impl std::fmt::Debug for AuthRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthRequest")
            .field("id", &self.id)
            .field("client_id", &self.client_id)
            .field("response_types", &self.response_types)
            .field("scopes", &self.scopes)
            .field("redirect_uri", &self.redirect_uri)
            .field("state", &self.state)
            .field("expiry", &self.expiry)
            .field("logged_in", &self.logged_in)
            .field("connector_id", &self.connector_id)
            .field("hmac_key", &"[REDACTED]")
            .finish()
    }
}

/// Single-use code exchanged at `/token`. Snapshot of the
/// `AuthRequest` taken at consent time.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct AuthCode {
    pub id: String,
    pub client_id: String,
    pub scopes: Vec<String>,
    pub redirect_uri: String,
    pub nonce: Option<String>,
    pub claims: AuthClaims,
    pub connector_id: String,
    #[serde(default)]
    pub connector_data: Vec<u8>,
    pub pkce: Option<PkceChallenge>,
    #[serde(with = "time::serde::rfc3339")]
    pub expiry: OffsetDateTime,
}

impl std::fmt::Debug for AuthCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthCode")
            .field("id", &"[REDACTED]")
            .field("client_id", &self.client_id)
            .field("scopes", &self.scopes)
            .field("connector_id", &self.connector_id)
            .field("expiry", &self.expiry)
            .finish()
    }
}

impl AuthRequest {
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now > self.expiry
    }

    pub fn scopes_contain(&self, atom: &str) -> bool {
        self.scopes.iter().any(|s| s == atom)
    }
}
