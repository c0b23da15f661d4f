use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use time::OffsetDateTime;

/// A relying party registered with this authorization server.
///
/// `id` is opaque and chosen at creation time (not a `Uuid`, to match the
/// OIDC convention of human-assignable `client_id` values like `web-app`).
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Client {
    pub id: String,
    pub secret: String,
    pub redirect_uris: Vec<String>,
    /// Client IDs allowed to request `audience:server:client_id:<this id>`.
    pub trusted_peers: Vec<String>,
    pub public: bool,
    pub name: String,
    pub logo_url: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Client {
    /// Exact string match against the registered set, with the two
    /// documented exceptions: the OOB literal, and (for public clients
    /// only) any `http://localhost` port.
    pub fn accepts_redirect_uri(&self, candidate: &str) -> bool {
        const OOB: &str = "urn:ietf:wg:oauth:2.0:oob";
        if candidate == OOB {
            return true;
        }
        if self.redirect_uris.iter().any(|u| u == candidate) {
            return true;
        }
        if self.public {
            if let Ok(url) = url::Url::parse(candidate) {
                return url.scheme() == "http" && url.host_str() == Some("localhost");
            }
        }
        false
    }

    pub fn trusts(&self, peer_client_id: &str) -> bool {
        self.trusted_peers.iter().any(|p| p == peer_client_id)
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("secret", &"[REDACTED]")
            .field("redirect_uris", &self.redirect_uris)
            .field("trusted_peers", &self.trusted_peers)
            .field("public", &self.public)
            .field("name", &self.name)
            .finish()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewClient {
    pub id: String,
    pub secret: String,
    pub redirect_uris: Vec<String>,
    pub trusted_peers: HashSet<String>,
    pub public: bool,
    pub name: String,
    pub logo_url: Option<String>,
}

/// A local password entry, consumed only by the `local` connector.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Password {
    pub email: String,
    pub password_hash: String,
    pub username: String,
    pub user_id: String,
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Password")
            .field("email", &self.email)
            .field("password_hash", &"[REDACTED]")
            .field("username", &self.username)
            .field("user_id", &self.user_id)
            .finish()
    }
}
