use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A configured upstream connector (LDAP, SAML, OAuth, local password…).
///
/// `config` is an opaque JSON blob whose shape is owned by the connector
/// implementation named by `connector_type`; the core never interprets it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Connector {
    pub id: String,
    pub connector_type: String,
    pub name: String,
    /// Monotonic string integer, bumped on every update (optimistic concurrency).
    pub resource_version: String,
    pub config: serde_json::Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Connector {
    /// Returns a copy with `resource_version` strictly incremented.
    pub fn bump_resource_version(&self) -> String {
        let current: u64 = self.resource_version.parse().unwrap_or(0);
        (current + 1).to_string()
    }
}
