use serde::{Deserialize, Serialize};

/// What a connector asserts about the user after a successful login.
///
/// `connector_data` is opaque to the core; it is persisted on the
/// `AuthRequest`/`RefreshToken` and handed back to the connector on a
/// later `Refresh` call so the connector can re-fetch claims without a
/// fresh interactive login.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Identity {
    /// Stable per-connector subject identifier.
    pub user_id: String,
    pub username: String,
    pub preferred_username: String,
    pub email: String,
    pub email_verified: bool,
    pub groups: Vec<String>,
    #[serde(default)]
    pub connector_data: Vec<u8>,
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("user_id", &self.user_id)
            .field("username", &self.username)
            .field("preferred_username", &self.preferred_username)
            .field("email", &self.email)
            .field("email_verified", &self.email_verified)
            .field("groups", &self.groups)
            .field("connector_data", &format!("[{} bytes]", self.connector_data.len()))
            .finish()
    }
}
