use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// RFC 8628 device flow. Sketched only; no handler behavior is
/// implemented beyond acknowledging the shape.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceRequest {
    pub device_code: String,
    pub user_code: String,
    pub client_id: String,
    pub scopes: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub expiry: OffsetDateTime,
    pub poll_interval_secs: u32,
    pub auth_code_id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceToken {
    pub device_code: String,
    pub status: DeviceTokenStatus,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeviceTokenStatus {
    Pending,
    SlowDown,
    Approved,
    Denied,
    Expired,
}
