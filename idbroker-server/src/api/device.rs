//! RFC 8628 device flow, acknowledged but not built.
//!
//! `idbroker-types::{DeviceRequest, DeviceToken}` carry the shape a real
//! implementation would persist in `Storage`; these four handlers exist
//! so the route table carries every device-flow path and return `501`
//! with a body saying so rather than `404`, which would read as "this
//! server doesn't know about device flow" instead of "not implemented yet".

use axum::{Json, http::StatusCode};
use idbroker_types::OAuthErrorBody;

fn not_implemented() -> (StatusCode, Json<OAuthErrorBody>) {
    (
        StatusCode::NOT_IMPLEMENTED,
        Json(OAuthErrorBody {
            error: "not_implemented".to_string(),
            error_description: Some(
                "device flow is acknowledged but not implemented by this server".to_string(),
            ),
            error_uri: None,
        }),
    )
}

/// `GET /device`: the user-facing page where a device code is entered.
pub async fn device() -> (StatusCode, Json<OAuthErrorBody>) {
    not_implemented()
}

/// `POST /device/auth`: RFC 8628 device authorization request, would
/// create a `DeviceRequest` and hand back `device_code`/`user_code`.
pub async fn device_auth() -> (StatusCode, Json<OAuthErrorBody>) {
    not_implemented()
}

/// `POST /device/token`: polling endpoint a device uses while the user
/// completes the flow on a second screen.
pub async fn device_token() -> (StatusCode, Json<OAuthErrorBody>) {
    not_implemented()
}

/// `GET /device/callback`: where the second-screen browser lands after
/// approving a pending `DeviceRequest`.
pub async fn device_callback() -> (StatusCode, Json<OAuthErrorBody>) {
    not_implemented()
}
