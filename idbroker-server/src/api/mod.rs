use axum::{
    Router,
    routing::{get, post},
};

use crate::state::AppState;

mod approval;
mod authorize;
mod callback;
mod device;
mod discovery;
mod token;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/.well-known/openid-configuration", get(discovery::discovery))
        .route("/keys", get(discovery::jwks))
        .route("/healthz", get(discovery::healthz))
        .route("/auth", get(authorize::authorize))
        .route("/auth/{connector_id}", get(authorize::authorize_connector))
        .route("/callback", get(callback::callback).post(callback::callback))
        .route(
            "/callback/{connector_id}",
            get(callback::callback_connector).post(callback::callback_connector),
        )
        .route("/approval", get(approval::show).post(approval::submit))
        .route("/token", post(token::token))
        .route("/token/introspect", post(token::introspect))
        .route("/revoke", post(token::revoke))
        .route("/device", get(device::device))
        .route("/device/auth", post(device::device_auth))
        .route("/device/token", post(device::device_token))
        .route("/device/callback", get(device::device_callback))
}
