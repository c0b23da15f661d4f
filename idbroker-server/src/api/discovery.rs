use axum::{
    Json,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header::CACHE_CONTROL},
};
use idbroker_types::{JwksResponse, OidcDiscoveryDocument};
use log::info;
use time::OffsetDateTime;

use crate::state::AppState;

pub async fn discovery(State(state): State<AppState>) -> Json<OidcDiscoveryDocument> {
    info!("GET /.well-known/openid-configuration");
    let issuer = state.config.issuer.clone();
    Json(OidcDiscoveryDocument {
        issuer: issuer.clone(),
        authorization_endpoint: state.config.authorization_endpoint(),
        token_endpoint: state.config.token_endpoint(),
        userinfo_endpoint: format!("{issuer}/userinfo"),
        jwks_uri: state.config.jwks_uri(),
        introspection_endpoint: format!("{issuer}/token/introspect"),
        revocation_endpoint: format!("{issuer}/revoke"),
        device_authorization_endpoint: format!("{issuer}/device/auth"),
        grant_types_supported: vec![
            "authorization_code".to_string(),
            "refresh_token".to_string(),
            "client_credentials".to_string(),
            "urn:ietf:params:oauth:grant-type:token-exchange".to_string(),
        ],
        response_types_supported: vec!["code".to_string()],
        subject_types_supported: vec!["public".to_string()],
        id_token_signing_alg_values_supported: vec!["RS256".to_string()],
        scopes_supported: vec![
            "openid".to_string(),
            "profile".to_string(),
            "email".to_string(),
            "groups".to_string(),
            "offline_access".to_string(),
            "federated:id".to_string(),
        ],
        token_endpoint_auth_methods_supported: vec![
            "client_secret_post".to_string(),
            "client_secret_basic".to_string(),
            "none".to_string(),
        ],
        claims_supported: vec![
            "sub".to_string(),
            "email".to_string(),
            "email_verified".to_string(),
            "preferred_username".to_string(),
            "groups".to_string(),
        ],
    })
}

pub async fn jwks(State(state): State<AppState>) -> Result<(HeaderMap, Json<JwksResponse>), StatusCode> {
    let keys = state
        .storage
        .get_keys()
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;

    // Cached for however long the current signing key is still current —
    // past `next_rotation` a fetcher needs the new key, so the cache must
    // not outlive it.
    let max_age = (keys.next_rotation - OffsetDateTime::now_utc())
        .whole_seconds()
        .max(0);
    let mut headers = HeaderMap::new();
    headers.insert(
        CACHE_CONTROL,
        HeaderValue::from_str(&format!("max-age={max_age}")).unwrap(),
    );

    Ok((
        headers,
        Json(JwksResponse {
            keys: keys.all_public_keys(),
        }),
    ))
}

pub async fn healthz(State(state): State<AppState>) -> StatusCode {
    match state.storage.get_keys().await {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}
