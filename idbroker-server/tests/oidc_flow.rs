//! End-to-end scenarios driven through the real `axum::Router`, in the
//! style of the pack's own `tower::ServiceExt::oneshot` tests: no mock
//! handlers, the full authorization-code dance against an in-memory
//! `Storage` and the `mock` connector.

use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header::LOCATION},
};
use idbroker_server::config::{ConnectorConfig, KeyRotationConfig, RefreshTokenPolicyConfig, ServerConfig};
use idbroker_server::state::AppState;
use idbroker_server::storage::Storage;
use serde_json::Value;
use time::OffsetDateTime;
use tower::ServiceExt;

async fn test_state(reuse_interval: Duration) -> AppState {
    let config = ServerConfig {
        issuer: "https://idp.example.com".to_string(),
        port: 0,
        database_url: None,
        connectors: vec![ConnectorConfig {
            id: "mock".to_string(),
            connector_type: "mock".to_string(),
            name: "Mock".to_string(),
            config: toml::Value::Table(Default::default()),
        }],
        refresh_policy: RefreshTokenPolicyConfig {
            rotation_enabled: true,
            absolute_lifetime: Duration::ZERO,
            valid_if_not_used_for: Duration::ZERO,
            reuse_interval,
        },
        key_rotation: KeyRotationConfig::default(),
        id_token_ttl: Duration::from_secs(3600),
        skip_approval: true,
        request_timeout: Duration::from_secs(30),
    };
    let state = idbroker_server::build_state(config).await.expect("build_state");

    let client = idbroker_types::Client {
        id: "test-client".to_string(),
        secret: "test-secret".to_string(),
        redirect_uris: vec!["https://client.example.com/cb".to_string()],
        trusted_peers: vec![],
        public: false,
        name: "Test Client".to_string(),
        logo_url: None,
        created_at: OffsetDateTime::now_utc(),
        updated_at: OffsetDateTime::now_utc(),
    };
    state.storage.create_client(client).await.expect("create_client");
    state
}

fn router(state: &AppState) -> Router {
    idbroker_server::api::router().with_state(state.clone())
}

fn location(response: &axum::response::Response) -> String {
    response
        .headers()
        .get(LOCATION)
        .expect("redirect should carry a Location header")
        .to_str()
        .unwrap()
        .to_string()
}

fn query_param<'a>(url: &'a str, key: &str) -> Option<&'a str> {
    let (_, query) = url.split_once('?')?;
    query
        .split('&')
        .find_map(|pair| pair.strip_prefix(&format!("{key}=")))
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Drives `/auth` through the mock connector's callback and returns the
/// authorization code landed on the client's `redirect_uri`.
async fn obtain_code(app: &Router, scope: &str) -> String {
    let auth_req = Request::builder()
        .uri(format!(
            "/auth?response_type=code&client_id=test-client&redirect_uri=https%3A%2F%2Fclient.example.com%2Fcb&scope={scope}"
        ))
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(auth_req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    let connector_url = location(&resp);

    let connector_req = Request::builder().uri(connector_url).body(Body::empty()).unwrap();
    let resp = app.clone().oneshot(connector_req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    let callback_url = location(&resp);

    let callback_req = Request::builder().uri(callback_url).body(Body::empty()).unwrap();
    let resp = app.clone().oneshot(callback_req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    let final_redirect = location(&resp);

    assert!(final_redirect.starts_with("https://client.example.com/cb"));
    query_param(&final_redirect, "code").unwrap().to_string()
}

async fn exchange_code(app: &Router, code: &str) -> (StatusCode, Value) {
    let body = format!(
        "grant_type=authorization_code&code={code}&client_id=test-client&client_secret=test-secret&redirect_uri=https%3A%2F%2Fclient.example.com%2Fcb"
    );
    let req = Request::builder()
        .method("POST")
        .uri("/token")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from(body))
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    (status, json_body(resp).await)
}

#[tokio::test]
async fn happy_authorization_code_flow_mints_tokens() {
    let state = test_state(Duration::from_secs(30)).await;
    let app = router(&state);

    let code = obtain_code(&app, "openid%20profile%20email").await;
    let (status, body) = exchange_code(&app, &code).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["token_type"], "Bearer");
    assert!(body["access_token"].as_str().unwrap().contains('.'), "looks like a JWT");
    assert_eq!(body["access_token"], body["id_token"]);
    assert!(body.get("refresh_token").is_none(), "no offline_access scope requested");

    let claims: idbroker_types::IdTokenClaims =
        idbroker_server::signer::verify(state.signer.as_ref(), body["id_token"].as_str().unwrap())
            .await
            .expect("id_token should verify against the server's own signing key");
    assert_eq!(claims.sub, "mock-user");
    assert_eq!(claims.aud, vec!["test-client".to_string()]);
}

#[tokio::test]
async fn double_spend_of_auth_code_fails_the_second_exchange() {
    let state = test_state(Duration::from_secs(30)).await;
    let app = router(&state);

    let code = obtain_code(&app, "openid").await;

    let (first_status, _) = exchange_code(&app, &code).await;
    assert_eq!(first_status, StatusCode::OK);

    let (second_status, second_body) = exchange_code(&app, &code).await;
    assert_eq!(second_status, StatusCode::BAD_REQUEST);
    assert_eq!(second_body["error"], "invalid_grant");
}

#[tokio::test]
async fn unregistered_redirect_uri_is_rejected_before_any_redirect() {
    let state = test_state(Duration::from_secs(30)).await;
    let app = router(&state);

    let req = Request::builder()
        .uri("/auth?response_type=code&client_id=test-client&redirect_uri=https%3A%2F%2Fevil.example.com%2Fcb&scope=openid")
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();

    // Unlike every other rejection in this flow, an unregistered
    // redirect_uri must not itself become a redirect target.
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = json_body(resp).await;
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn refresh_rotation_then_revoke_then_introspect_reports_inactive() {
    let state = test_state(Duration::from_secs(30)).await;
    let app = router(&state);

    let code = obtain_code(&app, "openid%20offline_access").await;
    let (status, body) = exchange_code(&app, &code).await;
    assert_eq!(status, StatusCode::OK);
    let refresh_token = body["refresh_token"].as_str().unwrap().to_string();

    let refresh_req = Request::builder()
        .method("POST")
        .uri("/token")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from(format!(
            "grant_type=refresh_token&refresh_token={refresh_token}&client_id=test-client&client_secret=test-secret"
        )))
        .unwrap();
    let resp = app.clone().oneshot(refresh_req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let rotated = json_body(resp).await;
    let new_refresh_token = rotated["refresh_token"].as_str().unwrap().to_string();
    assert_ne!(new_refresh_token, refresh_token, "rotation issues a fresh opaque value");

    let revoke_req = Request::builder()
        .method("POST")
        .uri("/revoke")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from(format!("token={new_refresh_token}")))
        .unwrap();
    let resp = app.clone().oneshot(revoke_req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let introspect_req = Request::builder()
        .method("POST")
        .uri("/token/introspect")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from(format!("token={new_refresh_token}")))
        .unwrap();
    let resp = app.clone().oneshot(introspect_req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let introspection: idbroker_types::IntrospectResponse = serde_json::from_value(json_body(resp).await).unwrap();
    assert!(!introspection.active, "a revoked refresh token must introspect as inactive");
}

#[tokio::test]
async fn replaying_an_obsolete_refresh_secret_outside_the_grace_window_revokes_the_session() {
    // reuse_interval = 0 makes any second call, which necessarily lands
    // at a later instant than the first, fall outside the grace window.
    let state = test_state(Duration::ZERO).await;
    let app = router(&state);

    let code = obtain_code(&app, "openid%20offline_access").await;
    let (_, body) = exchange_code(&app, &code).await;
    let first_opaque = body["refresh_token"].as_str().unwrap().to_string();

    let rotate = |app: Router, token: String| async move {
        let req = Request::builder()
            .method("POST")
            .uri("/token")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from(format!(
                "grant_type=refresh_token&refresh_token={token}&client_id=test-client&client_secret=test-secret"
            )))
            .unwrap();
        app.oneshot(req).await.unwrap()
    };

    let resp = rotate(app.clone(), first_opaque.clone()).await;
    assert_eq!(resp.status(), StatusCode::OK);

    // Replay the now-obsolete first secret: the reuse check fires and
    // deletes the refresh token, so this request fails...
    let resp = rotate(app.clone(), first_opaque.clone()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let err = json_body(resp).await;
    assert_eq!(err["error"], "invalid_grant");

    // ...and the legitimately-rotated token is gone too, since reuse
    // detection revokes the whole session, not just the reused secret.
    let introspect_req = Request::builder()
        .method("POST")
        .uri("/token/introspect")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from(format!("token={first_opaque}")))
        .unwrap();
    let resp = app.clone().oneshot(introspect_req).await.unwrap();
    let introspection: idbroker_types::IntrospectResponse =
        serde_json::from_value(json_body(resp).await).unwrap();
    assert!(!introspection.active);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn key_rotation_is_safe_under_replica_contention() {
    let storage = std::sync::Arc::new(idbroker_server::storage::memory::InMemoryStorage::new());
    let config = KeyRotationConfig::default();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let storage = storage.clone();
        let config = config.clone();
        handles.push(tokio::spawn(async move {
            idbroker_server::keys::rotate_once_blocking(storage.as_ref(), &config)
                .await
                .unwrap()
        }));
    }

    let mut rotated = 0;
    let mut already_rotated = 0;
    for handle in handles {
        match handle.await.unwrap() {
            idbroker_server::keys::RotationOutcome::Rotated => rotated += 1,
            idbroker_server::keys::RotationOutcome::AlreadyRotated => already_rotated += 1,
        }
    }

    // Exactly one replica observes `None` and provisions the key; every
    // other concurrent caller sees it already valid and backs off.
    assert_eq!(rotated, 1);
    assert_eq!(already_rotated, 7);

    let keys = storage.get_keys().await.unwrap();
    assert!(!keys.signing_key.kid.is_empty());
}
