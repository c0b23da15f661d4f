use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Redirect},
};
use idbroker_types::{AuthRequest, PkceChallenge, random_token};
use log::info;
use time::{Duration, OffsetDateTime};

use idbroker_types::AuthorizeRequest;

use crate::error::{ApiError, ApiResult};
use crate::scopes;
use crate::state::AppState;

/// Request lifetime before garbage collection reclaims it unconsumed.
const AUTH_REQUEST_TTL: Duration = Duration::minutes(10);

/// `GET /auth`: validates the request, persists an `AuthRequest`, then
/// either redirects straight to the sole configured connector or, with
/// more than one, returns a minimal chooser as JSON.
pub async fn authorize(
    State(state): State<AppState>,
    Query(req): Query<AuthorizeRequest>,
) -> ApiResult<impl IntoResponse> {
    info!("GET /auth client_id={} scope={}", req.client_id, req.scope);
    let client = state.storage.get_client(&req.client_id).await.map_err(|_| {
        ApiError::InvalidClient(format!("unknown client `{}`", req.client_id))
    })?;

    // Unregistered redirect URIs are never followed: errors from here
    // down go back to the client via redirect, errors above never do.
    if !client.accepts_redirect_uri(&req.redirect_uri) {
        return Err(ApiError::InvalidRequest(
            "redirect_uri is not registered for this client".to_string(),
        ));
    }

    if req.response_type != "code" {
        return Ok(redirect_error(
            &req.redirect_uri,
            req.state.as_deref(),
            "unsupported_response_type",
        ));
    }

    let all_clients = state.storage.list_clients().await.map_err(ApiError::from)?;
    let scope_atoms = match scopes::validate(&req.scope, &client, &all_clients) {
        Ok(atoms) => atoms,
        Err(_) => return Ok(redirect_error(&req.redirect_uri, req.state.as_deref(), "invalid_scope")),
    };

    let pkce = match (&req.code_challenge, &req.code_challenge_method) {
        (Some(challenge), Some(method)) if method == "S256" || method == "plain" => {
            Some(PkceChallenge {
                method: method.clone(),
                challenge: challenge.clone(),
            })
        }
        (Some(_), _) => {
            return Ok(redirect_error(
                &req.redirect_uri,
                req.state.as_deref(),
                "invalid_request",
            ));
        }
        (None, _) => None,
    };

    let now = OffsetDateTime::now_utc();
    let auth_request = AuthRequest {
        id: random_token(),
        client_id: client.id.clone(),
        response_types: vec![req.response_type.clone()],
        scopes: scope_atoms.iter().map(|a| a.as_str()).collect(),
        redirect_uri: req.redirect_uri.clone(),
        nonce: req.nonce.clone(),
        state: req.state.clone(),
        force_approval_prompt: req.prompt.as_deref() == Some("consent"),
        expiry: now + AUTH_REQUEST_TTL,
        logged_in: false,
        claims: None,
        connector_id: None,
        connector_data: Vec::new(),
        pkce,
        hmac_key: random_token(),
    };
    state
        .storage
        .create_auth_request(auth_request.clone())
        .await
        .map_err(ApiError::from)?;

    let connector_ids = state.connectors.ids();
    if connector_ids.len() == 1 {
        let connector_id = connector_ids[0].to_string();
        Ok(Redirect::to(&format!("/auth/{connector_id}?req={}", auth_request.id)).into_response())
    } else {
        let choices: Vec<String> = connector_ids
            .iter()
            .map(|id| format!("/auth/{id}?req={}", auth_request.id))
            .collect();
        Ok(axum::Json(choices).into_response())
    }
}

#[derive(serde::Deserialize)]
pub struct AuthorizeConnectorParams {
    req: String,
}

/// `GET /auth/{connector_id}`: resolves the connector and redirects the
/// browser to its `login_url`, with `state` set to the `AuthRequest` id
/// so the subsequent `/callback/{connector_id}` can find it again.
pub async fn authorize_connector(
    State(state): State<AppState>,
    Path(connector_id): Path<String>,
    Query(params): Query<AuthorizeConnectorParams>,
) -> ApiResult<impl IntoResponse> {
    let auth_request = state
        .storage
        .get_auth_request(&params.req)
        .await
        .map_err(|_| ApiError::InvalidRequest("unknown or expired auth request".to_string()))?;

    if auth_request.is_expired(OffsetDateTime::now_utc()) {
        return Err(ApiError::InvalidRequest("auth request expired".to_string()));
    }

    let connector = state.connectors.get(&connector_id).map_err(|_| {
        ApiError::InvalidRequest(format!("unknown connector `{connector_id}`"))
    })?;

    let callback_url = format!("{}/callback/{connector_id}", state.config.issuer);
    let url = connector
        .login_url(&callback_url, &auth_request.id)
        .map_err(|e| ApiError::ServerError(e.to_string()))?;

    Ok(Redirect::to(&url))
}

pub(super) fn redirect_error(redirect_uri: &str, state: Option<&str>, error: &str) -> axum::response::Response {
    let mut url = redirect_uri.to_string();
    url.push_str(if url.contains('?') { "&" } else { "?" });
    url.push_str(&format!("error={error}"));
    if let Some(state) = state {
        url.push_str(&format!("&state={state}"));
    }
    Redirect::to(&url).into_response()
}
