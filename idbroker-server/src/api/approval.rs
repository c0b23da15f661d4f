use axum::{
    Form,
    extract::{Query, State},
    response::{IntoResponse, Redirect},
};
use idbroker_types::{AuthCode, AuthRequest, ApprovalRequest, random_token};
use time::{Duration, OffsetDateTime};

use super::authorize::redirect_error;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Codes are single-use and short-lived: just long enough for the
/// client to complete the token exchange.
const AUTH_CODE_TTL: Duration = Duration::minutes(1);

#[derive(serde::Deserialize)]
pub struct ShowParams {
    req: String,
}

/// `GET /approval?req=<id>`: a minimal consent prompt. There is no
/// templating engine in this server, so this hands back the bare facts
/// a UI would need (client name, requested scopes) as JSON; a fuller
/// deployment would render this server-side or proxy to a frontend.
pub async fn show(
    State(state): State<AppState>,
    Query(params): Query<ShowParams>,
) -> ApiResult<impl IntoResponse> {
    let auth_request = state
        .storage
        .get_auth_request(&params.req)
        .await
        .map_err(|_| ApiError::InvalidRequest("unknown or expired auth request".to_string()))?;

    if !auth_request.logged_in {
        return Err(ApiError::InvalidRequest(
            "auth request has not completed an interactive login".to_string(),
        ));
    }

    let client = state
        .storage
        .get_client(&auth_request.client_id)
        .await
        .map_err(ApiError::from)?;

    Ok(axum::Json(serde_json::json!({
        "req": auth_request.id,
        "client_name": client.name,
        "scopes": auth_request.scopes,
    })))
}

/// `POST /approval`: the user's yes/no decision.
pub async fn submit(
    State(state): State<AppState>,
    Form(form): Form<ApprovalRequest>,
) -> ApiResult<impl IntoResponse> {
    let auth_request = state
        .storage
        .get_auth_request(&form.req)
        .await
        .map_err(|_| ApiError::InvalidRequest("unknown or expired auth request".to_string()))?;

    if form.approval != "allow" {
        return Ok(redirect_error(
            &auth_request.redirect_uri,
            auth_request.state.as_deref(),
            "access_denied",
        ));
    }

    Ok(finish(&state, auth_request).await?)
}

/// Issues the `AuthCode`, consumes the `AuthRequest`, and redirects to
/// the client with `?code=...&state=...`. Shared by the explicit
/// approval POST and the `skip_approval` fast path from `/callback`.
pub(super) async fn finish(
    state: &AppState,
    auth_request: AuthRequest,
) -> ApiResult<axum::response::Response> {
    let claims = auth_request
        .claims
        .clone()
        .ok_or_else(|| ApiError::ServerError("auth request missing claims at approval".to_string()))?;
    let connector_id = auth_request
        .connector_id
        .clone()
        .ok_or_else(|| ApiError::ServerError("auth request missing connector at approval".to_string()))?;

    let code = AuthCode {
        id: random_token(),
        client_id: auth_request.client_id.clone(),
        scopes: auth_request.scopes.clone(),
        redirect_uri: auth_request.redirect_uri.clone(),
        nonce: auth_request.nonce.clone(),
        claims,
        connector_id,
        connector_data: auth_request.connector_data.clone(),
        pkce: auth_request.pkce.clone(),
        expiry: OffsetDateTime::now_utc() + AUTH_CODE_TTL,
    };
    state.storage.create_auth_code(code.clone()).await.map_err(ApiError::from)?;
    state.storage.delete_auth_request(&auth_request.id).await.ok();

    let mut url = auth_request.redirect_uri.clone();
    url.push_str(if url.contains('?') { "&" } else { "?" });
    url.push_str(&format!("code={}", code.id));
    if let Some(client_state) = &auth_request.state {
        url.push_str(&format!("&state={client_state}"));
    }
    Ok(Redirect::to(&url).into_response())
}
