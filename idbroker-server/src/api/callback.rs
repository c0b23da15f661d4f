use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Redirect},
};
use idbroker_types::{AuthClaims, CallbackParams};
use log::info;
use time::OffsetDateTime;

use super::authorize::redirect_error;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// `GET /callback/{connector_id}`: the connector hands control back
/// here with `state` set to the `AuthRequest` id created at `/auth`.
pub async fn callback_connector(
    State(state): State<AppState>,
    Path(connector_id): Path<String>,
    Query(params): Query<CallbackParams>,
) -> ApiResult<impl IntoResponse> {
    info!("GET /callback/{connector_id}");
    let req_id = params
        .state
        .clone()
        .ok_or_else(|| ApiError::InvalidRequest("missing state".to_string()))?;

    let auth_request = state
        .storage
        .get_auth_request(&req_id)
        .await
        .map_err(|_| ApiError::InvalidRequest("unknown or expired auth request".to_string()))?;

    if auth_request.is_expired(OffsetDateTime::now_utc()) {
        return Err(ApiError::InvalidRequest("auth request expired".to_string()));
    }

    if let Some(error) = &params.error {
        return Ok(redirect_error(
            &auth_request.redirect_uri,
            auth_request.state.as_deref(),
            error,
        ));
    }

    let connector = state
        .connectors
        .get(&connector_id)
        .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;

    let mut query_map = HashMap::new();
    if let Some(code) = &params.code {
        query_map.insert("code".to_string(), code.clone());
    }

    let login = connector
        .handle_callback(&query_map)
        .await
        .map_err(|e| ApiError::AccessDenied(e.to_string()))?;

    let claims = AuthClaims {
        subject: login.identity.user_id,
        username: login.identity.username,
        preferred_username: login.identity.preferred_username,
        email: login.identity.email,
        email_verified: login.identity.email_verified,
        groups: login.identity.groups,
    };

    let updated = state
        .storage
        .update_auth_request(
            &auth_request.id,
            Box::new(move |mut r| {
                r.logged_in = true;
                r.claims = Some(claims);
                r.connector_id = Some(connector_id.clone());
                r.connector_data = login.connector_data.clone();
                Ok(r)
            }),
        )
        .await
        .map_err(ApiError::from)?;

    if state.config.skip_approval && !updated.force_approval_prompt {
        Ok(super::approval::finish(&state, updated).await?)
    } else {
        Ok(Redirect::to(&format!("/approval?req={}", updated.id)).into_response())
    }
}

/// Legacy single-connector callback (no `{connector_id}` path segment):
/// only valid when exactly one connector is configured.
pub async fn callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> ApiResult<impl IntoResponse> {
    let ids = state.connectors.ids();
    if ids.len() != 1 {
        return Err(ApiError::InvalidRequest(
            "ambiguous callback: specify /callback/{connector_id}".to_string(),
        ));
    }
    let connector_id = ids[0].to_string();
    callback_connector(State(state), Path(connector_id), Query(params)).await
}
