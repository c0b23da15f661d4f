use axum::{Form, Json, extract::State};
use idbroker_types::{
    IdTokenClaims, IntrospectRequest, IntrospectResponse, OfflineSession, RefreshToken,
    RefreshTokenRef, RevokeRequest, TokenRequest, TokenResponse,
};
use log::info;
use time::OffsetDateTime;

use crate::error::{ApiError, ApiResult};
use crate::refresh_policy;
use crate::signer;
use crate::state::AppState;

/// `POST /token`: dispatches on `grant_type`.
pub async fn token(
    State(state): State<AppState>,
    Form(req): Form<TokenRequest>,
) -> ApiResult<Json<TokenResponse>> {
    info!("POST /token grant_type={}", req.grant_type);
    match req.grant_type.as_str() {
        "authorization_code" => authorization_code_grant(&state, req).await,
        "refresh_token" => refresh_token_grant(&state, req).await,
        "client_credentials" => client_credentials_grant(&state, req).await,
        "urn:ietf:params:oauth:grant-type:token-exchange" => token_exchange_grant(&state, req).await,
        other => Err(ApiError::UnsupportedGrantType(other.to_string())),
    }
}

async fn authenticate_client(
    state: &AppState,
    client_id: &Option<String>,
    client_secret: &Option<String>,
) -> ApiResult<idbroker_types::Client> {
    let client_id = client_id
        .clone()
        .ok_or_else(|| ApiError::InvalidClient("missing client_id".to_string()))?;
    let client = state
        .storage
        .get_client(&client_id)
        .await
        .map_err(|_| ApiError::InvalidClient("unknown client".to_string()))?;
    if !client.public {
        let secret = client_secret
            .as_deref()
            .ok_or_else(|| ApiError::InvalidClient("missing client_secret".to_string()))?;
        if secret != client.secret {
            return Err(ApiError::InvalidClient("bad client_secret".to_string()));
        }
    }
    Ok(client)
}

async fn authorization_code_grant(
    state: &AppState,
    req: TokenRequest,
) -> ApiResult<Json<TokenResponse>> {
    let code_id = req
        .code
        .ok_or_else(|| ApiError::InvalidRequest("missing code".to_string()))?;
    let code = state
        .storage
        .get_auth_code(&code_id)
        .await
        .map_err(|_| ApiError::InvalidGrant("unknown or already-used code".to_string()))?;

    // Single-use: the delete is the commit point, not the read above.
    // Two concurrent exchanges can both pass `get_auth_code`; only the
    // one whose `delete_auth_code` actually removes the record may mint
    // tokens, so its result is the thing that gates everything below.
    state
        .storage
        .delete_auth_code(&code_id)
        .await
        .map_err(|_| ApiError::InvalidGrant("unknown or already-used code".to_string()))?;

    if OffsetDateTime::now_utc() > code.expiry {
        return Err(ApiError::InvalidGrant("code expired".to_string()));
    }

    let client_id = req.client_id.clone().unwrap_or_else(|| code.client_id.clone());
    let client = authenticate_client(state, &Some(client_id), &req.client_secret).await?;
    if client.id != code.client_id {
        return Err(ApiError::InvalidGrant("code was not issued to this client".to_string()));
    }

    if let Some(redirect_uri) = &req.redirect_uri {
        if redirect_uri != &code.redirect_uri {
            return Err(ApiError::InvalidGrant("redirect_uri mismatch".to_string()));
        }
    }

    if let Some(pkce) = &code.pkce {
        let verifier = req
            .code_verifier
            .as_deref()
            .ok_or_else(|| ApiError::InvalidGrant("missing code_verifier".to_string()))?;
        verify_pkce(pkce, verifier)?;
    }

    let wants_offline = code.scopes.iter().any(|s| s == "offline_access");

    let mut refresh_token_opaque = None;
    if wants_offline {
        let (rt, opaque) = RefreshToken::new(
            client.id.clone(),
            code.connector_id.clone(),
            code.scopes.clone(),
            code.nonce.clone(),
            code.claims.clone(),
            code.connector_data.clone(),
        );
        state.storage.create_refresh_token(rt.clone()).await.map_err(ApiError::from)?;
        register_offline_session(state, &rt).await?;
        refresh_token_opaque = Some(opaque);
    }

    let response = mint_tokens(
        state,
        &client.id,
        &code.claims,
        code.nonce.as_deref(),
        refresh_token_opaque,
    )
    .await?;
    Ok(Json(response))
}

async fn refresh_token_grant(state: &AppState, req: TokenRequest) -> ApiResult<Json<TokenResponse>> {
    let opaque = req
        .refresh_token
        .ok_or_else(|| ApiError::InvalidRequest("missing refresh_token".to_string()))?;
    let (token_id, secret) = RefreshToken::parse_opaque(&opaque)
        .ok_or_else(|| ApiError::InvalidGrant("malformed refresh_token".to_string()))?;

    let client = authenticate_client(state, &req.client_id, &req.client_secret).await?;

    let (token, new_opaque) =
        refresh_policy::rotate(state.storage.as_ref(), token_id, secret, &state.config.refresh_policy)
            .await
            .map_err(|e| ApiError::InvalidGrant(e.to_string()))?;

    if token.client_id != client.id {
        return Err(ApiError::InvalidGrant("refresh_token was not issued to this client".to_string()));
    }

    // `scope` on a refresh grant may only narrow what was originally
    // granted, never widen it; a narrowed request sticks for future
    // refreshes of this same token.
    if let Some(requested) = &req.scope {
        let requested: Vec<String> = requested.split_whitespace().map(str::to_string).collect();
        if let Some(widened) = requested.iter().find(|s| !token.scopes.iter().any(|g| g == *s)) {
            return Err(ApiError::InvalidScope(format!(
                "cannot widen refresh scope with `{widened}`"
            )));
        }
        if requested != token.scopes {
            let narrowed = requested.clone();
            state
                .storage
                .update_refresh_token(
                    &token.id,
                    Box::new(move |mut t: RefreshToken| {
                        t.scopes = narrowed;
                        Ok(t)
                    }),
                )
                .await
                .map_err(ApiError::from)?;
        }
    }

    // Re-derive current claims from the connector when it supports it,
    // so long-lived sessions reflect group/profile changes upstream.
    let claims = match state.connectors.get(&token.connector_id) {
        Ok(connector) => match connector.refresh(&token.connector_data).await {
            Ok(login) => idbroker_types::AuthClaims {
                subject: login.identity.user_id,
                username: login.identity.username,
                preferred_username: login.identity.preferred_username,
                email: login.identity.email,
                email_verified: login.identity.email_verified,
                groups: login.identity.groups,
            },
            Err(_) => token.claims.clone(),
        },
        Err(_) => token.claims.clone(),
    };

    let response = mint_tokens(state, &client.id, &claims, token.nonce.as_deref(), Some(new_opaque)).await?;
    Ok(Json(response))
}

async fn client_credentials_grant(
    state: &AppState,
    req: TokenRequest,
) -> ApiResult<Json<TokenResponse>> {
    let client = authenticate_client(state, &req.client_id, &req.client_secret).await?;
    if client.public {
        return Err(ApiError::UnauthorizedClient(
            "public clients cannot use client_credentials".to_string(),
        ));
    }
    let claims = idbroker_types::AuthClaims {
        subject: client.id.clone(),
        username: client.name.clone(),
        preferred_username: client.name.clone(),
        email: String::new(),
        email_verified: false,
        groups: Vec::new(),
    };
    let response = mint_tokens(state, &client.id, &claims, None, None).await?;
    Ok(Json(response))
}

/// RFC 8693 token exchange, sketched: accepts a previously-issued
/// access token as `subject_token` and re-mints one scoped to the
/// requesting (trusted) client, implementing the `audience:server:
/// client_id:<peer>` cross-client scope atom end to end.
async fn token_exchange_grant(state: &AppState, req: TokenRequest) -> ApiResult<Json<TokenResponse>> {
    let subject_token = req
        .subject_token
        .ok_or_else(|| ApiError::InvalidRequest("missing subject_token".to_string()))?;
    let client = authenticate_client(state, &req.client_id, &req.client_secret).await?;

    let claims: IdTokenClaims = signer::verify(state.signer.as_ref(), &subject_token)
        .await
        .map_err(ApiError::from)?;

    let original_client_id = claims
        .aud
        .first()
        .ok_or_else(|| ApiError::InvalidGrant("subject_token has no audience".to_string()))?;
    let peer = state
        .storage
        .get_client(original_client_id)
        .await
        .map_err(|_| ApiError::InvalidGrant("subject_token audience is unknown".to_string()))?;
    if !peer.trusts(&client.id) {
        return Err(ApiError::AccessDenied(format!(
            "client `{}` is not trusted by `{original_client_id}`",
            client.id
        )));
    }

    let exchanged = idbroker_types::AuthClaims {
        subject: claims.sub,
        username: claims.preferred_username.clone().unwrap_or_default(),
        preferred_username: claims.preferred_username.unwrap_or_default(),
        email: claims.email.unwrap_or_default(),
        email_verified: claims.email_verified.unwrap_or(false),
        groups: claims.groups.unwrap_or_default(),
    };
    let response = mint_tokens(state, &client.id, &exchanged, None, None).await?;
    Ok(Json(response))
}

async fn mint_tokens(
    state: &AppState,
    audience: &str,
    claims: &idbroker_types::AuthClaims,
    nonce: Option<&str>,
    refresh_token: Option<String>,
) -> ApiResult<TokenResponse> {
    let now = OffsetDateTime::now_utc();
    let ttl = state.config.id_token_ttl;
    let id_claims = IdTokenClaims {
        iss: state.config.issuer.clone(),
        sub: claims.subject.clone(),
        aud: vec![audience.to_string()],
        exp: (now + time::Duration::try_from(ttl).unwrap_or(time::Duration::MAX)).unix_timestamp(),
        iat: now.unix_timestamp(),
        nonce: nonce.map(str::to_string),
        email: (!claims.email.is_empty()).then(|| claims.email.clone()),
        email_verified: Some(claims.email_verified),
        preferred_username: (!claims.preferred_username.is_empty())
            .then(|| claims.preferred_username.clone()),
        groups: (!claims.groups.is_empty()).then(|| claims.groups.clone()),
        federated_id: None,
    };
    // This server mints self-encoded access tokens carrying the same
    // claims as the ID token rather than an opaque reference, so a
    // single signature covers both.
    let id_token = signer::sign(state.signer.as_ref(), &id_claims)
        .await
        .map_err(ApiError::from)?;

    Ok(TokenResponse {
        access_token: id_token.clone(),
        id_token,
        token_type: "Bearer".to_string(),
        refresh_token,
        expires_in: ttl.as_secs() as i64,
    })
}

fn verify_pkce(challenge: &idbroker_types::PkceChallenge, verifier: &str) -> ApiResult<()> {
    let ok = match challenge.method.as_str() {
        "plain" => verifier == challenge.challenge,
        "S256" => {
            use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
            use sha2::{Digest, Sha256};
            let digest = Sha256::digest(verifier.as_bytes());
            URL_SAFE_NO_PAD.encode(digest) == challenge.challenge
        }
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(ApiError::InvalidGrant("PKCE verification failed".to_string()))
    }
}

async fn register_offline_session(state: &AppState, token: &RefreshToken) -> ApiResult<()> {
    let key = OfflineSession::key(&token.claims.subject, &token.connector_id);
    let client_id = token.client_id.clone();
    let token_id = token.id.clone();
    let created_at = token.created_at;
    state
        .storage
        .upsert_offline_session(
            &key,
            &token.claims.subject,
            &token.connector_id,
            Box::new(move |mut session| {
                session.refresh.insert(
                    client_id.clone(),
                    RefreshTokenRef {
                        id: token_id,
                        client_id,
                        created_at,
                        last_used: created_at,
                    },
                );
                Ok(session)
            }),
        )
        .await
        .map_err(ApiError::from)?;
    Ok(())
}

/// `POST /token/introspect` (RFC 7662). Accepts access tokens (signed
/// JWTs) and refresh tokens (opaque `{id}.{secret}`) alike.
pub async fn introspect(
    State(state): State<AppState>,
    Form(req): Form<IntrospectRequest>,
) -> ApiResult<Json<IntrospectResponse>> {
    if let Ok(claims) = signer::verify::<IdTokenClaims>(state.signer.as_ref(), &req.token).await {
        return Ok(Json(IntrospectResponse {
            active: true,
            sub: Some(claims.sub),
            aud: claims.aud.first().cloned(),
            exp: Some(claims.exp),
            iat: Some(claims.iat),
            client_id: claims.aud.first().cloned(),
            token_type: Some("Bearer".to_string()),
            token_use: Some("access_token".to_string()),
            email: claims.email,
            groups: claims.groups,
        }));
    }

    if let Some((id, secret)) = RefreshToken::parse_opaque(&req.token) {
        if let Ok(token) = state.storage.get_refresh_token(id).await {
            let active = token.token == secret;
            return Ok(Json(IntrospectResponse {
                active,
                sub: active.then(|| token.claims.subject.clone()),
                client_id: active.then(|| token.client_id.clone()),
                token_type: active.then(|| "Bearer".to_string()),
                token_use: active.then(|| "refresh_token".to_string()),
                email: active.then(|| token.claims.email.clone()),
                groups: active.then(|| token.claims.groups.clone()),
                ..Default::default()
            }));
        }
    }

    Ok(Json(IntrospectResponse::default()))
}

/// `POST /revoke`: best-effort, RFC 7009 style — revoking an unknown
/// or already-revoked token is not an error.
pub async fn revoke(State(state): State<AppState>, Form(req): Form<RevokeRequest>) -> ApiResult<()> {
    if let Some((id, secret)) = RefreshToken::parse_opaque(&req.token) {
        if let Ok(token) = state.storage.get_refresh_token(id).await {
            if token.token == secret {
                state.storage.delete_refresh_token(id).await.ok();
                let session_key = OfflineSession::key(&token.claims.subject, &token.connector_id);
                let client_id = token.client_id.clone();
                if let Ok(session) = state.storage.get_offline_session(&session_key).await {
                    let remaining = session.refresh.iter().filter(|(_, r)| r.client_id != client_id).count();
                    if remaining == 0 {
                        state.storage.delete_offline_session(&session_key).await.ok();
                    } else {
                        state
                            .storage
                            .upsert_offline_session(
                                &session_key,
                                &session.user_id,
                                &session.connector_id,
                                Box::new(move |mut s| {
                                    s.refresh.retain(|_, r| r.client_id != client_id);
                                    Ok(s)
                                }),
                            )
                            .await
                            .ok();
                    }
                }
            }
        }
    }
    Ok(())
}
