use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use idbroker_types::OAuthErrorBody;
use thiserror::Error;

use crate::storage::StorageError;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// The §7 error taxonomy. Every handler maps its failures into one of
/// these rather than leaking a storage/connector/signer error type.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("invalid_request: {0}")]
    InvalidRequest(String),

    #[error("invalid_client: {0}")]
    InvalidClient(String),

    #[error("invalid_grant: {0}")]
    InvalidGrant(String),

    #[error("unauthorized_client: {0}")]
    UnauthorizedClient(String),

    #[error("unsupported_grant_type: {0}")]
    UnsupportedGrantType(String),

    #[error("invalid_scope: {0}")]
    InvalidScope(String),

    #[error("access_denied: {0}")]
    AccessDenied(String),

    #[error("server_error: {0}")]
    ServerError(String),

    #[error("temporarily_unavailable: {0}")]
    TemporarilyUnavailable(String),

    #[error("not_found")]
    NotFound,

    #[error("already_exists")]
    AlreadyExists,
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound => ApiError::NotFound,
            StorageError::AlreadyExists => ApiError::AlreadyExists,
            StorageError::Backend(msg) => ApiError::ServerError(msg),
        }
    }
}

impl From<crate::signer::SignerError> for ApiError {
    fn from(e: crate::signer::SignerError) -> Self {
        use crate::signer::SignerError::*;
        match e {
            NoSigningKey => {
                ApiError::TemporarilyUnavailable("signing key not yet provisioned".to_string())
            }
            UnknownKeyId | BadSignature | Expired => {
                ApiError::InvalidGrant("token signature invalid or expired".to_string())
            }
            Storage(msg) => ApiError::ServerError(msg),
            Encode(msg) | Decode(msg) => ApiError::ServerError(msg),
        }
    }
}

impl ApiError {
    /// The OIDC error code as it appears in JSON bodies and redirect
    /// query parameters.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidRequest(_) => "invalid_request",
            ApiError::InvalidClient(_) => "invalid_client",
            ApiError::InvalidGrant(_) => "invalid_grant",
            ApiError::UnauthorizedClient(_) => "unauthorized_client",
            ApiError::UnsupportedGrantType(_) => "unsupported_grant_type",
            ApiError::InvalidScope(_) => "invalid_scope",
            ApiError::AccessDenied(_) => "access_denied",
            ApiError::ServerError(_) => "server_error",
            ApiError::TemporarilyUnavailable(_) => "temporarily_unavailable",
            ApiError::NotFound => "not_found",
            ApiError::AlreadyExists => "already_exists",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest(_)
            | ApiError::InvalidGrant(_)
            | ApiError::UnsupportedGrantType(_)
            | ApiError::InvalidScope(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidClient(_) => StatusCode::UNAUTHORIZED,
            ApiError::UnauthorizedClient(_) | ApiError::AccessDenied(_) => StatusCode::FORBIDDEN,
            ApiError::ServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::TemporarilyUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::AlreadyExists => StatusCode::CONFLICT,
        }
    }

    /// Never echoes internal detail for `ServerError` back to the client.
    fn description(&self) -> Option<String> {
        match self {
            ApiError::InvalidRequest(m)
            | ApiError::InvalidClient(m)
            | ApiError::InvalidGrant(m)
            | ApiError::UnauthorizedClient(m)
            | ApiError::UnsupportedGrantType(m)
            | ApiError::InvalidScope(m)
            | ApiError::AccessDenied(m)
            | ApiError::TemporarilyUnavailable(m) => Some(m.clone()),
            ApiError::ServerError(_) | ApiError::NotFound | ApiError::AlreadyExists => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::ServerError(ref msg) = self {
            log::error!("server_error: {msg}");
        }
        let status = self.status();
        let body = OAuthErrorBody {
            error: self.code().to_string(),
            error_description: self.description(),
            error_uri: None,
        };
        (status, Json(body)).into_response()
    }
}
