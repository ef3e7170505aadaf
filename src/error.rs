use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{error, warn};

use crate::{
    auth::{services::AuthError, validation::FieldError},
    users::repo_types::RepoError,
};

/// Everything a handler can fail with. 5xx variants carry internal detail
/// that is logged and never sent.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("validation failed")]
    Validation(Vec<FieldError>),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unauthorized: {0}")]
    Unauthorized(&'static str),
    #[error("conflict: {0}")]
    Conflict(&'static str),
    #[error("account locked")]
    Locked { retry_after_secs: u64 },
    #[error("not found: {0}")]
    NotFound(&'static str),
    #[error("rate limited")]
    RateLimited { retry_after_secs: u64 },
    #[error("internal: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<Vec<FieldError>>,
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Validation(fields) => Self::Validation(fields),
            AuthError::DuplicateEmail => Self::Conflict("Email already registered"),
            AuthError::InvalidCredentials => Self::Unauthorized("Invalid email or password"),
            AuthError::AccountLocked { retry_after_secs } => Self::Locked { retry_after_secs },
            AuthError::InvalidToken => Self::Unauthorized("Invalid or expired token"),
            AuthError::Storage(msg) => Self::Internal(format!("storage: {msg}")),
            AuthError::Hashing(msg) => Self::Internal(format!("hashing: {msg}")),
            AuthError::Token(e) => Self::Internal(format!("token: {e}")),
        }
    }
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        AuthError::from(e).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, errors, retry_after) = match self {
            ApiError::Validation(fields) => {
                warn!(fields = fields.len(), "validation failed");
                (
                    StatusCode::BAD_REQUEST,
                    "Validation failed".to_string(),
                    Some(fields),
                    None,
                )
            }
            ApiError::BadRequest(msg) => {
                warn!(%msg, "bad request");
                (StatusCode::BAD_REQUEST, msg, None, None)
            }
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.to_string(), None, None),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg.to_string(), None, None),
            ApiError::Locked { retry_after_secs } => (
                StatusCode::LOCKED,
                "Account temporarily locked due to too many failed login attempts".to_string(),
                None,
                Some(retry_after_secs),
            ),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.to_string(), None, None),
            ApiError::RateLimited { retry_after_secs } => (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many requests, please try again later".to_string(),
                None,
                Some(retry_after_secs),
            ),
            ApiError::Internal(detail) => {
                error!(error = %detail, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    None,
                    None,
                )
            }
        };

        let body = Json(ErrorBody {
            success: false,
            message,
            errors,
        });
        let mut response = (status, body).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}
