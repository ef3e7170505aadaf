use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use tracing::warn;

use super::{claims::Claims, services::AuthService};
use crate::error::ApiError;

/// Verified caller identity for protected routes.
pub struct AuthUser {
    pub user_id: i64,
    pub claims: Claims,
    /// Kept so logout can revoke exactly this token.
    pub token: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    AuthService: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or(ApiError::Unauthorized("Access token required"))?;

        // Expect "Bearer <token>"
        let token = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(ApiError::Unauthorized("Access token required"))?;

        let auth = AuthService::from_ref(state);
        let claims = auth.verify(token).await.map_err(|e| {
            warn!(error = %e, "bearer token rejected");
            ApiError::from(e)
        })?;

        Ok(AuthUser {
            user_id: claims.sub,
            claims,
            token: token.to_owned(),
        })
    }
}
