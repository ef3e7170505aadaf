use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::{
        dto::{AuthResponse, LoginRequest, RegisterRequest},
        extractors::AuthUser,
        services::Registration,
    },
    error::ApiError,
    response::ApiResponse,
    state::AppState,
    users::dto::{PublicUser, UserEnvelope},
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/verify", get(verify))
}

/// Malformed JSON is a 400 in the same envelope as validation errors.
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

#[instrument(skip_all)]
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<AuthResponse>>), ApiError> {
    let body = json_body(payload)?;
    let outcome = state
        .auth
        .register(Registration {
            email: &body.email,
            password: &body.password,
            first_name: &body.first_name,
            last_name: &body.last_name,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::with_message(
            "User registered successfully",
            AuthResponse {
                token: outcome.token,
                user: PublicUser::from(&outcome.user),
            },
        )),
    ))
}

#[instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<AuthResponse>>, ApiError> {
    let body = json_body(payload)?;
    let outcome = state.auth.login(&body.email, &body.password).await?;

    Ok(Json(ApiResponse::with_message(
        "Login successful",
        AuthResponse {
            token: outcome.token,
            user: PublicUser::from(&outcome.user),
        },
    )))
}

#[instrument(skip_all, fields(user_id = auth.user_id))]
pub async fn logout(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    state.auth.logout(&auth.token, &auth.claims).await?;
    Ok(Json(ApiResponse::with_message("Logged out", ())))
}

/// Token check for clients restoring a session.
#[instrument(skip_all, fields(user_id = auth.user_id))]
pub async fn verify(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<ApiResponse<UserEnvelope>>, ApiError> {
    let user = state
        .users
        .find_by_id(auth.user_id)
        .await?
        .ok_or(ApiError::NotFound("User not found"))?;
    Ok(Json(ApiResponse::ok(UserEnvelope {
        user: PublicUser::from(&user),
    })))
}
