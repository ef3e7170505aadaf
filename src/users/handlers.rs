use axum::{
    extract::{rejection::JsonRejection, Query, State},
    routing::get,
    Json, Router,
};
use tracing::{info, instrument};

use crate::{
    auth::{
        extractors::AuthUser,
        handlers::json_body,
        validation::{validate_names, PROFILE_NAME_MIN},
    },
    db::now_utc,
    error::ApiError,
    response::ApiResponse,
    state::AppState,
    users::dto::{
        PageQuery, Pagination, PublicUser, Stats, UpdateProfileRequest, UserEnvelope, UsersPage,
    },
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users/profile", get(profile).put(update_profile))
        .route("/users/all", get(list_users))
        .route("/users/stats", get(stats))
}

#[instrument(skip_all, fields(user_id = auth.user_id))]
pub async fn profile(
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

#[instrument(skip_all, fields(user_id = auth.user_id))]
pub async fn update_profile(
    State(state): State<AppState>,
    auth: AuthUser,
    payload: Result<Json<UpdateProfileRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<UserEnvelope>>, ApiError> {
    let body = json_body(payload)?;
    let first_name = body.first_name.trim();
    let last_name = body.last_name.trim();

    validate_names(first_name, last_name, PROFILE_NAME_MIN).map_err(ApiError::Validation)?;

    let user = state
        .users
        .update_profile(auth.user_id, first_name, last_name)
        .await?
        .ok_or(ApiError::NotFound("User not found"))?;
    info!("profile updated");

    Ok(Json(ApiResponse::with_message(
        "Profile updated successfully",
        UserEnvelope {
            user: PublicUser::from(&user),
        },
    )))
}

#[instrument(skip_all, fields(user_id = _auth.user_id))]
pub async fn list_users(
    State(state): State<AppState>,
    _auth: AuthUser,
    Query(query): Query<PageQuery>,
) -> Result<Json<ApiResponse<UsersPage>>, ApiError> {
    let (page, limit, offset) = query.resolve();
    let users = state.users.list_active(limit, offset).await?;
    let total = state.users.count_active().await?;

    Ok(Json(ApiResponse::ok(UsersPage {
        users: users.iter().map(PublicUser::from).collect(),
        pagination: Pagination::new(page, limit, total),
    })))
}

#[instrument(skip_all, fields(user_id = _auth.user_id))]
pub async fn stats(
    State(state): State<AppState>,
    _auth: AuthUser,
) -> Result<Json<ApiResponse<Stats>>, ApiError> {
    let total_users = state.users.count_active().await?;
    Ok(Json(ApiResponse::ok(Stats {
        total_users,
        timestamp: now_utc(),
    })))
}
