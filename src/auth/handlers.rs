use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::{
        dto::{
            AuthResponse, LoginRequest, MeResponse, ProfileResponse, RegisterRequest,
            UpdateProfileRequest,
        },
        extractors::{require_auth, AuthUser},
        repo_types::DirectoryEntry,
        services,
    },
    error::ApiError,
    state::AppState,
};

pub fn auth_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/auth/me", get(get_me))
        .route_layer(middleware::from_fn_with_state(state, require_auth))
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
}

pub fn profile_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/profile/me",
            get(get_profile).patch(update_profile).delete(deactivate),
        )
        .route("/directory", get(directory))
        .route_layer(middleware::from_fn_with_state(state, require_auth))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    let Json(payload) = payload?;
    let out = services::register(&state, payload).await?;
    Ok((StatusCode::CREATED, Json(out)))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<AuthResponse>, ApiError> {
    let Json(payload) = payload?;
    Ok(Json(services::login(&state, payload).await?))
}

#[instrument(skip(state, user), fields(user_id = %user.user_id))]
pub async fn get_me(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<MeResponse>, ApiError> {
    Ok(Json(services::current_user(&state, user.user_id).await?))
}

#[instrument(skip(state, user), fields(user_id = %user.user_id))]
pub async fn get_profile(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ProfileResponse>, ApiError> {
    Ok(Json(services::get_profile(&state, user.user_id).await?))
}

#[instrument(skip(state, user, payload), fields(user_id = %user.user_id))]
pub async fn update_profile(
    State(state): State<AppState>,
    user: AuthUser,
    payload: Result<Json<UpdateProfileRequest>, JsonRejection>,
) -> Result<Json<ProfileResponse>, ApiError> {
    let Json(payload) = payload?;
    Ok(Json(
        services::update_profile(&state, user.user_id, payload).await?,
    ))
}

#[instrument(skip(state, user), fields(user_id = %user.user_id))]
pub async fn deactivate(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<StatusCode, ApiError> {
    services::deactivate(&state, user.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip_all)]
pub async fn directory(
    State(state): State<AppState>,
    _user: AuthUser,
) -> Result<Json<Vec<DirectoryEntry>>, ApiError> {
    Ok(Json(services::directory(&state).await?))
}
