use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::dto::{
    AuthResponse, LoginRequest, MeResponse, ProfileResponse, PublicUser, RegisterRequest,
    UpdateProfileRequest,
};
use crate::auth::jwt::JwtKeys;
use crate::auth::password::{hash_password, verify_against_dummy, verify_password};
use crate::auth::repo_types::{DirectoryEntry, NewUser, User};
use crate::error::ApiError;
use crate::state::AppState;

fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

// Argon2 is deliberately slow; keep it off the async workers.
async fn hash_blocking(plain: String) -> Result<String, ApiError> {
    tokio::task::spawn_blocking(move || hash_password(&plain))
        .await
        .map_err(|e| ApiError::internal(format!("hash task failed: {e}")))?
        .map_err(|e| ApiError::internal(format!("hash_password failed: {e}")))
}

/// `None` runs a dummy verification and reports a mismatch.
async fn verify_blocking(plain: String, hash: Option<String>) -> Result<bool, ApiError> {
    tokio::task::spawn_blocking(move || match hash {
        Some(hash) => verify_password(&plain, &hash),
        None => {
            verify_against_dummy(&plain);
            Ok(false)
        }
    })
    .await
    .map_err(|e| ApiError::internal(format!("verify task failed: {e}")))?
    .map_err(|e| ApiError::internal(format!("verify_password failed: {e}")))
}

fn auth_response(keys: &JwtKeys, user: User) -> Result<AuthResponse, ApiError> {
    let token = keys
        .issue(user.id, &user.unit_number)
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(AuthResponse {
        token,
        user: PublicUser {
            id: user.id,
            unit_number: user.unit_number,
        },
    })
}

pub async fn register(state: &AppState, req: RegisterRequest) -> Result<AuthResponse, ApiError> {
    let email = normalize_email(&req.email);
    let unit_number = req.unit_number.trim().to_string();
    if email.is_empty() || unit_number.is_empty() || req.password.is_empty() {
        return Err(ApiError::validation(
            "email, unit_number and password are required",
        ));
    }

    state.users.ensure_schema().await?;

    if state.users.find_by_email(&email).await?.is_some() {
        warn!(email = %email, "email already registered");
        return Err(ApiError::Conflict("email already registered".into()));
    }

    let hashed = hash_blocking(req.password).await?;
    // A concurrent registration can still win the race; the store reports it
    // as a conflict.
    let user = state
        .users
        .insert(NewUser::resident(email, unit_number, hashed))
        .await?;

    info!(user_id = %user.id, email = %user.email, unit = %user.unit_number, "user registered");
    auth_response(&state.jwt, user)
}

pub async fn login(state: &AppState, req: LoginRequest) -> Result<AuthResponse, ApiError> {
    let email = normalize_email(&req.email);
    if email.is_empty() || req.password.is_empty() {
        return Err(ApiError::validation("email and password are required"));
    }

    state.users.ensure_schema().await?;

    let Some(user) = state.users.find_by_email(&email).await? else {
        verify_blocking(req.password, None).await?;
        warn!(email = %email, "login unknown email");
        return Err(ApiError::invalid_credentials());
    };

    if !verify_blocking(req.password, Some(user.hashed_password.clone())).await? {
        warn!(user_id = %user.id, "login invalid password");
        return Err(ApiError::invalid_credentials());
    }

    if !user.is_active() {
        warn!(user_id = %user.id, status = %user.status, "login on inactive account");
        return Err(ApiError::Unauthorized("account is not active".into()));
    }

    info!(user_id = %user.id, email = %user.email, "user logged in");
    auth_response(&state.jwt, user)
}

async fn load_user(state: &AppState, user_id: Uuid) -> Result<User, ApiError> {
    state
        .users
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("user not found".into()))
}

pub async fn current_user(state: &AppState, user_id: Uuid) -> Result<MeResponse, ApiError> {
    Ok(load_user(state, user_id).await?.into())
}

pub async fn get_profile(state: &AppState, user_id: Uuid) -> Result<ProfileResponse, ApiError> {
    Ok(load_user(state, user_id).await?.into())
}

pub async fn update_profile(
    state: &AppState,
    user_id: Uuid,
    req: UpdateProfileRequest,
) -> Result<ProfileResponse, ApiError> {
    let mut user = load_user(state, user_id).await?;
    if let Some(url) = req.profile_picture_url {
        let url = url.trim().to_string();
        user.profile_picture_url = (!url.is_empty()).then_some(url);
    }
    if let Some(opt_in) = req.directory_opt_in {
        user.is_directory_opt_in = opt_in;
    }

    let updated = state
        .users
        .update(&user)
        .await?
        .ok_or_else(|| ApiError::NotFound("user not found".into()))?;
    info!(user_id = %updated.id, "profile updated");
    Ok(updated.into())
}

pub async fn deactivate(state: &AppState, user_id: Uuid) -> Result<(), ApiError> {
    if !state.users.soft_delete(user_id).await? {
        return Err(ApiError::NotFound("user not found".into()));
    }
    info!(user_id = %user_id, "account deactivated");
    Ok(())
}

pub async fn directory(state: &AppState) -> Result<Vec<DirectoryEntry>, ApiError> {
    Ok(state.users.list_directory().await?)
}
