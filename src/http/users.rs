//! `/api/users`: the authenticated user's own profile.

use super::AppState;
use super::extract::{ApiJson, ClientIp, CurrentUser};
use super::schemas::{ChangePasswordRequest, EmailRequest, UserDb};
use crate::error::ApiError;
use crate::security::RouteClass;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::routing::{get, patch};
use axum::{Json, Router};
use tracing::info;
use validator::Validate;

/// Largest accepted avatar upload.
const MAX_AVATAR_BYTES: usize = 5 * 1024 * 1024;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/users/me", get(read_me))
        .route(
            "/api/users/avatar",
            patch(update_avatar).layer(DefaultBodyLimit::max(MAX_AVATAR_BYTES + 64 * 1024)),
        )
        .route("/api/users/email", patch(update_email))
        .route("/api/users/password", patch(update_password))
}

async fn read_me(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    CurrentUser(user): CurrentUser,
) -> Result<Json<UserDb>, ApiError> {
    state.admit(RouteClass::UsersRead, ip)?;
    Ok(Json(user.into()))
}

async fn update_avatar(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    CurrentUser(user): CurrentUser,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UserDb>, ApiError> {
    state.admit(RouteClass::UsersRead, ip)?;
    let mut multipart = multipart.map_err(|e| ApiError::unprocessable(e.body_text()))?;

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::unprocessable(e.body_text()))?
    {
        if field.name() == Some("file") {
            let content_type = field.content_type().map(str::to_owned);
            let data = field
                .bytes()
                .await
                .map_err(|e| ApiError::unprocessable(e.body_text()))?;
            upload = Some((data.to_vec(), content_type));
            break;
        }
    }
    let Some((data, content_type)) = upload else {
        return Err(ApiError::unprocessable("file field is required"));
    };
    if data.len() > MAX_AVATAR_BYTES {
        return Err(ApiError::unprocessable("file is too large"));
    }

    let url = state.avatars.upload(user.id, data, content_type).await?;
    let updated = state
        .store
        .update_avatar(user.id, &url)
        .await?
        .ok_or(ApiError::CredentialsRejected)?;
    state.auth.forget_user(&user.email).await;
    info!(user_id = user.id, "Avatar updated");
    Ok(Json(updated.into()))
}

async fn update_email(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    CurrentUser(user): CurrentUser,
    ApiJson(body): ApiJson<EmailRequest>,
) -> Result<Json<UserDb>, ApiError> {
    state.admit(RouteClass::UsersSensitive, ip)?;
    body.validate()?;
    if body.email == user.email {
        return Ok(Json(user.into()));
    }

    let updated = state
        .store
        .update_email(user.id, &body.email)
        .await?
        .ok_or(ApiError::CredentialsRejected)?;
    state.auth.forget_user(&user.email).await;
    info!(user_id = user.id, "Email changed");
    Ok(Json(updated.into()))
}

async fn update_password(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    CurrentUser(user): CurrentUser,
    ApiJson(body): ApiJson<ChangePasswordRequest>,
) -> Result<Json<UserDb>, ApiError> {
    state.admit(RouteClass::UsersSensitive, ip)?;
    if !state
        .auth
        .verify_password(&body.old_password, &user.password_hash)
        .await
    {
        crate::metrics::record_auth_failure("password");
        return Err(ApiError::unauthorized("Invalid old password"));
    }
    body.validate()?;

    let hash = state.auth.hash_password(&body.new_password).await?;
    let updated = state
        .store
        .update_password(user.id, &hash)
        .await?
        .ok_or(ApiError::CredentialsRejected)?;
    state.auth.forget_user(&user.email).await;
    info!(user_id = user.id, "Password changed");
    Ok(Json(updated.into()))
}
