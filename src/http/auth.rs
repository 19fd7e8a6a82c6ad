//! `/api/auth`: sign-up, login, token refresh, e-mail confirmation and
//! password reset.

use super::AppState;
use super::extract::{ApiForm, ApiJson, ApiPath, BaseUrl, BearerToken, ClientIp};
use super::schemas::{
    EmailRequest, LoginForm, MessageResponse, NewPasswordForm, ResetRequestedResponse,
    SignupRequest, SignupResponse, TimeoutLink, TokenResponse, UserDb,
};
use crate::auth::Scope;
use crate::db::{NewUser, User};
use crate::error::ApiError;
use crate::mail::{self, EmailKind};
use crate::media::gravatar_url;
use crate::security::RouteClass;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tracing::info;
use validator::Validate;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/auth/signup", post(signup))
        .route("/api/auth/login", post(login))
        .route("/api/auth/refresh_token", get(refresh_token))
        .route("/api/auth/confirmed_email/:token", get(confirmed_email))
        .route("/api/auth/reset_password", post(request_password_reset))
        .route(
            "/api/auth/reset_password/:token",
            get(reset_password_form).post(reset_password),
        )
}

async fn signup(
    State(state): State<AppState>,
    BaseUrl(host): BaseUrl,
    ApiJson(body): ApiJson<SignupRequest>,
) -> Result<(StatusCode, Json<SignupResponse>), ApiError> {
    body.validate()?;
    if state.store.user_by_email(&body.email).await?.is_some() {
        return Err(ApiError::Conflict("Account already exists".into()));
    }

    let password_hash = state.auth.hash_password(&body.password).await?;
    let user = state
        .store
        .create_user(NewUser {
            avatar: Some(gravatar_url(&body.email)),
            username: body.username,
            email: body.email,
            password_hash,
        })
        .await?;
    info!(user_id = user.id, "User signed up");

    let token = state.auth.create_email_token(&user.email)?;
    mail::dispatch(
        state.mailer.clone(),
        EmailKind::Confirmation,
        mail::confirmation_email(&user.email, &user.username, &host, &token),
    );

    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            user: UserDb::from(user),
            detail: "User successfully created",
        }),
    ))
}

async fn login(
    State(state): State<AppState>,
    ApiForm(form): ApiForm<LoginForm>,
) -> Result<Json<TokenResponse>, ApiError> {
    let Some(user) = state.store.user_by_email(&form.username).await? else {
        return Err(ApiError::unauthorized("Invalid email"));
    };
    if !user.confirmed {
        return Err(ApiError::unauthorized("Email not confirmed"));
    }
    if !state
        .auth
        .verify_password(&form.password, &user.password_hash)
        .await
    {
        crate::metrics::record_auth_failure("password");
        return Err(ApiError::unauthorized("Invalid password"));
    }

    let pair = state.auth.create_token_pair(&user.email)?;
    state
        .store
        .update_refresh_token(user.id, Some(&pair.refresh_token))
        .await?;
    state.auth.forget_user(&user.email).await;

    Ok(Json(TokenResponse::bearer(pair.access_token, pair.refresh_token)))
}

async fn refresh_token(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
) -> Result<Json<TokenResponse>, ApiError> {
    let email = state.auth.decode_refresh_token(&token)?;
    let Some(user) = state.store.user_by_email(&email).await? else {
        return Err(ApiError::CredentialsRejected);
    };

    if user.refresh_token.as_deref() != Some(token.as_str()) {
        // A stale token was replayed: revoke the live one as well.
        state.store.update_refresh_token(user.id, None).await?;
        state.auth.forget_user(&user.email).await;
        crate::metrics::record_auth_failure("refresh_reuse");
        return Err(ApiError::unauthorized("Invalid refresh token"));
    }

    let pair = state.auth.create_token_pair(&email)?;
    state
        .store
        .update_refresh_token(user.id, Some(&pair.refresh_token))
        .await?;
    state.auth.forget_user(&user.email).await;

    Ok(Json(TokenResponse::bearer(pair.access_token, pair.refresh_token)))
}

async fn confirmed_email(
    State(state): State<AppState>,
    ApiPath(token): ApiPath<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let email = state.auth.email_from_token(&token, Scope::Email)?;
    let Some(user) = state.store.user_by_email(&email).await? else {
        return Err(ApiError::BadRequest("Verification error".into()));
    };
    if user.confirmed {
        return Ok(Json(MessageResponse::new("Your email is already confirmed")));
    }

    state.store.confirm_email(user.id).await?;
    state.auth.forget_user(&user.email).await;
    info!(user_id = user.id, "Email confirmed");
    Ok(Json(MessageResponse::new("Email confirmed")))
}

async fn request_password_reset(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    BaseUrl(host): BaseUrl,
    ApiJson(body): ApiJson<EmailRequest>,
) -> Result<Json<ResetRequestedResponse>, ApiError> {
    state.admit(RouteClass::PasswordReset, ip)?;
    body.validate()?;
    let Some(user) = state.store.user_by_email(&body.email).await? else {
        return Err(ApiError::unauthorized("Invalid email"));
    };

    let token = state.auth.create_reset_token(&user.email)?;
    let valid_secs = state.auth.reset_ttl_secs();
    mail::dispatch(
        state.mailer.clone(),
        EmailKind::PasswordReset,
        mail::reset_password_email(&user.email, &user.username, &host, &token, valid_secs),
    );

    Ok(Json(ResetRequestedResponse {
        message: "Password reset email sent",
        timeout_link: TimeoutLink {
            seconds: valid_secs,
        },
    }))
}

/// Resolve a reset token to a confirmed user.
async fn reset_target(state: &AppState, token: &str) -> Result<User, ApiError> {
    let email = state.auth.email_from_token(token, Scope::Reset)?;
    let Some(user) = state.store.user_by_email(&email).await? else {
        return Err(ApiError::BadRequest("Verification error".into()));
    };
    if !user.confirmed {
        return Err(ApiError::unauthorized("Email not confirmed"));
    }
    Ok(user)
}

async fn reset_password_form(
    State(state): State<AppState>,
    ApiPath(token): ApiPath<String>,
) -> Result<Html<&'static str>, ApiError> {
    reset_target(&state, &token).await?;
    Ok(Html(NEW_PASSWORD_PAGE))
}

async fn reset_password(
    State(state): State<AppState>,
    ApiPath(token): ApiPath<String>,
    ApiForm(form): ApiForm<NewPasswordForm>,
) -> Result<Json<Value>, ApiError> {
    let user = reset_target(&state, &token).await?;
    form.validate()?;

    let hash = state.auth.hash_password(&form.password).await?;
    state.store.update_password(user.id, &hash).await?;
    state.auth.forget_user(&user.email).await;
    info!(user_id = user.id, "Password reset");

    Ok(Json(json!({ "status": "ok" })))
}

/// Form posting `password` back to the URL it was served from.
const NEW_PASSWORD_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>Reset password</title>
</head>
<body>
  <h1>Choose a new password</h1>
  <form method="post">
    <label for="password">New password</label>
    <input type="password" id="password" name="password" minlength="6" maxlength="72" required>
    <button type="submit">Save</button>
  </form>
</body>
</html>
"#;
