//! Axum route handlers for signup, login and password reset.

use axum::{extract::State, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::auth::password::{hash_password_blocking, verify_password_blocking};
use crate::auth::users::{
    create_user, find_by_email, find_by_reset_token, generate_reset_token, replace_password,
    reset_token_ttl, reset_token_usable, set_reset_token,
};
use crate::auth::AuthError;
use crate::errors::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

fn require_credentials(req: &CredentialsRequest) -> Result<(), AppError> {
    if req.email.trim().is_empty() || req.password.is_empty() {
        return Err(AppError::Validation(
            "email and password are required".to_string(),
        ));
    }
    Ok(())
}

/// POST /auth/signup
pub async fn handle_signup(
    State(state): State<AppState>,
    Json(req): Json<CredentialsRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    require_credentials(&req)?;
    let email = req.email.trim();

    if find_by_email(&state.db, email).await?.is_some() {
        return Err(AuthError::UserExists.into());
    }

    let hash = hash_password_blocking(req.password).await?;
    let user = create_user(&state.db, email, &hash)
        .await?
        .ok_or(AuthError::UserExists)?;
    info!("Registered user {}", user.id);

    Ok(Json(TokenResponse {
        access_token: state.jwt.issue(user.id, &user.email)?,
    }))
}

/// POST /auth/login
pub async fn handle_login(
    State(state): State<AppState>,
    Json(req): Json<CredentialsRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    require_credentials(&req)?;

    let user = find_by_email(&state.db, req.email.trim())
        .await?
        .ok_or(AuthError::InvalidCredentials)?;
    if !verify_password_blocking(req.password, user.password_hash.clone()).await? {
        return Err(AuthError::InvalidCredentials.into());
    }

    Ok(Json(TokenResponse {
        access_token: state.jwt.issue(user.id, &user.email)?,
    }))
}

/// POST /auth/forgot-password
///
/// Stores a one-hour reset token. There is no outbound mail for this yet;
/// the link is written to the log.
pub async fn handle_forgot_password(
    State(state): State<AppState>,
    Json(req): Json<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let user = find_by_email(&state.db, req.email.trim())
        .await?
        .ok_or_else(|| AppError::Validation("User not found".to_string()))?;

    let token = generate_reset_token();
    let expires = Utc::now() + reset_token_ttl();
    set_reset_token(&state.db, user.id, &token, expires).await?;

    info!(
        "Password reset link: {}/reset-password/{token}",
        state.config.app_base_url.trim_end_matches('/')
    );

    Ok(Json(MessageResponse {
        message: "Reset link sent. Please check your email.".to_string(),
    }))
}

/// POST /auth/reset-password
pub async fn handle_reset_password(
    State(state): State<AppState>,
    Json(req): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    if req.new_password.is_empty() {
        return Err(AppError::Validation("newPassword is required".to_string()));
    }

    let user = find_by_reset_token(&state.db, &req.token)
        .await?
        .filter(|user| reset_token_usable(user, Utc::now()))
        .ok_or_else(|| AppError::Validation("Invalid or expired token".to_string()))?;

    let hash = hash_password_blocking(req.new_password).await?;
    replace_password(&state.db, user.id, &hash).await?;
    info!("Password reset for user {}", user.id);

    Ok(Json(MessageResponse {
        message: "Password has been reset successfully.".to_string(),
    }))
}
