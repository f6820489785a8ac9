pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::auth::handlers as auth;
use crate::outreach::handlers as outreach;
use crate::state::AppState;

/// Uploads larger than this are rejected before parsing.
const UPLOAD_LIMIT_BYTES: usize = 10 * 1024 * 1024;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Auth
        .route("/auth/signup", post(auth::handle_signup))
        .route("/auth/login", post(auth::handle_login))
        .route("/auth/forgot-password", post(auth::handle_forgot_password))
        .route("/auth/reset-password", post(auth::handle_reset_password))
        // Outreach pipeline (bearer token required)
        .route(
            "/email/upload-csv",
            post(outreach::handle_upload_csv).layer(DefaultBodyLimit::max(UPLOAD_LIMIT_BYTES)),
        )
        .route("/email/send-emails", post(outreach::handle_send_emails))
        .route("/email/stats", get(outreach::handle_stats))
        .route("/email/recipients", get(outreach::handle_list_recipients))
        .with_state(state)
}
