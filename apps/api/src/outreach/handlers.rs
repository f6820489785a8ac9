//! Axum route handlers for the outreach pipeline. Every handler requires a
//! bearer token; all recipients share one global pool.

use axum::{
    extract::{Multipart, Query, State},
    Json,
};
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::recipient::{DeliveryStatus, RecipientRecord};
use crate::outreach::dispatch::{dispatch_pending, DispatchResponse};
use crate::outreach::ingest::{ingest_csv, IngestResponse};
use crate::outreach::stats::{get_stats, EmailStats};
use crate::outreach::store::RecipientFilter;
use crate::state::AppState;

const UPLOAD_FIELD: &str = "file";
const DEFAULT_PAGE_SIZE: i64 = 100;
const MAX_PAGE_SIZE: i64 = 1000;

#[derive(Debug, Deserialize)]
pub struct RecipientQuery {
    pub status: Option<DeliveryStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// POST /email/upload-csv
pub async fn handle_upload_csv(
    State(state): State<AppState>,
    user: AuthUser,
    mut multipart: Multipart,
) -> Result<Json<IngestResponse>, AppError> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Malformed multipart body: {e}")))?
    {
        if field.name() == Some(UPLOAD_FIELD) {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| AppError::Validation(format!("Could not read upload: {e}")))?;
            upload = Some(bytes);
            break;
        }
    }

    let bytes = upload.ok_or_else(|| {
        AppError::Validation(format!("Multipart field '{UPLOAD_FIELD}' is required"))
    })?;
    tracing::info!(
        "User {} ({}) uploaded {} bytes of CSV",
        user.id,
        user.email,
        bytes.len()
    );

    let response = ingest_csv(state.recipients.as_ref(), &bytes).await?;
    Ok(Json(response))
}

/// POST /email/send-emails
pub async fn handle_send_emails(
    State(state): State<AppState>,
    _user: AuthUser,
) -> Result<Json<DispatchResponse>, AppError> {
    let response = dispatch_pending(
        state.recipients.as_ref(),
        state.queue.as_ref(),
        state.config.dispatch_mode,
    )
    .await?;
    Ok(Json(response))
}

/// GET /email/stats
pub async fn handle_stats(
    State(state): State<AppState>,
    _user: AuthUser,
) -> Result<Json<EmailStats>, AppError> {
    Ok(Json(get_stats(state.recipients.as_ref()).await?))
}

/// GET /email/recipients
pub async fn handle_list_recipients(
    State(state): State<AppState>,
    _user: AuthUser,
    Query(query): Query<RecipientQuery>,
) -> Result<Json<Vec<RecipientRecord>>, AppError> {
    let filter = RecipientFilter {
        status: query.status,
        limit: query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        offset: query.offset.unwrap_or(0).max(0),
    };
    Ok(Json(state.recipients.list(filter).await?))
}
