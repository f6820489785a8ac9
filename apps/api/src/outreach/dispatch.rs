use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::errors::AppError;
use crate::models::recipient::{DeliveryStatus, RecipientRecord};
use crate::outreach::store::RecipientStore;
use crate::queue::{SendTask, TaskQueue};

/// How dispatch moves recipients from the store onto the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Atomically flips `pending` to `enqueued` before enqueueing, so a
    /// record is queued at most once no matter how often dispatch runs.
    Claim,
    /// Reads `pending` and enqueues each record without changing it. Two
    /// calls before any send completes queue every record twice.
    Repeat,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown dispatch mode '{0}'")]
pub struct UnknownDispatchMode(String);

impl FromStr for DispatchMode {
    type Err = UnknownDispatchMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "claim" => Ok(DispatchMode::Claim),
            "repeat" => Ok(DispatchMode::Repeat),
            other => Err(UnknownDispatchMode(other.to_string())),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DispatchResponse {
    pub message: String,
    pub enqueued: usize,
}

/// Enqueues one send task per pending recipient. Does not wait for delivery.
pub async fn dispatch_pending(
    store: &dyn RecipientStore,
    queue: &dyn TaskQueue,
    mode: DispatchMode,
) -> Result<DispatchResponse, AppError> {
    let enqueued = match mode {
        DispatchMode::Repeat => dispatch_repeat(store, queue).await?,
        DispatchMode::Claim => dispatch_claimed(store, queue).await?,
    };
    info!("Dispatched {enqueued} send tasks ({mode:?} mode)");

    Ok(DispatchResponse {
        message: "Emails added to queue for processing!".to_string(),
        enqueued,
    })
}

async fn dispatch_repeat(
    store: &dyn RecipientStore,
    queue: &dyn TaskQueue,
) -> Result<usize, AppError> {
    let pending = store.find_by_status(DeliveryStatus::Pending).await?;
    for record in &pending {
        queue.enqueue(&SendTask::from(record)).await?;
    }
    Ok(pending.len())
}

async fn dispatch_claimed(
    store: &dyn RecipientStore,
    queue: &dyn TaskQueue,
) -> Result<usize, AppError> {
    let claimed = store.claim_pending().await?;
    for (idx, record) in claimed.iter().enumerate() {
        if let Err(e) = queue.enqueue(&SendTask::from(record)).await {
            release_claims(store, &claimed[idx..]).await;
            return Err(e.into());
        }
    }
    Ok(claimed.len())
}

/// Puts records whose tasks never reached the queue back to `pending`.
async fn release_claims(store: &dyn RecipientStore, records: &[RecipientRecord]) {
    for record in records {
        if let Err(e) = store.release_claim(&record.email).await {
            warn!(
                email = %record.email,
                "Failed to release dispatch claim, record stays enqueued: {e}"
            );
        }
    }
    warn!("Released {} dispatch claims after an enqueue failure", records.len());
}
