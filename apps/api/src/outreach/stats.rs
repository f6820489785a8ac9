use serde::Serialize;

use crate::errors::AppError;
use crate::models::recipient::DeliveryStatus;
use crate::outreach::store::RecipientStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EmailStats {
    pub total: i64,
    pub sent: i64,
    pub failed: i64,
}

/// Three independent counts. Writes landing between the reads can make the
/// triple inconsistent; callers get an approximation, not a snapshot.
pub async fn get_stats(store: &dyn RecipientStore) -> Result<EmailStats, AppError> {
    let total = store.count_all().await?;
    let sent = store.count_by_status(DeliveryStatus::Sent).await?;
    let failed = store.count_by_status(DeliveryStatus::Failed).await?;
    Ok(EmailStats {
        total,
        sent,
        failed,
    })
}
