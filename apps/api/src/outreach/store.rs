//! Recipient Store: the single shared mutable resource of the outreach pipeline.
//!
//! Every write is a single statement, so Postgres row-level atomicity is the
//! only concurrency control. Nothing here composes reads and writes into a
//! larger transaction.

use async_trait::async_trait;
use sqlx::postgres::PgDatabaseError;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::models::recipient::{DeliveryStatus, NewRecipient, RecipientRecord, RecipientRow};

#[derive(Debug, Error)]
pub enum StoreError {
    /// A batch insert collided with the email uniqueness constraint.
    /// Carries the database's own diagnostic text.
    #[error("{0}")]
    DuplicateKey(String),

    /// A point update matched no recipient.
    #[error("no recipient with email {0}")]
    NotFound(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Paging and filtering for recipient inspection.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecipientFilter {
    pub status: Option<DeliveryStatus>,
    pub limit: i64,
    pub offset: i64,
}

#[async_trait]
pub trait RecipientStore: Send + Sync {
    /// Inserts every row with status `pending`. All or nothing: a duplicate
    /// email, inside the batch or against existing rows, rejects the batch.
    async fn insert_many(&self, recipients: &[NewRecipient]) -> Result<u64, StoreError>;

    async fn find_by_status(&self, status: DeliveryStatus)
        -> Result<Vec<RecipientRecord>, StoreError>;

    /// Point update keyed by email. `error_detail` is dropped unless the new
    /// status is `failed`. Returns `NotFound` when no record matches.
    async fn update_status_by_email(
        &self,
        email: &str,
        status: DeliveryStatus,
        error_detail: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn count_all(&self) -> Result<i64, StoreError>;

    async fn count_by_status(&self, status: DeliveryStatus) -> Result<i64, StoreError>;

    /// Atomically flips every `pending` record to `enqueued` and returns the
    /// flipped records. Concurrent callers never receive the same record.
    async fn claim_pending(&self) -> Result<Vec<RecipientRecord>, StoreError>;

    /// Returns an `enqueued` record to `pending`. Returns whether a record moved.
    async fn release_claim(&self, email: &str) -> Result<bool, StoreError>;

    async fn list(&self, filter: RecipientFilter) -> Result<Vec<RecipientRecord>, StoreError>;
}

/// Only `failed` records may carry an error detail.
pub(crate) fn detail_for(status: DeliveryStatus, error_detail: Option<&str>) -> Option<String> {
    match status {
        DeliveryStatus::Failed => error_detail.map(str::to_string),
        _ => None,
    }
}

pub struct PgRecipientStore {
    pool: PgPool,
}

impl PgRecipientStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn into_records(rows: Vec<RecipientRow>) -> Result<Vec<RecipientRecord>, StoreError> {
    rows.into_iter()
        .map(|row| {
            RecipientRecord::try_from(row)
                .map_err(|e| StoreError::Database(sqlx::Error::Decode(Box::new(e))))
        })
        .collect()
}

fn map_insert_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            let detail = db
                .try_downcast_ref::<PgDatabaseError>()
                .and_then(|pg| pg.detail())
                .map(|d| format!("{}: {d}", db.message()))
                .unwrap_or_else(|| db.message().to_string());
            return StoreError::DuplicateKey(detail);
        }
    }
    StoreError::Database(err)
}

#[async_trait]
impl RecipientStore for PgRecipientStore {
    async fn insert_many(&self, recipients: &[NewRecipient]) -> Result<u64, StoreError> {
        if recipients.is_empty() {
            return Ok(0);
        }

        let ids: Vec<Uuid> = recipients.iter().map(|_| Uuid::new_v4()).collect();
        let names: Vec<String> = recipients.iter().map(|r| r.name.clone()).collect();
        let emails: Vec<String> = recipients.iter().map(|r| r.email.clone()).collect();

        // One statement, so an in-batch duplicate aborts the whole insert too.
        let result = sqlx::query(
            r#"
            INSERT INTO recipients (id, name, email)
            SELECT * FROM UNNEST($1::uuid[], $2::text[], $3::text[])
            "#,
        )
        .bind(&ids)
        .bind(&names)
        .bind(&emails)
        .execute(&self.pool)
        .await
        .map_err(map_insert_error)?;

        Ok(result.rows_affected())
    }

    async fn find_by_status(
        &self,
        status: DeliveryStatus,
    ) -> Result<Vec<RecipientRecord>, StoreError> {
        let rows = sqlx::query_as::<_, RecipientRow>("SELECT * FROM recipients WHERE status = $1")
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;
        into_records(rows)
    }

    async fn update_status_by_email(
        &self,
        email: &str,
        status: DeliveryStatus,
        error_detail: Option<&str>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE recipients
            SET status = $2, error_detail = $3, updated_at = now()
            WHERE email = $1
            "#,
        )
        .bind(email)
        .bind(status.as_str())
        .bind(detail_for(status, error_detail))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(email.to_string()));
        }
        Ok(())
    }

    async fn count_all(&self) -> Result<i64, StoreError> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM recipients")
            .fetch_one(&self.pool)
            .await?)
    }

    async fn count_by_status(&self, status: DeliveryStatus) -> Result<i64, StoreError> {
        Ok(
            sqlx::query_scalar("SELECT COUNT(*) FROM recipients WHERE status = $1")
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await?,
        )
    }

    async fn claim_pending(&self) -> Result<Vec<RecipientRecord>, StoreError> {
        let rows = sqlx::query_as::<_, RecipientRow>(
            r#"
            UPDATE recipients
            SET status = 'enqueued', updated_at = now()
            WHERE status = 'pending'
            RETURNING *
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        into_records(rows)
    }

    async fn release_claim(&self, email: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE recipients
            SET status = 'pending', updated_at = now()
            WHERE email = $1 AND status = 'enqueued'
            "#,
        )
        .bind(email)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, filter: RecipientFilter) -> Result<Vec<RecipientRecord>, StoreError> {
        let rows = sqlx::query_as::<_, RecipientRow>(
            r#"
            SELECT * FROM recipients
            WHERE ($1::text IS NULL OR status = $1)
            ORDER BY created_at, email
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(filter.status.map(DeliveryStatus::as_str))
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(&self.pool)
        .await?;
        into_records(rows)
    }
}
