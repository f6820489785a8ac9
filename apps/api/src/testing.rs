//! In-memory collaborators for pipeline and router tests.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::mail::{MailTransport, OutgoingMail, TransportError};
use crate::models::recipient::{DeliveryStatus, NewRecipient, RecipientRecord};
use crate::outreach::store::{detail_for, RecipientFilter, RecipientStore, StoreError};
use crate::queue::{Delivery, QueueError, SendTask, TaskConsumer, TaskQueue};

#[derive(Default)]
pub struct MemoryRecipientStore {
    records: Mutex<Vec<RecipientRecord>>,
}

impl MemoryRecipientStore {
    pub fn get(&self, email: &str) -> Option<RecipientRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.email == email)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[async_trait]
impl RecipientStore for MemoryRecipientStore {
    async fn insert_many(&self, recipients: &[NewRecipient]) -> Result<u64, StoreError> {
        let mut records = self.records.lock().unwrap();
        let mut seen: HashSet<&str> = records.iter().map(|r| r.email.as_str()).collect();
        for recipient in recipients {
            if !seen.insert(recipient.email.as_str()) {
                return Err(StoreError::DuplicateKey(format!(
                    "duplicate key value violates unique constraint: email {}",
                    recipient.email
                )));
            }
        }
        let now = Utc::now();
        records.extend(recipients.iter().map(|r| RecipientRecord {
            id: Uuid::new_v4(),
            name: r.name.clone(),
            email: r.email.clone(),
            status: DeliveryStatus::Pending,
            error_detail: None,
            created_at: now,
            updated_at: now,
        }));
        Ok(recipients.len() as u64)
    }

    async fn find_by_status(
        &self,
        status: DeliveryStatus,
    ) -> Result<Vec<RecipientRecord>, StoreError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.status == status)
            .cloned()
            .collect())
    }

    async fn update_status_by_email(
        &self,
        email: &str,
        status: DeliveryStatus,
        error_detail: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap();
        let record = records
            .iter_mut()
            .find(|r| r.email == email)
            .ok_or_else(|| StoreError::NotFound(email.to_string()))?;
        record.status = status;
        record.error_detail = detail_for(status, error_detail);
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn count_all(&self) -> Result<i64, StoreError> {
        Ok(self.records.lock().unwrap().len() as i64)
    }

    async fn count_by_status(&self, status: DeliveryStatus) -> Result<i64, StoreError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.status == status)
            .count() as i64)
    }

    async fn claim_pending(&self) -> Result<Vec<RecipientRecord>, StoreError> {
        let mut records = self.records.lock().unwrap();
        let now = Utc::now();
        Ok(records
            .iter_mut()
            .filter(|r| r.status == DeliveryStatus::Pending)
            .map(|r| {
                r.status = DeliveryStatus::Enqueued;
                r.updated_at = now;
                r.clone()
            })
            .collect())
    }

    async fn release_claim(&self, email: &str) -> Result<bool, StoreError> {
        let mut records = self.records.lock().unwrap();
        match records
            .iter_mut()
            .find(|r| r.email == email && r.status == DeliveryStatus::Enqueued)
        {
            Some(record) => {
                record.status = DeliveryStatus::Pending;
                record.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list(&self, filter: RecipientFilter) -> Result<Vec<RecipientRecord>, StoreError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| filter.status.map_or(true, |s| r.status == s))
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

/// FIFO queue that remembers every task ever enqueued. Setting
/// `fail_after` makes `enqueue` fail once that many tasks were accepted.
#[derive(Default)]
pub struct MemoryTaskQueue {
    pending: Arc<Mutex<VecDeque<SendTask>>>,
    history: Mutex<Vec<SendTask>>,
    fail_after: Option<usize>,
}

impl MemoryTaskQueue {
    pub fn failing_after(accepted: usize) -> Self {
        Self {
            fail_after: Some(accepted),
            ..Self::default()
        }
    }

    pub fn history(&self) -> Vec<SendTask> {
        self.history.lock().unwrap().clone()
    }

    pub fn depth(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub fn pop(&self) -> Option<SendTask> {
        self.pending.lock().unwrap().pop_front()
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    async fn enqueue(&self, task: &SendTask) -> Result<(), QueueError> {
        let mut history = self.history.lock().unwrap();
        if self.fail_after.is_some_and(|limit| history.len() >= limit) {
            return Err(QueueError::Redis(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "broker unavailable",
            ))));
        }
        history.push(task.clone());
        self.pending.lock().unwrap().push_back(task.clone());
        Ok(())
    }

    async fn consumer(&self) -> Result<Box<dyn TaskConsumer>, QueueError> {
        Ok(Box::new(MemoryConsumer {
            pending: Arc::clone(&self.pending),
        }))
    }

    async fn recover_in_flight(&self) -> Result<usize, QueueError> {
        Ok(0)
    }
}

struct MemoryConsumer {
    pending: Arc<Mutex<VecDeque<SendTask>>>,
}

#[async_trait]
impl TaskConsumer for MemoryConsumer {
    async fn next(&mut self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        let task = self.pending.lock().unwrap().pop_front();
        match task {
            Some(task) => Ok(Some(Delivery {
                receipt: serde_json::to_string(&task)?,
                task,
            })),
            None => {
                tokio::time::sleep(wait.min(Duration::from_millis(10))).await;
                Ok(None)
            }
        }
    }

    async fn ack(&mut self, _delivery: &Delivery) -> Result<(), QueueError> {
        Ok(())
    }
}

/// Transport that records every message and fails for addresses listed in
/// `failures` with the paired diagnostic text.
#[derive(Default)]
pub struct ScriptedTransport {
    sent: Mutex<Vec<OutgoingMail>>,
    failures: Vec<(String, String)>,
}

impl ScriptedTransport {
    pub fn failing_for(email: &str, reason: &str) -> Self {
        Self {
            failures: vec![(email.to_string(), reason.to_string())],
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<OutgoingMail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailTransport for ScriptedTransport {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), TransportError> {
        if let Some((_, reason)) = self.failures.iter().find(|(email, _)| *email == mail.to) {
            return Err(TransportError::Smtp(reason.clone()));
        }
        self.sent.lock().unwrap().push(mail.clone());
        Ok(())
    }
}

pub fn test_config() -> crate::config::Config {
    crate::config::Config {
        database_url: "postgres://outreach@localhost/outreach_test".into(),
        redis_url: "redis://localhost:6379".into(),
        jwt_secret: "test-secret".into(),
        jwt_ttl_hours: 1,
        smtp: crate::config::SmtpConfig {
            host: "localhost".into(),
            port: 587,
            username: "user".into(),
            password: "pass".into(),
            from: "noreply@example.com".into(),
        },
        email_subject: "Email Campaign".into(),
        email_body_template: "Hello {name}, this is a test email campaign!".into(),
        queue_name: "emailQueue".into(),
        instance_id: "test".into(),
        worker_concurrency: 1,
        dispatch_mode: crate::outreach::dispatch::DispatchMode::Claim,
        app_base_url: "http://localhost:3000".into(),
        port: 0,
        rust_log: "debug".into(),
    }
}

/// App state over in-memory collaborators. The Postgres pool is lazy and
/// never connects unless an auth route is hit.
pub fn test_state(
    store: Arc<MemoryRecipientStore>,
    queue: Arc<MemoryTaskQueue>,
) -> crate::state::AppState {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .connect_lazy(&test_config().database_url)
        .expect("lazy pool");
    test_state_with_pool(pool, store, queue)
}

pub fn test_state_with_pool(
    db: sqlx::PgPool,
    store: Arc<MemoryRecipientStore>,
    queue: Arc<MemoryTaskQueue>,
) -> crate::state::AppState {
    let config = test_config();
    crate::state::AppState {
        db,
        recipients: store,
        queue,
        jwt: crate::auth::JwtKeys::new(&config.jwt_secret, config.jwt_ttl_hours),
        config,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_release_claim_touches_updated_at() {
        let store = MemoryRecipientStore::default();
        store
            .insert_many(&[NewRecipient::new("Ann", "ann@x.com")])
            .await
            .unwrap();
        store.claim_pending().await.unwrap();
        let claimed = store.get("ann@x.com").unwrap().updated_at;

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(store.release_claim("ann@x.com").await.unwrap());

        let released = store.get("ann@x.com").unwrap();
        assert_eq!(released.status, DeliveryStatus::Pending);
        assert!(released.updated_at > claimed);
    }

    #[tokio::test]
    async fn test_release_claim_ignores_pending_records() {
        let store = MemoryRecipientStore::default();
        store
            .insert_many(&[NewRecipient::new("Ann", "ann@x.com")])
            .await
            .unwrap();
        let before = store.get("ann@x.com").unwrap().updated_at;

        assert!(!store.release_claim("ann@x.com").await.unwrap());
        assert_eq!(store.get("ann@x.com").unwrap().updated_at, before);
    }
}
