//! Durable send-task queue backed by a Redis list.
//!
//! Producers `LPUSH` onto `<name>`. Each consumer owns a dedicated connection
//! and moves tasks into `<name>:processing:<instance>` with `BRPOPLPUSH`,
//! acknowledging with `LREM` once the outcome is written. The processing list
//! belongs to one instance id, so `recover_in_flight` at startup only pushes
//! back tasks that instance stranded when it last stopped. Instance ids must
//! be stable across restarts and unique across live processes; two live
//! processes sharing an id would recover each other's in-flight tasks.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::models::recipient::RecipientRecord;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("malformed task payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Snapshot of a recipient taken at enqueue time. The worker never re-reads
/// the store before sending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendTask {
    pub name: String,
    pub email: String,
}

impl From<&RecipientRecord> for SendTask {
    fn from(record: &RecipientRecord) -> Self {
        Self {
            name: record.name.clone(),
            email: record.email.clone(),
        }
    }
}

/// A task handed to a consumer, together with the exact payload needed to
/// acknowledge it.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub task: SendTask,
    pub(crate) receipt: String,
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, task: &SendTask) -> Result<(), QueueError>;

    /// Opens a consumer with its own connection.
    async fn consumer(&self) -> Result<Box<dyn TaskConsumer>, QueueError>;

    /// Moves unacknowledged tasks back onto the queue. Returns how many moved.
    async fn recover_in_flight(&self) -> Result<usize, QueueError>;
}

#[async_trait]
pub trait TaskConsumer: Send {
    /// Waits up to `wait` for the next task.
    async fn next(&mut self, wait: Duration) -> Result<Option<Delivery>, QueueError>;

    async fn ack(&mut self, delivery: &Delivery) -> Result<(), QueueError>;
}

pub struct RedisTaskQueue {
    client: redis::Client,
    name: String,
    instance_id: String,
    producer: MultiplexedConnection,
}

impl RedisTaskQueue {
    pub async fn connect(
        client: redis::Client,
        name: impl Into<String>,
        instance_id: impl Into<String>,
    ) -> Result<Self, QueueError> {
        let producer = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            client,
            name: name.into(),
            instance_id: instance_id.into(),
            producer,
        })
    }

    fn processing_key(&self) -> String {
        processing_key(&self.name, &self.instance_id)
    }
}

fn processing_key(name: &str, instance_id: &str) -> String {
    format!("{name}:processing:{instance_id}")
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    async fn enqueue(&self, task: &SendTask) -> Result<(), QueueError> {
        let payload = serde_json::to_string(task)?;
        let mut conn = self.producer.clone();
        let _: () = conn.lpush(&self.name, payload).await?;
        debug!(queue = %self.name, email = %task.email, "Enqueued send task");
        Ok(())
    }

    async fn consumer(&self) -> Result<Box<dyn TaskConsumer>, QueueError> {
        // Blocking pops stall every command sharing a connection, so each
        // consumer gets its own.
        let conn = self.client.get_multiplexed_async_connection().await?;
        Ok(Box::new(RedisTaskConsumer {
            conn,
            queue: self.name.clone(),
            processing: self.processing_key(),
        }))
    }

    async fn recover_in_flight(&self) -> Result<usize, QueueError> {
        let mut conn = self.producer.clone();
        let processing = self.processing_key();
        let mut moved = 0;
        loop {
            let item: Option<String> = conn.rpoplpush(&processing, &self.name).await?;
            if item.is_none() {
                break;
            }
            moved += 1;
        }
        if moved > 0 {
            info!(
                queue = %self.name,
                instance = %self.instance_id,
                moved,
                "Recovered unacknowledged send tasks"
            );
        }
        Ok(moved)
    }
}

struct RedisTaskConsumer {
    conn: MultiplexedConnection,
    queue: String,
    processing: String,
}

#[async_trait]
impl TaskConsumer for RedisTaskConsumer {
    async fn next(&mut self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        let raw: Option<String> = redis::cmd("BRPOPLPUSH")
            .arg(&self.queue)
            .arg(&self.processing)
            .arg(wait.as_secs().max(1))
            .query_async(&mut self.conn)
            .await?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        match serde_json::from_str::<SendTask>(&raw) {
            Ok(task) => Ok(Some(Delivery { task, receipt: raw })),
            Err(e) => {
                // Drop poison payloads instead of redelivering them forever.
                let _: () = self.conn.lrem(&self.processing, 1, &raw).await?;
                Err(QueueError::Payload(e))
            }
        }
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<(), QueueError> {
        let _: () = self.conn.lrem(&self.processing, 1, &delivery.receipt).await?;
        Ok(())
    }
}
