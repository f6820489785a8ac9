//! Send Worker: consumes one task at a time, attempts delivery, and writes
//! the outcome back to the store keyed by email.
//!
//! Per task: received -> attempting -> delivered | failed. The worker never
//! re-enqueues; redelivery only happens through queue recovery.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::mail::{MailTemplate, MailTransport};
use crate::models::recipient::DeliveryStatus;
use crate::outreach::store::{RecipientStore, StoreError};
use crate::queue::{QueueError, SendTask, TaskConsumer, TaskQueue};

/// How long a consumer blocks on an empty queue before re-checking shutdown.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    Failed(String),
}

pub struct SendWorker {
    store: Arc<dyn RecipientStore>,
    transport: Arc<dyn MailTransport>,
    template: MailTemplate,
}

impl SendWorker {
    pub fn new(
        store: Arc<dyn RecipientStore>,
        transport: Arc<dyn MailTransport>,
        template: MailTemplate,
    ) -> Self {
        Self {
            store,
            transport,
            template,
        }
    }

    /// Delivers one task and records the outcome.
    ///
    /// Transport failures are contained: they become a `failed` status with
    /// the transport's diagnostic text. A store miss is logged, not raised.
    /// Only a store failure on the write-back is returned as an error.
    pub async fn process(&self, task: &SendTask) -> Result<SendOutcome, StoreError> {
        let mail = self.template.render(task);

        let outcome = match self.transport.send(&mail).await {
            Ok(()) => SendOutcome::Delivered,
            Err(e) => SendOutcome::Failed(e.to_string()),
        };

        let written = match &outcome {
            SendOutcome::Delivered => {
                info!("Delivered");
                self.store
                    .update_status_by_email(&task.email, DeliveryStatus::Sent, None)
                    .await
            }
            SendOutcome::Failed(reason) => {
                warn!("Delivery failed: {reason}");
                self.store
                    .update_status_by_email(&task.email, DeliveryStatus::Failed, Some(reason))
                    .await
            }
        };

        match written {
            Ok(()) => Ok(outcome),
            Err(StoreError::NotFound(email)) => {
                warn!("No recipient record for {email}; queue and store disagree");
                Ok(outcome)
            }
            Err(e) => Err(e),
        }
    }
}

/// Pulls tasks until `shutdown` flips to true. The in-flight task always
/// finishes before the loop exits.
pub async fn run_worker(
    id: usize,
    worker: Arc<SendWorker>,
    mut consumer: Box<dyn TaskConsumer>,
    shutdown: watch::Receiver<bool>,
) {
    info!(worker = id, "Send worker started");

    while !stopping(&shutdown) {
        let delivery = match consumer.next(POLL_INTERVAL).await {
            Ok(Some(delivery)) => delivery,
            Ok(None) => continue,
            Err(QueueError::Payload(e)) => {
                error!(worker = id, "Discarded undecodable send task: {e}");
                continue;
            }
            Err(e) => {
                error!(worker = id, "Queue receive failed: {e}");
                tokio::time::sleep(POLL_INTERVAL).await;
                continue;
            }
        };

        let span = info_span!("send", worker = id, email = %delivery.task.email);
        match worker.process(&delivery.task).instrument(span).await {
            Ok(_) => {
                if let Err(e) = consumer.ack(&delivery).await {
                    error!(worker = id, "Failed to acknowledge task: {e}");
                }
            }
            Err(e) => {
                // Left unacknowledged so recovery redelivers it.
                error!(
                    worker = id,
                    email = %delivery.task.email,
                    "Could not record send outcome: {e}"
                );
            }
        }
    }

    debug!(worker = id, "Send worker stopped");
}

fn stopping(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}

/// Starts `count` workers, each with its own queue consumer.
pub async fn spawn_workers(
    count: usize,
    worker: Arc<SendWorker>,
    queue: &dyn TaskQueue,
    shutdown: watch::Receiver<bool>,
) -> Result<Vec<JoinHandle<()>>, QueueError> {
    let mut handles = Vec::with_capacity(count);
    for id in 0..count {
        let consumer = queue.consumer().await?;
        handles.push(tokio::spawn(run_worker(
            id,
            Arc::clone(&worker),
            consumer,
            shutdown.clone(),
        )));
    }
    info!("Spawned {count} send workers");
    Ok(handles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::recipient::NewRecipient;
    use crate::outreach::dispatch::{dispatch_pending, DispatchMode};
    use crate::outreach::ingest::ingest_csv;
    use crate::outreach::stats::get_stats;
    use crate::testing::{MemoryRecipientStore, MemoryTaskQueue, ScriptedTransport};

    fn template() -> MailTemplate {
        MailTemplate::new("Email Campaign", "Hello {name}, this is a test email campaign!")
    }

    fn task(name: &str, email: &str) -> SendTask {
        SendTask {
            name: name.into(),
            email: email.into(),
        }
    }

    /// Drains the queue synchronously, one task at a time.
    async fn drain(worker: &SendWorker, queue: &MemoryTaskQueue) {
        while let Some(task) = queue.pop() {
            worker.process(&task).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_success_marks_sent_and_uses_snapshot() {
        let store = Arc::new(MemoryRecipientStore::default());
        store
            .insert_many(&[NewRecipient::new("Alice", "a@x.com")])
            .await
            .unwrap();
        let transport = Arc::new(ScriptedTransport::default());
        let worker = SendWorker::new(store.clone(), transport.clone(), template());

        // Snapshot name differs from the stored one; the snapshot wins.
        let outcome = worker.process(&task("Ally", "a@x.com")).await.unwrap();

        assert_eq!(outcome, SendOutcome::Delivered);
        assert_eq!(store.get("a@x.com").unwrap().status, DeliveryStatus::Sent);
        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].body, "Hello Ally, this is a test email campaign!");
    }

    #[tokio::test]
    async fn test_transport_failure_records_detail() {
        let store = Arc::new(MemoryRecipientStore::default());
        store
            .insert_many(&[NewRecipient::new("Alice", "a@x.com")])
            .await
            .unwrap();
        let transport = Arc::new(ScriptedTransport::failing_for("a@x.com", "SMTP timeout"));
        let worker = SendWorker::new(store.clone(), transport, template());

        let outcome = worker.process(&task("Alice", "a@x.com")).await.unwrap();

        assert_eq!(outcome, SendOutcome::Failed("SMTP timeout".into()));
        let record = store.get("a@x.com").unwrap();
        assert_eq!(record.status, DeliveryStatus::Failed);
        assert_eq!(record.error_detail.as_deref(), Some("SMTP timeout"));
    }

    #[tokio::test]
    async fn test_success_after_failure_clears_detail() {
        let store = Arc::new(MemoryRecipientStore::default());
        store
            .insert_many(&[NewRecipient::new("Alice", "a@x.com")])
            .await
            .unwrap();
        store
            .update_status_by_email("a@x.com", DeliveryStatus::Failed, Some("SMTP timeout"))
            .await
            .unwrap();
        let worker = SendWorker::new(
            store.clone(),
            Arc::new(ScriptedTransport::default()),
            template(),
        );

        worker.process(&task("Alice", "a@x.com")).await.unwrap();

        let record = store.get("a@x.com").unwrap();
        assert_eq!(record.status, DeliveryStatus::Sent);
        assert_eq!(record.error_detail, None);
    }

    #[tokio::test]
    async fn test_missing_record_is_not_an_error() {
        let store = Arc::new(MemoryRecipientStore::default());
        let transport = Arc::new(ScriptedTransport::default());
        let worker = SendWorker::new(store.clone(), transport.clone(), template());

        let outcome = worker.process(&task("Ghost", "ghost@x.com")).await.unwrap();

        assert_eq!(outcome, SendOutcome::Delivered);
        assert_eq!(transport.sent().len(), 1);
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_pipeline_success_scenario() {
        let store = Arc::new(MemoryRecipientStore::default());
        let queue = MemoryTaskQueue::default();
        let worker = SendWorker::new(
            store.clone(),
            Arc::new(ScriptedTransport::default()),
            template(),
        );

        ingest_csv(store.as_ref(), b"name,email\nAlice,a@x.com\n").await.unwrap();
        let before = get_stats(store.as_ref()).await.unwrap();
        assert_eq!((before.total, before.sent, before.failed), (1, 0, 0));

        dispatch_pending(store.as_ref(), &queue, DispatchMode::Repeat)
            .await
            .unwrap();
        drain(&worker, &queue).await;

        let after = get_stats(store.as_ref()).await.unwrap();
        assert_eq!((after.total, after.sent, after.failed), (1, 1, 0));
    }

    #[tokio::test]
    async fn test_pipeline_failure_scenario() {
        let store = Arc::new(MemoryRecipientStore::default());
        let queue = MemoryTaskQueue::default();
        let worker = SendWorker::new(
            store.clone(),
            Arc::new(ScriptedTransport::failing_for("a@x.com", "SMTP timeout")),
            template(),
        );

        ingest_csv(store.as_ref(), b"name,email\nAlice,a@x.com\n").await.unwrap();
        dispatch_pending(store.as_ref(), &queue, DispatchMode::Claim)
            .await
            .unwrap();
        drain(&worker, &queue).await;

        let record = store.get("a@x.com").unwrap();
        assert_eq!(record.status, DeliveryStatus::Failed);
        assert_eq!(record.error_detail.as_deref(), Some("SMTP timeout"));
        let stats = get_stats(store.as_ref()).await.unwrap();
        assert_eq!((stats.total, stats.sent, stats.failed), (1, 0, 1));
    }

    #[tokio::test]
    async fn test_every_dispatched_record_leaves_pending() {
        let store = Arc::new(MemoryRecipientStore::default());
        let queue = MemoryTaskQueue::default();
        let worker = SendWorker::new(
            store.clone(),
            Arc::new(ScriptedTransport::failing_for("c@x.com", "mailbox unavailable")),
            template(),
        );
        let csv = b"name,email\nA,a@x.com\nB,b@x.com\nC,c@x.com\nD,d@x.com\n";
        ingest_csv(store.as_ref(), csv).await.unwrap();

        for mode in [DispatchMode::Repeat, DispatchMode::Claim] {
            dispatch_pending(store.as_ref(), &queue, mode).await.unwrap();
            drain(&worker, &queue).await;
        }

        for status in [DeliveryStatus::Pending, DeliveryStatus::Enqueued] {
            assert_eq!(store.count_by_status(status).await.unwrap(), 0);
        }
        assert_eq!(store.count_by_status(DeliveryStatus::Sent).await.unwrap(), 3);
        assert_eq!(store.count_by_status(DeliveryStatus::Failed).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_worker_loop_drains_queue_and_stops() {
        let store = Arc::new(MemoryRecipientStore::default());
        let queue = MemoryTaskQueue::default();
        let worker = Arc::new(SendWorker::new(
            store.clone(),
            Arc::new(ScriptedTransport::default()),
            template(),
        ));
        ingest_csv(store.as_ref(), b"name,email\nA,a@x.com\nB,b@x.com\nC,c@x.com\n")
            .await
            .unwrap();
        dispatch_pending(store.as_ref(), &queue, DispatchMode::Claim)
            .await
            .unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = spawn_workers(2, worker, &queue, shutdown_rx).await.unwrap();

        for _ in 0..200 {
            if store.count_by_status(DeliveryStatus::Sent).await.unwrap() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        shutdown_tx.send(true).unwrap();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.count_by_status(DeliveryStatus::Sent).await.unwrap(), 3);
        assert_eq!(queue.depth(), 0);
    }
}
