// Bulk email dispatch pipeline.
// Ingestion writes `pending` recipients, dispatch turns them into queued send
// tasks, send workers deliver one task at a time and record the outcome.

pub mod dispatch;
pub mod handlers;
pub mod ingest;
pub mod stats;
pub mod store;
pub mod worker;
