use std::sync::Arc;

use sqlx::PgPool;

use crate::auth::JwtKeys;
use crate::config::Config;
use crate::outreach::store::RecipientStore;
use crate::queue::TaskQueue;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Pool for the users table; recipients go through `recipients`.
    pub db: PgPool,
    pub recipients: Arc<dyn RecipientStore>,
    /// Producer side of the send-task queue. Workers open their own consumers.
    pub queue: Arc<dyn TaskQueue>,
    pub jwt: JwtKeys,
    pub config: Config,
}
