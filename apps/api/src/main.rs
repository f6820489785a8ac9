mod auth;
mod config;
mod db;
mod errors;
mod mail;
mod models;
mod outreach;
mod queue;
mod routes;
mod state;
#[cfg(test)]
mod testing;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::auth::JwtKeys;
use crate::config::Config;
use crate::db::create_pool;
use crate::mail::{MailTemplate, MailTransport, SmtpMailer};
use crate::outreach::store::{PgRecipientStore, RecipientStore};
use crate::outreach::worker::{spawn_workers, SendWorker};
use crate::queue::{RedisTaskQueue, TaskQueue};
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Outreach API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL
    let db = create_pool(&config.database_url).await?;
    let recipients: Arc<dyn RecipientStore> = Arc::new(PgRecipientStore::new(db.clone()));

    // Initialize Redis task queue
    let redis = redis::Client::open(config.redis_url.clone())?;
    let queue = Arc::new(
        RedisTaskQueue::connect(
            redis,
            config.queue_name.clone(),
            config.instance_id.clone(),
        )
        .await
        .context("failed to connect to Redis")?,
    );
    info!(
        "Task queue '{}' connected as instance '{}'",
        config.queue_name, config.instance_id
    );

    // One SMTP client for the whole worker pool
    let transport: Arc<dyn MailTransport> =
        Arc::new(SmtpMailer::new(&config.smtp).context("invalid SMTP configuration")?);
    info!("SMTP transport configured for {}:{}", config.smtp.host, config.smtp.port);

    // Send workers
    queue.recover_in_flight().await?;
    let worker = Arc::new(SendWorker::new(
        Arc::clone(&recipients),
        transport,
        MailTemplate::new(&config.email_subject, &config.email_body_template),
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = spawn_workers(
        config.worker_concurrency,
        worker,
        queue.as_ref(),
        shutdown_rx,
    )
    .await?;

    // Build app state
    let state = AppState {
        db,
        recipients,
        queue: queue.clone() as Arc<dyn TaskQueue>,
        jwt: JwtKeys::new(&config.jwt_secret, config.jwt_ttl_hours),
        config: config.clone(),
    };

    // Build router
    let app = build_router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()), // TODO: restrict origins once the frontend host is fixed
    );

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let workers finish their in-flight task before the transport drops.
    info!("HTTP server stopped, waiting for send workers");
    if shutdown_tx.send(true).is_err() {
        debug!("All send workers had already exited before shutdown");
    }
    for handle in workers {
        if let Err(e) = handle.await {
            warn!("Send worker panicked: {e}");
        }
    }
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
