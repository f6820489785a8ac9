use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::state::AppState;

/// GET /health
/// Liveness plus the pipeline settings this instance runs with.
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "outreach-api",
        "dispatch_mode": format!("{:?}", state.config.dispatch_mode).to_lowercase(),
        "workers": state.config.worker_concurrency,
    }))
}
