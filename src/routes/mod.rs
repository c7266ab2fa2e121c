//! HTTP surface for the external scheduler

pub mod cron;
pub mod health;

use axum::{routing::get, Router};

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/cron", get(cron::trigger).post(cron::trigger))
        .route("/api/cron/status", get(cron::status))
        .route("/api/health", get(health::health_check))
        .with_state(state)
}
