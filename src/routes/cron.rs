//! Scheduler trigger endpoint
//!
//! An external scheduler hits `/api/cron` to run a sync and collect the
//! summary. Runs are exclusive: a second trigger while one is executing
//! gets 409 Conflict.

use axum::{extract::State, Json};
use chrono::Utc;
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::run;
use crate::state::AppState;
use crate::sync::SyncReport;

/// JSON summary returned to the scheduler.
#[derive(Serialize)]
pub struct RunSummary {
    pub status: &'static str,
    pub message: String,
    pub stats: SyncReport,
    pub timestamp: String,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub running: bool,
    pub sync_strategy: String,
    pub product_name: String,
}

/// Trigger a sync run and report its summary.
pub async fn trigger(State(state): State<AppState>) -> Result<Json<RunSummary>> {
    let _guard = state.try_begin_run().ok_or(AppError::RunInProgress)?;

    tracing::info!("Sync run triggered via /api/cron");
    let outcome = run::execute(state.config()).await?;

    Ok(Json(RunSummary {
        status: "ok",
        message: outcome.message,
        stats: outcome.report,
        timestamp: Utc::now().to_rfc3339(),
    }))
}

/// Report whether a run is executing and how the next one is configured.
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let config = state.config();
    Json(StatusResponse {
        running: state.is_running(),
        sync_strategy: config.sync.policy.to_string(),
        product_name: config.registry.product_name.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_serializes_the_scheduler_contract() {
        let summary = RunSummary {
            status: "ok",
            message: "incremental sync completed".to_string(),
            stats: SyncReport {
                total: 12,
                new: 3,
                skipped: 9,
                ..Default::default()
            },
            timestamp: "2025-03-12T00:00:00+00:00".to_string(),
        };

        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["status"], "ok");
        assert_eq!(value["stats"]["total"], 12);
        assert_eq!(value["stats"]["new"], 3);
        assert_eq!(value["stats"]["skipped"], 9);
        assert!(value["timestamp"].is_string());
    }
}
