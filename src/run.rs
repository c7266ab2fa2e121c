//! Run orchestration
//!
//! One linear pass: scrape the registry, then either sync the records to
//! the configured store or, without store credentials, write the flat
//! JSON export. Shared by the `--once` entrypoint and the HTTP trigger.

use std::path::Path;

use crate::config::Config;
use crate::documents::DocumentFetcher;
use crate::error::{AppError, Result};
use crate::model::ColaRecord;
use crate::scrape::ColaScraper;
use crate::storage::AirtableStore;
use crate::sync::{self, SyncReport};

/// What a completed run looked like.
pub struct RunOutcome {
    pub message: String,
    pub report: SyncReport,
}

/// Execute one full scrape-and-sync run.
pub async fn execute(config: &Config) -> Result<RunOutcome> {
    let scraper = ColaScraper::new(&config.registry)?;

    let Some(storage_config) = &config.storage else {
        // Standalone mode: scrape and export, no store involved
        tracing::warn!("Store credentials not configured; running scraper standalone");
        let records = scraper.scrape().await?;
        write_export(&config.export_file, &records)?;
        return Ok(RunOutcome {
            message: format!(
                "Scraped {} records; export written to {}",
                records.len(),
                config.export_file.display()
            ),
            report: SyncReport {
                total: records.len(),
                ..Default::default()
            },
        });
    };

    let documents = match &config.documents {
        Some(doc_config) => {
            tracing::info!("Document fetching is ENABLED");
            Some(DocumentFetcher::new(doc_config)?)
        }
        None => {
            tracing::info!("Document fetching is disabled");
            None
        }
    };

    let store = AirtableStore::new(storage_config.clone(), documents)?;

    let records = scraper.scrape().await?;
    let result = sync::run_policy(config.sync.policy, &records, &store).await;

    // Release the browser session whether the sync succeeded or not
    store.shutdown().await;
    let report = result?;

    // Best-effort JSON backup of what was scraped
    if let Err(e) = write_export(&config.export_file, &records) {
        tracing::warn!("Failed to write backup export: {}", e);
    }

    Ok(RunOutcome {
        message: format!("{} sync completed", config.sync.policy),
        report,
    })
}

fn write_export(path: &Path, records: &[ColaRecord]) -> Result<()> {
    let json = serde_json::to_string_pretty(records)
        .map_err(|e| AppError::Internal(format!("export serialization failed: {}", e)))?;
    std::fs::write(path, json)?;
    tracing::info!("Saved {} records to {}", records.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_round_trips_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.json");

        let mut record = ColaRecord::new("25059001000222", "https://example.gov/detail");
        record.brand_name = Some("SHOTTYS".to_string());

        write_export(&path, &[record.clone()]).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let parsed: Vec<ColaRecord> = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, vec![record]);
    }
}
