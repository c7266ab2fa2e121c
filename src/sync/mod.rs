//! Sync coordinator
//!
//! Reconciles a freshly scraped record set against the store under one of
//! three policies. Policies never reorder records or retry failed
//! batches; batch isolation is the storage adapter's concern.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::model::ColaRecord;
use crate::storage::{StorageAdapter, StorageError};

/// Reconciliation policy, selected once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    /// Create absent records only; never touch existing rows. Records
    /// missing from the fresh scrape are flagged deprecated.
    Incremental,
    /// Create absent records and update every existing one.
    Full,
    /// Delete all remote rows, then recreate from the fresh scrape.
    /// Destructive; requires explicit confirmation at startup.
    Replace,
}

impl SyncPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPolicy::Incremental => "incremental",
            SyncPolicy::Full => "full",
            SyncPolicy::Replace => "replace",
        }
    }
}

impl fmt::Display for SyncPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncPolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "incremental" => Ok(SyncPolicy::Incremental),
            "full" => Ok(SyncPolicy::Full),
            "replace" => Ok(SyncPolicy::Replace),
            _ => Err(()),
        }
    }
}

/// Counters reported after a sync run.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub total: usize,
    pub new: usize,
    pub updated: usize,
    pub skipped: usize,
    pub deprecated: usize,
    pub deleted: usize,
}

/// Apply a policy to the fresh record set.
///
/// The record sequence is consumed as scraped; the existing-ids snapshot
/// is read once and only used for membership tests.
pub async fn run_policy(
    policy: SyncPolicy,
    records: &[ColaRecord],
    storage: &dyn StorageAdapter,
) -> Result<SyncReport, StorageError> {
    tracing::info!("Starting {} sync of {} records", policy, records.len());

    let report = match policy {
        SyncPolicy::Incremental => incremental(records, storage).await?,
        SyncPolicy::Full => full(records, storage).await?,
        SyncPolicy::Replace => replace(records, storage).await?,
    };

    tracing::info!(
        "{} sync completed: total {} | new {} | updated {} | skipped {} | deprecated {} | deleted {}",
        policy,
        report.total,
        report.new,
        report.updated,
        report.skipped,
        report.deprecated,
        report.deleted
    );
    Ok(report)
}

async fn incremental(
    records: &[ColaRecord],
    storage: &dyn StorageAdapter,
) -> Result<SyncReport, StorageError> {
    if records.is_empty() {
        tracing::warn!("No records to sync");
        return Ok(SyncReport::default());
    }

    let existing = storage.existing_ids().await?;
    tracing::info!("Found {} existing records in storage", existing.len());

    let new_records: Vec<ColaRecord> = records
        .iter()
        .filter(|r| !existing.contains(&r.ttb_id))
        .cloned()
        .collect();
    let skipped = records.len() - new_records.len();
    tracing::info!("{} new, {} already exist", new_records.len(), skipped);

    let created = if new_records.is_empty() {
        0
    } else {
        storage.create_records(&new_records).await?
    };

    // Rows the registry no longer returns get flagged, not deleted
    let scraped: HashSet<&str> = records.iter().map(|r| r.ttb_id.as_str()).collect();
    let stale: Vec<String> = existing
        .iter()
        .filter(|id| !scraped.contains(id.as_str()))
        .cloned()
        .collect();
    let deprecated = if stale.is_empty() {
        0
    } else {
        tracing::info!("Marking {} records as deprecated", stale.len());
        storage.mark_deprecated(&stale).await?
    };

    Ok(SyncReport {
        total: records.len(),
        new: created,
        skipped,
        deprecated,
        ..Default::default()
    })
}

async fn full(
    records: &[ColaRecord],
    storage: &dyn StorageAdapter,
) -> Result<SyncReport, StorageError> {
    if records.is_empty() {
        tracing::warn!("No records to sync");
        return Ok(SyncReport::default());
    }

    let existing = storage.existing_ids().await?;
    tracing::info!("Found {} existing records in storage", existing.len());

    let (to_update, to_create): (Vec<&ColaRecord>, Vec<&ColaRecord>) = records
        .iter()
        .partition(|r| existing.contains(&r.ttb_id));
    tracing::info!("{} new, {} to update", to_create.len(), to_update.len());

    let created = if to_create.is_empty() {
        0
    } else {
        let batch: Vec<ColaRecord> = to_create.into_iter().cloned().collect();
        storage.create_records(&batch).await?
    };

    let mut updated = 0;
    for record in to_update {
        if storage.update_record(record).await? {
            updated += 1;
        }
    }

    Ok(SyncReport {
        total: records.len(),
        new: created,
        updated,
        ..Default::default()
    })
}

async fn replace(
    records: &[ColaRecord],
    storage: &dyn StorageAdapter,
) -> Result<SyncReport, StorageError> {
    tracing::warn!("Replace sync: deleting ALL existing records");
    let deleted = storage.delete_all().await?;
    tracing::info!("Deleted {} records", deleted);

    let created = if records.is_empty() {
        tracing::warn!("No records to create after delete");
        0
    } else {
        storage.create_records(records).await?
    };

    Ok(SyncReport {
        total: records.len(),
        new: created,
        deleted,
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_parses_case_insensitively() {
        assert_eq!("incremental".parse::<SyncPolicy>(), Ok(SyncPolicy::Incremental));
        assert_eq!("FULL".parse::<SyncPolicy>(), Ok(SyncPolicy::Full));
        assert_eq!("Replace".parse::<SyncPolicy>(), Ok(SyncPolicy::Replace));
        assert!("sideways".parse::<SyncPolicy>().is_err());
    }

    #[test]
    fn policy_round_trips_through_as_str() {
        for policy in [SyncPolicy::Incremental, SyncPolicy::Full, SyncPolicy::Replace] {
            assert_eq!(policy.as_str().parse::<SyncPolicy>(), Ok(policy));
        }
    }
}
