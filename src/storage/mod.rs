//! Storage adapters for synced records
//!
//! The sync coordinator only sees the `StorageAdapter` trait; the Airtable
//! implementation lives in its own module so the backend stays swappable.

mod airtable;

pub use airtable::AirtableStore;

use std::collections::HashSet;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::ColaRecord;

/// Batch size accepted by the store's batch create/delete endpoints.
pub const BATCH_SIZE: usize = 10;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store API returned {status}: {body}")]
    Api {
        status: reqwest::StatusCode,
        body: String,
    },
}

/// Write interface to the tabular store.
///
/// Writes are at-least-once: a failed batch is logged and skipped, never
/// rolled back or retried.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Snapshot of identifiers already present in the store.
    async fn existing_ids(&self) -> Result<HashSet<String>, StorageError>;

    /// Create records in store-sized batches. Returns the number actually
    /// created; a failed batch drops only that batch's records.
    async fn create_records(&self, records: &[ColaRecord]) -> Result<usize, StorageError>;

    /// Update the row matching the record's identifier. Returns false when
    /// the row is missing or the update failed.
    async fn update_record(&self, record: &ColaRecord) -> Result<bool, StorageError>;

    /// Flag rows as deprecated by identifier. Returns the number flagged.
    async fn mark_deprecated(&self, ids: &[String]) -> Result<usize, StorageError>;

    /// Remove every row. Destructive; callers gate this behind an explicit
    /// confirmation switch.
    async fn delete_all(&self) -> Result<usize, StorageError>;
}
