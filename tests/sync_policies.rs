//! Sync policy behavior against an in-memory storage stub.
//!
//! The stub honors the adapter contract: batched creates with per-batch
//! failure isolation, update-by-id, deprecation flags, destructive
//! delete-all.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use cola_sync_server::model::ColaRecord;
use cola_sync_server::storage::{StorageAdapter, StorageError, BATCH_SIZE};
use cola_sync_server::sync::{run_policy, SyncPolicy};

fn record(id: &str) -> ColaRecord {
    ColaRecord::new(
        id,
        format!("https://ttbonline.gov/colasonline/viewColaDetails.do?ttbid={id}"),
    )
}

#[derive(Default)]
struct MemoryStore {
    rows: Mutex<HashMap<String, ColaRecord>>,
    deprecated: Mutex<HashSet<String>>,
    updates: Mutex<Vec<String>>,
    /// Create-batch indices (0-based, per run) that fail.
    failing_batches: HashSet<usize>,
    batches_seen: Mutex<usize>,
}

impl MemoryStore {
    fn with_rows(ids: &[&str]) -> Self {
        let rows = ids
            .iter()
            .map(|id| ((*id).to_string(), record(id)))
            .collect();
        Self {
            rows: Mutex::new(rows),
            ..Default::default()
        }
    }

    fn ids(&self) -> HashSet<String> {
        self.rows.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl StorageAdapter for MemoryStore {
    async fn existing_ids(&self) -> Result<HashSet<String>, StorageError> {
        Ok(self.ids())
    }

    async fn create_records(&self, records: &[ColaRecord]) -> Result<usize, StorageError> {
        let mut created = 0;
        for chunk in records.chunks(BATCH_SIZE) {
            let index = {
                let mut seen = self.batches_seen.lock().unwrap();
                let current = *seen;
                *seen += 1;
                current
            };
            // A failed batch is skipped, not retried
            if self.failing_batches.contains(&index) {
                continue;
            }
            let mut rows = self.rows.lock().unwrap();
            for r in chunk {
                rows.insert(r.ttb_id.clone(), r.clone());
            }
            created += chunk.len();
        }
        Ok(created)
    }

    async fn update_record(&self, record: &ColaRecord) -> Result<bool, StorageError> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&record.ttb_id) {
            Some(slot) => {
                *slot = record.clone();
                self.updates.lock().unwrap().push(record.ttb_id.clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_deprecated(&self, ids: &[String]) -> Result<usize, StorageError> {
        let rows = self.rows.lock().unwrap();
        let mut deprecated = self.deprecated.lock().unwrap();
        let mut marked = 0;
        for id in ids {
            if rows.contains_key(id) {
                deprecated.insert(id.clone());
                marked += 1;
            }
        }
        Ok(marked)
    }

    async fn delete_all(&self) -> Result<usize, StorageError> {
        let mut rows = self.rows.lock().unwrap();
        let deleted = rows.len();
        rows.clear();
        Ok(deleted)
    }
}

#[tokio::test]
async fn incremental_creates_only_absent_records() {
    let store = MemoryStore::with_rows(&["100", "200"]);
    let records = vec![record("100"), record("300")];

    let report = run_policy(SyncPolicy::Incremental, &records, &store)
        .await
        .unwrap();

    assert_eq!(report.total, 2);
    assert_eq!(report.new, 1);
    assert_eq!(report.skipped, 1);
    assert!(store.ids().contains("300"));
}

#[tokio::test]
async fn incremental_never_updates_a_preexisting_id() {
    let store = MemoryStore::with_rows(&["100", "200"]);
    let mut changed = record("100");
    changed.brand_name = Some("RENAMED".to_string());

    run_policy(SyncPolicy::Incremental, &[changed], &store)
        .await
        .unwrap();

    assert!(store.updates.lock().unwrap().is_empty());
    // The stored row kept its original state
    assert_eq!(store.rows.lock().unwrap()["100"].brand_name, None);
}

#[tokio::test]
async fn incremental_flags_records_missing_from_the_scrape() {
    let store = MemoryStore::with_rows(&["100", "200", "300"]);
    let records = vec![record("100")];

    let report = run_policy(SyncPolicy::Incremental, &records, &store)
        .await
        .unwrap();

    assert_eq!(report.deprecated, 2);
    let deprecated = store.deprecated.lock().unwrap();
    assert!(deprecated.contains("200"));
    assert!(deprecated.contains("300"));
    assert!(!deprecated.contains("100"));
}

#[tokio::test]
async fn incremental_with_empty_scrape_is_a_no_op() {
    let store = MemoryStore::with_rows(&["100"]);

    let report = run_policy(SyncPolicy::Incremental, &[], &store)
        .await
        .unwrap();

    assert_eq!(report.total, 0);
    assert_eq!(report.deprecated, 0);
    assert!(store.ids().contains("100"));
}

#[tokio::test]
async fn full_updates_existing_and_creates_new() {
    let store = MemoryStore::with_rows(&["100"]);
    let mut changed = record("100");
    changed.status = Some("APPROVED".to_string());
    let records = vec![changed, record("200")];

    let report = run_policy(SyncPolicy::Full, &records, &store)
        .await
        .unwrap();

    assert_eq!(report.new, 1);
    assert_eq!(report.updated, 1);
    assert_eq!(*store.updates.lock().unwrap(), vec!["100".to_string()]);
    assert_eq!(
        store.rows.lock().unwrap()["100"].status.as_deref(),
        Some("APPROVED")
    );
}

#[tokio::test]
async fn replace_leaves_store_equal_to_the_fresh_scrape() {
    let store = MemoryStore::with_rows(&["old-1", "old-2", "old-3"]);
    let records = vec![record("100"), record("200")];

    let report = run_policy(SyncPolicy::Replace, &records, &store)
        .await
        .unwrap();

    assert_eq!(report.deleted, 3);
    assert_eq!(report.new, 2);
    let expected: HashSet<String> = ["100", "200"].iter().map(|s| s.to_string()).collect();
    assert_eq!(store.ids(), expected);
}

#[tokio::test]
async fn failed_first_batch_counts_only_the_second() {
    let store = MemoryStore {
        failing_batches: HashSet::from([0]),
        ..Default::default()
    };
    // Two batches: 10 records in the first, 5 in the second
    let records: Vec<ColaRecord> = (0..15).map(|i| record(&format!("{i}"))).collect();

    let report = run_policy(SyncPolicy::Incremental, &records, &store)
        .await
        .unwrap();

    assert_eq!(report.new, 5);
    assert_eq!(store.ids().len(), 5);
    assert!(store.ids().contains("14"));
    assert!(!store.ids().contains("0"));
}
