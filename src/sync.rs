// 🔄 Sync Engine - Orchestrates one full reconciliation run
//
//   ingest snapshot -> upsert batches -> deletion scan -> report
//
// Stages run strictly in sequence. Any failure aborts the run; work already
// applied stays applied, and re-running the same snapshot converges.

use crate::config::SyncConfig;
use crate::db::SqliteStore;
use crate::deletion::DeletionReconciler;
use crate::error::Result;
use crate::metrics::Metrics;
use crate::mutator::BatchMutator;
use crate::retry::RetryPolicy;
use crate::snapshot::{self, SnapshotIndex};
use crate::store::CatalogStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

// ============================================================================
// SYNC REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub snapshot_path: String,
    /// SHA-256 of the snapshot file, when the run read one
    pub snapshot_digest: Option<String>,
    pub metrics: Metrics,
    /// Records in the store after the run
    pub store_count: u64,
}

impl SyncReport {
    pub fn summary(&self) -> String {
        format!(
            "Sync {} of {}: {}; store now holds {} records",
            self.run_id,
            self.snapshot_path,
            self.metrics.summary(),
            self.store_count
        )
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

// ============================================================================
// SYNC ENGINE
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct SyncEngine {
    pub mutator: BatchMutator,
    pub deletion: DeletionReconciler,
    retry: RetryPolicy,
}

impl SyncEngine {
    pub fn new(batch_size: usize, retry: RetryPolicy) -> Self {
        SyncEngine {
            mutator: BatchMutator::new(batch_size, retry.clone()),
            deletion: DeletionReconciler::new(batch_size, retry.clone()),
            retry,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        SyncEngine::new(config.batch_size, config.retry.clone())
    }

    /// Reconcile `store` against the snapshot file at `snapshot_path`
    pub fn run<S: CatalogStore>(&self, store: &mut S, snapshot_path: &Path) -> Result<SyncReport> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();

        tracing::info!(run_id = %run_id, snapshot = %snapshot_path.display(), "Sync started");

        let digest = snapshot::file_digest(snapshot_path)?;
        let index = snapshot::load_snapshot(snapshot_path)?;
        let metrics = self.run_index(store, &index)?;
        drop(index);

        let store_count = self.retry.run("count", || store.count())?;

        let report = SyncReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            snapshot_path: snapshot_path.display().to_string(),
            snapshot_digest: Some(digest),
            metrics,
            store_count,
        };

        tracing::info!(
            run_id = %report.run_id,
            rows = metrics.rows_processed,
            added = metrics.added,
            updated = metrics.updated,
            deleted = metrics.deleted,
            duration_ms = report.duration_ms(),
            "Sync finished"
        );

        Ok(report)
    }

    /// Upsert then delete against an index that is already built
    pub fn run_index<S: CatalogStore>(&self, store: &mut S, index: &SnapshotIndex) -> Result<Metrics> {
        let ingested = Metrics::rows(index.rows_processed());
        let upserted = self.mutator.apply(store, index)?;
        let removed = self.deletion.reconcile(store, index)?;

        Ok([ingested, upserted, removed.metrics].into_iter().sum())
    }
}

/// One full run against the configured SQLite store. The run is appended to
/// the store's history table.
pub fn run_sync(config: &SyncConfig) -> Result<SyncReport> {
    config.validate()?;

    let mut store = SqliteStore::open(&config.db_path)?;
    let report = SyncEngine::from_config(config).run(&mut store, &config.snapshot_path)?;
    store.record_run(&report)?;

    Ok(report)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::record;
    use crate::store::MemoryStore;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn snapshot_file(lines: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", record::HEADER).unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        file.flush().unwrap();
        file
    }

    fn line(id: &str, name: &str, price: &str) -> String {
        format!("{},{},{},2024-01-01T00:00:00,2024-01-02T00:00:00", id, name, price)
    }

    fn seeded_store(ids: &[&str]) -> SqliteStore {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let index = SnapshotIndex::ingest(
            ids.iter()
                .map(|id| record::parse(&line(id, "Seed", "1.00")).unwrap()),
        );
        BatchMutator::default().apply(&mut store, &index).unwrap();
        store
    }

    fn engine() -> SyncEngine {
        SyncEngine::new(2, RetryPolicy::none())
    }

    #[test]
    fn test_full_run_add_update_delete() {
        let mut store = seeded_store(&["A", "B", "C", "D"]);
        let a = line("A", "Seed", "1.00");
        let c = line("C", "Changed", "2.50");
        let e = line("E", "New", "9.99");
        let snapshot = snapshot_file(&[a.as_str(), c.as_str(), e.as_str()]);

        let report = engine().run(&mut store, snapshot.path()).unwrap();

        assert_eq!(report.metrics.rows_processed, 3);
        assert_eq!(report.metrics.added, 1);
        assert_eq!(report.metrics.updated, 1);
        assert_eq!(report.metrics.deleted, 2);
        assert_eq!(report.store_count, 3);
        assert_eq!(report.snapshot_digest.as_ref().map(|d| d.len()), Some(64));

        let ids: Vec<String> = store.all_products().unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["A", "C", "E"]);
        assert_eq!(store.get("C").unwrap().unwrap().name, "Changed");
    }

    #[test]
    fn test_idempotence() {
        let mut once = seeded_store(&["A", "B", "X"]);
        let mut twice = seeded_store(&["A", "B", "X"]);
        let lines = [
            line("A", "Alpha", "3.00"),
            line("B", "Seed", "1.00"),
            line("C", "Gamma", "4.00"),
        ];
        let refs: Vec<&str> = lines.iter().map(|s| s.as_str()).collect();
        let snapshot = snapshot_file(&refs);

        engine().run(&mut once, snapshot.path()).unwrap();
        engine().run(&mut twice, snapshot.path()).unwrap();
        let second = engine().run(&mut twice, snapshot.path()).unwrap();

        assert!(second.metrics.is_noop());
        assert_eq!(second.metrics.rows_processed, 3);
        assert_eq!(once.all_products().unwrap(), twice.all_products().unwrap());
    }

    #[test]
    fn test_last_write_wins_reaches_store() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let v1 = line("X", "First", "1.00");
        let v2 = line("X", "Second", "2.00");
        let snapshot = snapshot_file(&[v1.as_str(), v2.as_str()]);

        let report = engine().run(&mut store, snapshot.path()).unwrap();

        assert_eq!(report.metrics.rows_processed, 2);
        assert_eq!(report.metrics.added, 1);
        let x = store.get("X").unwrap().unwrap();
        assert_eq!(x.name, "Second");
        assert_eq!(x.price.cents(), 200);
    }

    #[test]
    fn test_empty_store_bootstrap() {
        let mut store = MemoryStore::new();
        let lines: Vec<String> = (0..7).map(|i| line(&format!("p{}", i), "Item", "5.00")).collect();
        let refs: Vec<&str> = lines.iter().map(|s| s.as_str()).collect();
        let snapshot = snapshot_file(&refs);

        let report = engine().run(&mut store, snapshot.path()).unwrap();

        assert_eq!(report.metrics.deleted, 0);
        assert_eq!(report.metrics.added, 7);
        assert_eq!(report.store_count, 7);
        assert!(store.products().iter().all(|p| p.price.cents() == 500));
    }

    #[test]
    fn test_empty_snapshot_clears_store() {
        let mut store = seeded_store(&["A", "B", "C"]);
        let snapshot = snapshot_file(&[]);

        let report = engine().run(&mut store, snapshot.path()).unwrap();
        assert_eq!(report.metrics.deleted, 3);
        assert_eq!(report.store_count, 0);
    }

    #[test]
    fn test_malformed_snapshot_aborts_before_mutation() {
        let mut store = seeded_store(&["A"]);
        let good = line("B", "Fine", "1.00");
        let snapshot = snapshot_file(&[good.as_str(), "C,missing fields"]);

        let err = engine().run(&mut store, snapshot.path()).unwrap_err();
        assert!(matches!(err, SyncError::MalformedRecord { line: Some(3), .. }));
        assert_eq!(store.count().unwrap(), 1);
        assert!(store.get("A").unwrap().is_some());
    }

    #[test]
    fn test_run_sync_records_history() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("catalog.db");
        let a = line("A", "Alpha", "1.00");
        let snapshot = snapshot_file(&[a.as_str()]);

        let config = SyncConfig::new(&db_path, snapshot.path()).with_batch_size(10);
        let first = run_sync(&config).unwrap();
        let second = run_sync(&config).unwrap();

        assert_eq!(first.metrics.added, 1);
        assert!(second.metrics.is_noop());

        let store = SqliteStore::open(&db_path).unwrap();
        let runs = store.recent_runs(5).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].run_id, second.run_id);
        assert_eq!(runs[1].metrics, first.metrics);
    }

    #[test]
    fn test_invalid_config_does_no_work() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("never.db");
        let config = SyncConfig::new(&db_path, "snapshot.csv").with_batch_size(0);

        let err = run_sync(&config).unwrap_err();
        assert!(matches!(err, SyncError::Configuration(_)));
        assert!(!db_path.exists());
    }
}
