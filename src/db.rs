use crate::error::{Result, SyncError};
use crate::metrics::Metrics;
use crate::record::{self, Price, Product};
use crate::store::{CatalogStore, DeleteOutcome, UpsertOp, UpsertOutcome};
use crate::sync::SyncReport;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::io::Write;
use std::path::Path;

/// SQLite-backed product store
///
/// Identities are `TEXT PRIMARY KEY` with the default BINARY collation, so
/// `ORDER BY id` is byte-wise and matches the range-scan contract.
/// Each batch call runs in its own transaction: a batch is atomic, a run is not.
pub struct SqliteStore {
    conn: Connection,
}

fn sql(op: &'static str) -> impl Fn(rusqlite::Error) -> SyncError {
    move |e| SyncError::from_sqlite(op, e)
}

impl SqliteStore {
    /// Open (or create) a database file with WAL journaling
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(sql("open"))?;

        // Enable WAL mode for crash recovery
        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(sql("open"))?;
        tracing::debug!(path = %path.display(), journal_mode = %mode, "Opened store");

        setup_database(&conn)?;
        Ok(SqliteStore { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(sql("open"))?;
        setup_database(&conn)?;
        Ok(SqliteStore { conn })
    }

    pub fn get(&self, id: &str) -> Result<Option<Product>> {
        self.conn
            .query_row(
                "SELECT id, name, price_cents, created_at, updated_at
                 FROM products WHERE id = ?1",
                [id],
                product_from_row,
            )
            .optional()
            .map_err(sql("get"))
    }

    /// All products in identity order. Loads everything; meant for small
    /// stores and tests. `export` streams instead.
    pub fn all_products(&self) -> Result<Vec<Product>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, name, price_cents, created_at, updated_at
                 FROM products ORDER BY id",
            )
            .map_err(sql("all_products"))?;

        let products = stmt
            .query_map([], product_from_row)
            .map_err(sql("all_products"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(sql("all_products"))?;

        Ok(products)
    }

    /// Write the store's contents in snapshot format (header first, id order).
    /// `dest` names the destination in I/O errors. Returns the number of
    /// records written.
    pub fn export<W: Write>(&self, out: &mut W, dest: &Path) -> Result<u64> {
        let io_err = |e| SyncError::io(dest, e);

        writeln!(out, "{}", record::HEADER).map_err(io_err)?;

        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, name, price_cents, created_at, updated_at
                 FROM products ORDER BY id",
            )
            .map_err(sql("export"))?;
        let rows = stmt.query_map([], product_from_row).map_err(sql("export"))?;

        let mut written = 0;
        for product in rows {
            let product = product.map_err(sql("export"))?;
            writeln!(out, "{}", record::serialize(&product)?).map_err(io_err)?;
            written += 1;
        }

        out.flush().map_err(io_err)?;
        Ok(written)
    }

    // ========================================================================
    // RUN HISTORY
    // ========================================================================

    /// Append a finished run to the history table
    pub fn record_run(&self, report: &SyncReport) -> Result<()> {
        let metrics_json = serde_json::to_string(&report.metrics)
            .map_err(|e| SyncError::store_op("record_run", e.to_string()))?;

        self.conn
            .execute(
                "INSERT INTO sync_runs (
                    run_id, started_at, finished_at, snapshot_path, snapshot_digest,
                    metrics, store_count
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    report.run_id,
                    record::format_timestamp(&report.started_at),
                    record::format_timestamp(&report.finished_at),
                    report.snapshot_path,
                    report.snapshot_digest,
                    metrics_json,
                    to_sql_count(report.store_count)?,
                ],
            )
            .map_err(sql("record_run"))?;

        Ok(())
    }

    /// Most recent runs first
    pub fn recent_runs(&self, limit: usize) -> Result<Vec<SyncReport>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT run_id, started_at, finished_at, snapshot_path, snapshot_digest,
                        metrics, store_count
                 FROM sync_runs
                 ORDER BY id DESC
                 LIMIT ?1",
            )
            .map_err(sql("recent_runs"))?;

        let runs = stmt
            .query_map([to_sql_limit("recent_runs", limit)?], |row| {
                let started_at: String = row.get(1)?;
                let finished_at: String = row.get(2)?;
                let metrics_json: String = row.get(5)?;
                let store_count: i64 = row.get(6)?;

                let metrics: Metrics = serde_json::from_str(&metrics_json).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
                })?;

                Ok(SyncReport {
                    run_id: row.get(0)?,
                    started_at: timestamp_column(1, &started_at)?,
                    finished_at: timestamp_column(2, &finished_at)?,
                    snapshot_path: row.get(3)?,
                    snapshot_digest: row.get(4)?,
                    metrics,
                    store_count: store_count.max(0) as u64,
                })
            })
            .map_err(sql("recent_runs"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(sql("recent_runs"))?;

        Ok(runs)
    }
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS products (
            id TEXT PRIMARY KEY NOT NULL,
            name TEXT NOT NULL,
            price_cents INTEGER NOT NULL CHECK (price_cents >= 0),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sync_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT UNIQUE NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL,
            snapshot_path TEXT NOT NULL,
            snapshot_digest TEXT,
            metrics TEXT NOT NULL,
            store_count INTEGER NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );

        CREATE INDEX IF NOT EXISTS idx_sync_runs_started ON sync_runs(started_at);",
    )
    .map_err(sql("setup_database"))
}

impl CatalogStore for SqliteStore {
    fn batch_upsert(&mut self, ops: &[UpsertOp]) -> Result<UpsertOutcome> {
        let tx = self.conn.transaction().map_err(sql("batch_upsert"))?;
        let mut outcome = UpsertOutcome::default();

        {
            // Only touches rows whose fields differ, so unchanged records
            // report zero changes and are not counted as updated
            let mut update = tx
                .prepare_cached(
                    "UPDATE products
                     SET name = ?2, price_cents = ?3, created_at = ?4, updated_at = ?5
                     WHERE id = ?1
                       AND (name IS NOT ?2 OR price_cents IS NOT ?3
                            OR created_at IS NOT ?4 OR updated_at IS NOT ?5)",
                )
                .map_err(sql("batch_upsert"))?;
            let mut insert = tx
                .prepare_cached(
                    "INSERT INTO products (id, name, price_cents, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(id) DO NOTHING",
                )
                .map_err(sql("batch_upsert"))?;

            for op in ops {
                let price = to_sql_count(op.set.price.cents())?;
                let created_at = record::format_timestamp(&op.set.created_at);
                let updated_at = record::format_timestamp(&op.set.updated_at);
                let values = params![op.id, op.set.name, price, created_at, updated_at];

                let modified = update.execute(values).map_err(sql("batch_upsert"))?;
                if modified > 0 {
                    outcome.matched_and_modified += modified as u64;
                    continue;
                }

                let inserted = insert.execute(values).map_err(sql("batch_upsert"))?;
                outcome.inserted += inserted as u64;
            }
        }

        tx.commit().map_err(sql("batch_upsert"))?;
        Ok(outcome)
    }

    fn range_scan_ids(&self, after: Option<&str>, limit: usize) -> Result<Vec<String>> {
        if limit == 0 {
            return Err(SyncError::store_op("range_scan_ids", "limit must be positive"));
        }
        let limit = to_sql_limit("range_scan_ids", limit)?;

        let ids = match after {
            Some(cursor) => {
                let mut stmt = self
                    .conn
                    .prepare_cached("SELECT id FROM products WHERE id > ?1 ORDER BY id LIMIT ?2")
                    .map_err(sql("range_scan_ids"))?;
                let ids = stmt
                    .query_map(params![cursor, limit], |row| row.get(0))
                    .map_err(sql("range_scan_ids"))?
                    .collect::<rusqlite::Result<Vec<String>>>();
                ids
            }
            None => {
                let mut stmt = self
                    .conn
                    .prepare_cached("SELECT id FROM products ORDER BY id LIMIT ?1")
                    .map_err(sql("range_scan_ids"))?;
                let ids = stmt
                    .query_map([limit], |row| row.get(0))
                    .map_err(sql("range_scan_ids"))?
                    .collect::<rusqlite::Result<Vec<String>>>();
                ids
            }
        };

        ids.map_err(sql("range_scan_ids"))
    }

    fn batch_delete(&mut self, ids: &[String]) -> Result<DeleteOutcome> {
        let tx = self.conn.transaction().map_err(sql("batch_delete"))?;
        let mut deleted = 0u64;

        {
            let mut stmt = tx
                .prepare_cached("DELETE FROM products WHERE id = ?1")
                .map_err(sql("batch_delete"))?;
            for id in ids {
                deleted += stmt.execute([id]).map_err(sql("batch_delete"))? as u64;
            }
        }

        tx.commit().map_err(sql("batch_delete"))?;
        Ok(DeleteOutcome { deleted })
    }

    fn count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM products", [], |row| row.get(0))
            .map_err(sql("count"))?;

        Ok(count.max(0) as u64)
    }
}

fn to_sql_count(value: u64) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| SyncError::store_op("encode", format!("{} exceeds SQLite INTEGER range", value)))
}

/// `LIMIT` with a negative value is unbounded in SQLite, so refuse to wrap
fn to_sql_limit(op: &'static str, limit: usize) -> Result<i64> {
    i64::try_from(limit)
        .map_err(|_| SyncError::store_op(op, format!("limit {} exceeds SQLite INTEGER range", limit)))
}

fn timestamp_column(index: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    record::parse_timestamp(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn product_from_row(row: &Row<'_>) -> rusqlite::Result<Product> {
    let price_cents: i64 = row.get(2)?;
    let created_at: String = row.get(3)?;
    let updated_at: String = row.get(4)?;

    let price = u64::try_from(price_cents).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Integer, Box::new(e))
    })?;

    Ok(Product {
        id: row.get(0)?,
        name: row.get(1)?,
        price: Price::from_cents(price),
        created_at: timestamp_column(3, &created_at)?,
        updated_at: timestamp_column(4, &updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn create_test_product(id: &str, name: &str, cents: u64) -> Product {
        Product {
            id: id.to_string(),
            name: name.to_string(),
            price: Price::from_cents(cents),
            created_at: Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap(),
            updated_at: Utc.with_ymd_and_hms(2024, 6, 2, 8, 0, 0).unwrap(),
        }
    }

    fn ops(products: &[Product]) -> Vec<UpsertOp> {
        products.iter().map(UpsertOp::from).collect()
    }

    #[test]
    fn test_upsert_inserts_then_updates() {
        let mut store = SqliteStore::open_in_memory().unwrap();

        let first = store
            .batch_upsert(&ops(&[
                create_test_product("a", "Desk", 100),
                create_test_product("b", "Lamp", 200),
                create_test_product("c", "Rug", 300),
            ]))
            .unwrap();
        assert_eq!(first.inserted, 3);
        assert_eq!(first.matched_and_modified, 0);

        let second = store
            .batch_upsert(&ops(&[
                create_test_product("a", "Desk", 150),
                create_test_product("b", "Lamp XL", 200),
                create_test_product("c", "Rug", 300),
                create_test_product("d", "Sofa", 900),
                create_test_product("e", "Shelf", 400),
            ]))
            .unwrap();
        assert_eq!(second.matched_and_modified, 2);
        assert_eq!(second.inserted, 2);

        let a = store.get("a").unwrap().unwrap();
        assert_eq!(a.price.cents(), 150);
        assert_eq!(store.count().unwrap(), 5);
    }

    #[test]
    fn test_three_modified_two_inserted() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store
            .batch_upsert(&ops(&[
                create_test_product("a", "A", 1),
                create_test_product("b", "B", 1),
                create_test_product("c", "C", 1),
            ]))
            .unwrap();

        let outcome = store
            .batch_upsert(&ops(&[
                create_test_product("a", "A", 2),
                create_test_product("b", "B", 2),
                create_test_product("c", "C", 2),
                create_test_product("d", "D", 1),
                create_test_product("e", "E", 1),
            ]))
            .unwrap();

        assert_eq!(outcome.matched_and_modified, 3);
        assert_eq!(outcome.inserted, 2);
    }

    #[test]
    fn test_range_scan_contract() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store
            .batch_upsert(&ops(&[
                create_test_product("b", "B", 1),
                create_test_product("B", "B", 1),
                create_test_product("a", "A", 1),
                create_test_product("é", "E", 1),
                create_test_product("c", "C", 1),
            ]))
            .unwrap();

        // byte-wise: uppercase before lowercase, multi-byte last
        assert_eq!(store.range_scan_ids(None, 3).unwrap(), vec!["B", "a", "b"]);
        assert_eq!(store.range_scan_ids(Some("b"), 3).unwrap(), vec!["c", "é"]);
        assert!(store.range_scan_ids(Some("é"), 3).unwrap().is_empty());
        assert!(store.range_scan_ids(None, 0).is_err());
    }

    #[test]
    fn test_oversized_limit_is_rejected() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(to_sql_limit("test", 25).unwrap(), 25);

        if i64::try_from(usize::MAX).is_err() {
            let err = store.range_scan_ids(None, usize::MAX).unwrap_err();
            assert!(matches!(err, SyncError::StoreOperation { op: "range_scan_ids", .. }));
            assert!(store.recent_runs(usize::MAX).is_err());
        }
    }

    #[test]
    fn test_batch_delete() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store
            .batch_upsert(&ops(&[
                create_test_product("a", "A", 1),
                create_test_product("b", "B", 1),
            ]))
            .unwrap();

        let outcome = store
            .batch_delete(&["a".to_string(), "missing".to_string()])
            .unwrap();
        assert_eq!(outcome.deleted, 1);
        assert!(store.get("a").unwrap().is_none());
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_export_round_trips_through_codec() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let products = vec![
            create_test_product("x2", "Chair, padded", 4999),
            create_test_product("x1", "Desk", 12000),
        ];
        store.batch_upsert(&ops(&products)).unwrap();

        let mut out = Vec::new();
        let written = store.export(&mut out, Path::new("catalog.csv")).unwrap();
        assert_eq!(written, 2);

        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some(record::HEADER));
        let parsed: Vec<Product> = lines.map(|l| record::parse(l).unwrap()).collect();
        assert_eq!(parsed, store.all_products().unwrap());
        assert_eq!(parsed[0].id, "x1");
    }

    struct FullDisk;

    impl Write for FullDisk {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "no space left"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_export_error_names_destination() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = store
            .export(&mut FullDisk, Path::new("/tmp/out/catalog.csv"))
            .unwrap_err();

        match err {
            SyncError::Io { path, .. } => assert_eq!(path, Path::new("/tmp/out/catalog.csv")),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.db");

        {
            let mut store = SqliteStore::open(&path).unwrap();
            store
                .batch_upsert(&ops(&[create_test_product("a", "A", 1)]))
                .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_run_history() {
        let store = SqliteStore::open_in_memory().unwrap();
        let started = Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap();

        for (i, added) in [3u64, 0].iter().enumerate() {
            let report = SyncReport {
                run_id: format!("run-{}", i),
                started_at: started,
                finished_at: started,
                snapshot_path: "snapshot.csv".to_string(),
                snapshot_digest: Some("abc".to_string()),
                metrics: Metrics::added(*added),
                store_count: 3,
            };
            store.record_run(&report).unwrap();
        }

        let runs = store.recent_runs(10).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].run_id, "run-1");
        assert_eq!(runs[1].metrics.added, 3);
        assert_eq!(runs[1].started_at, started);

        assert_eq!(store.recent_runs(1).unwrap().len(), 1);
    }
}
