// Catalog Sync - Core Library
// Reconciles a full-state product snapshot against a persistent store.
// Exposes all modules for use in the CLI and tests.

pub mod config;
pub mod db;
pub mod deletion;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod mutator;
pub mod record;
pub mod retry;
pub mod snapshot;
pub mod store;
pub mod sync;

// Re-export commonly used types
pub use config::{SyncConfig, DEFAULT_DB_PATH, DEFAULT_SNAPSHOT_PATH};
pub use db::{setup_database, SqliteStore};
pub use deletion::{DeletionOutcome, DeletionReconciler};
pub use error::{Result, SyncError};
pub use metrics::Metrics;
pub use mutator::{BatchMutator, DEFAULT_BATCH_SIZE};
pub use record::{parse, serialize, Price, Product, ProductFields, HEADER};
pub use retry::RetryPolicy;
pub use snapshot::{file_digest, load_snapshot, SnapshotIndex, SnapshotReader};
pub use store::{CatalogStore, DeleteOutcome, MemoryStore, UpsertOp, UpsertOutcome};
pub use sync::{run_sync, SyncEngine, SyncReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
