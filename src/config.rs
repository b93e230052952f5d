// ⚙️ Run Configuration

use crate::error::{Result, SyncError};
use crate::mutator::DEFAULT_BATCH_SIZE;
use crate::retry::RetryPolicy;
use std::path::PathBuf;

pub const DEFAULT_DB_PATH: &str = "catalog.db";
pub const DEFAULT_SNAPSHOT_PATH: &str = "snapshot.csv";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Store location (SQLite database file)
    pub db_path: PathBuf,
    pub snapshot_path: PathBuf,
    /// Operations per store round trip, for both upserts and deletion scans
    pub batch_size: usize,
    pub retry: RetryPolicy,
}

impl SyncConfig {
    pub fn new(db_path: impl Into<PathBuf>, snapshot_path: impl Into<PathBuf>) -> Self {
        SyncConfig {
            db_path: db_path.into(),
            snapshot_path: snapshot_path.into(),
            ..Self::default()
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Reject unusable parameters before any work starts
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(SyncError::Configuration(
                "batch size must be at least 1".to_string(),
            ));
        }
        if i64::try_from(self.batch_size).is_err() {
            return Err(SyncError::Configuration(format!(
                "batch size {} is larger than a store query can page",
                self.batch_size
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(SyncError::Configuration(
                "retry attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(SyncError::Configuration(format!(
                "retry base delay {:?} exceeds max delay {:?}",
                self.retry.base_delay, self.retry.max_delay
            )));
        }
        if self.snapshot_path.as_os_str().is_empty() {
            return Err(SyncError::Configuration(
                "snapshot path is required".to_string(),
            ));
        }
        if self.db_path.as_os_str().is_empty() {
            return Err(SyncError::Configuration(
                "store location is required".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            snapshot_path: PathBuf::from(DEFAULT_SNAPSHOT_PATH),
            batch_size: DEFAULT_BATCH_SIZE,
            retry: RetryPolicy::default(),
        }
    }
}
