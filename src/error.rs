// ⚠️ Sync Errors
// Every failure surfaces to the orchestrator; nothing is recovered locally
// except transient store errors, which the RetryPolicy may retry.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    /// A snapshot line could not be parsed into a product record
    #[error("malformed record{}: {reason}", line_suffix(.line))]
    MalformedRecord { line: Option<usize>, reason: String },

    /// Store could not be reached (busy, locked, connection refused)
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Store rejected an operation or broke its interface contract
    #[error("store operation '{op}' failed: {reason}")]
    StoreOperation { op: &'static str, reason: String },

    /// Invalid or missing run parameter, detected before any work starts
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn line_suffix(line: &Option<usize>) -> String {
    match line {
        Some(l) => format!(" at line {}", l),
        None => String::new(),
    }
}

impl SyncError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        SyncError::MalformedRecord {
            line: None,
            reason: reason.into(),
        }
    }

    /// Attach a 1-based file line number to a malformed record error
    pub fn at_line(self, line: usize) -> Self {
        match self {
            SyncError::MalformedRecord { reason, .. } => SyncError::MalformedRecord {
                line: Some(line),
                reason,
            },
            other => other,
        }
    }

    pub fn store_op(op: &'static str, reason: impl Into<String>) -> Self {
        SyncError::StoreOperation {
            op,
            reason: reason.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::StoreUnavailable(_))
    }

    /// Map a rusqlite error raised by store operation `op`
    pub fn from_sqlite(op: &'static str, err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::DatabaseBusy
                    || e.code == rusqlite::ErrorCode::DatabaseLocked =>
            {
                SyncError::StoreUnavailable(format!("{}: {}", op, err))
            }
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::CannotOpen =>
            {
                SyncError::StoreUnavailable(format!("{}: {}", op, err))
            }
            _ => SyncError::store_op(op, err.to_string()),
        }
    }
}
