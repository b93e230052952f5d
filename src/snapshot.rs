// 📸 Snapshot Index
// The authoritative desired end state for one run.
//
// Built by a single-pass fold with last-write-wins semantics: when an
// identity appears more than once, the record seen last replaces the rest.

use crate::error::{Result, SyncError};
use crate::record::{self, Product};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Split};
use std::path::{Path, PathBuf};

// ============================================================================
// SNAPSHOT INDEX
// ============================================================================

#[derive(Debug, Default, Clone)]
pub struct SnapshotIndex {
    products: HashMap<String, Product>,
    rows_processed: u64,
}

impl SnapshotIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a record stream into an index
    pub fn ingest<I>(records: I) -> Self
    where
        I: IntoIterator<Item = Product>,
    {
        let mut index = SnapshotIndex::new();
        for product in records {
            index.insert(product);
        }
        index
    }

    /// Like `ingest`, stopping at the first failed record
    pub fn try_ingest<I>(records: I) -> Result<Self>
    where
        I: IntoIterator<Item = Result<Product>>,
    {
        let mut index = SnapshotIndex::new();
        for product in records {
            index.insert(product?);
        }
        Ok(index)
    }

    /// Overwrites any earlier record with the same identity
    pub fn insert(&mut self, product: Product) {
        self.rows_processed += 1;
        self.products.insert(product.id.clone(), product);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.products.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Product> {
        self.products.get(id)
    }

    /// Number of distinct identities
    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    /// Records consumed, duplicates included
    pub fn rows_processed(&self) -> u64 {
        self.rows_processed
    }

    /// Iteration order is unspecified
    pub fn products(&self) -> impl Iterator<Item = &Product> {
        self.products.values()
    }
}

// ============================================================================
// SNAPSHOT READER (line source)
// ============================================================================

/// Yields parsed records from snapshot text, skipping the header line and
/// blank lines. Parse errors carry the 1-based line number.
pub struct SnapshotReader<R: Read> {
    lines: Split<BufReader<R>>,
    line_number: usize,
    path: PathBuf,
}

impl SnapshotReader<File> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| SyncError::io(path, e))?;
        Ok(SnapshotReader::new(file, path))
    }
}

impl<R: Read> SnapshotReader<R> {
    pub fn new(reader: R, path: impl Into<PathBuf>) -> Self {
        SnapshotReader {
            lines: BufReader::new(reader).split(b'\n'),
            line_number: 0,
            path: path.into(),
        }
    }
}

impl<R: Read> Iterator for SnapshotReader<R> {
    type Item = Result<Product>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let bytes = match self.lines.next()? {
                Ok(bytes) => bytes,
                Err(e) => return Some(Err(SyncError::io(self.path.clone(), e))),
            };
            self.line_number += 1;
            let line_number = self.line_number;

            // header
            if line_number == 1 {
                continue;
            }

            let line = match String::from_utf8(bytes) {
                Ok(line) => line,
                Err(e) => {
                    let reason = format!("invalid UTF-8 at byte {}", e.utf8_error().valid_up_to());
                    return Some(Err(SyncError::malformed(reason).at_line(line_number)));
                }
            };
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }

            return Some(record::parse(line).map_err(|e| e.at_line(line_number)));
        }
    }
}

/// Read and index a snapshot file
pub fn load_snapshot(path: &Path) -> Result<SnapshotIndex> {
    let index = SnapshotIndex::try_ingest(SnapshotReader::open(path)?)?;

    tracing::info!(
        path = %path.display(),
        rows = index.rows_processed(),
        distinct = index.len(),
        "Loaded snapshot"
    );

    Ok(index)
}

/// SHA-256 of the snapshot file, hex encoded
pub fn file_digest(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| SyncError::io(path, e))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher).map_err(|e| SyncError::io(path, e))?;
    Ok(format!("{:x}", hasher.finalize()))
}

// ============================================================================
// TESTS
// ============================================================================
