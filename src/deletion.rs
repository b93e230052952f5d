// 🧹 Deletion Reconciler
// Finds identities present in the store but absent from the snapshot
// without ever holding the store's full key set in memory.
//
// Walks the store in cursor-paginated pages (range scan, not offset):
//
//   last_id = None
//   loop:
//     page = ids > last_id, ascending, at most batch_size
//     page empty                  -> done
//     delete ids not in snapshot  (one batch call)
//     last_id = last id of page
//     page shorter than batch     -> done
//
// Memory is O(batch_size) for the page plus the snapshot index itself.

use crate::error::{Result, SyncError};
use crate::metrics::Metrics;
use crate::mutator::DEFAULT_BATCH_SIZE;
use crate::retry::RetryPolicy;
use crate::snapshot::SnapshotIndex;
use crate::store::CatalogStore;
use serde::{Deserialize, Serialize};

/// What the deletion pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionOutcome {
    pub metrics: Metrics,
    /// Range-scan calls issued, including the final empty page if any
    pub pages: u64,
    /// Identities visited across all pages
    pub scanned: u64,
}

#[derive(Debug, Clone)]
pub struct DeletionReconciler {
    pub batch_size: usize,
    pub retry: RetryPolicy,
}

impl DeletionReconciler {
    pub fn new(batch_size: usize, retry: RetryPolicy) -> Self {
        DeletionReconciler { batch_size, retry }
    }

    /// Delete every stored identity the snapshot does not contain
    pub fn reconcile<S: CatalogStore>(
        &self,
        store: &mut S,
        index: &SnapshotIndex,
    ) -> Result<DeletionOutcome> {
        let batch_size = self.batch_size.max(1);
        let mut outcome = DeletionOutcome::default();
        let mut last_id: Option<String> = None;

        loop {
            let page = self.retry.run("range_scan_ids", || {
                store.range_scan_ids(last_id.as_deref(), batch_size)
            })?;
            outcome.pages += 1;

            check_page(&page, last_id.as_deref(), batch_size)?;

            let Some(page_last) = page.last().cloned() else {
                break;
            };
            outcome.scanned += page.len() as u64;

            let candidates: Vec<String> = page
                .iter()
                .filter(|id| !index.contains(id.as_str()))
                .cloned()
                .collect();

            if !candidates.is_empty() {
                let deleted = self
                    .retry
                    .run("batch_delete", || store.batch_delete(&candidates))?;
                outcome.metrics += Metrics::deleted(deleted.deleted);

                tracing::debug!(
                    page = outcome.pages,
                    candidates = candidates.len(),
                    deleted = deleted.deleted,
                    "Deleted stale identities"
                );
            }

            last_id = Some(page_last);

            if page.len() < batch_size {
                break;
            }
        }

        tracing::info!(
            pages = outcome.pages,
            scanned = outcome.scanned,
            deleted = outcome.metrics.deleted,
            "Deletion pass complete"
        );

        Ok(outcome)
    }
}

impl Default for DeletionReconciler {
    fn default() -> Self {
        DeletionReconciler::new(DEFAULT_BATCH_SIZE, RetryPolicy::default())
    }
}

/// Enforce the range-scan contract: bounded, strictly ascending, after cursor
fn check_page(page: &[String], cursor: Option<&str>, limit: usize) -> Result<()> {
    if page.len() > limit {
        return Err(SyncError::store_op(
            "range_scan_ids",
            format!("returned {} ids for limit {}", page.len(), limit),
        ));
    }

    if let (Some(cursor), Some(first)) = (cursor, page.first()) {
        if first.as_str() <= cursor {
            return Err(SyncError::store_op(
                "range_scan_ids",
                format!("id '{}' is not after cursor '{}'", first, cursor),
            ));
        }
    }

    if let Some(pair) = page.windows(2).find(|w| w[0] >= w[1]) {
        return Err(SyncError::store_op(
            "range_scan_ids",
            format!("ids out of order: '{}' then '{}'", pair[0], pair[1]),
        ));
    }

    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
