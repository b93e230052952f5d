// ✏️ Batch Mutator
// Turns the snapshot index into upserts and applies them in fixed-size
// batches, one store round trip per batch, one batch in flight at a time.

use crate::error::Result;
use crate::metrics::Metrics;
use crate::retry::RetryPolicy;
use crate::snapshot::SnapshotIndex;
use crate::store::{CatalogStore, UpsertOp};

pub const DEFAULT_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone)]
pub struct BatchMutator {
    pub batch_size: usize,
    pub retry: RetryPolicy,
}

impl BatchMutator {
    pub fn new(batch_size: usize, retry: RetryPolicy) -> Self {
        BatchMutator { batch_size, retry }
    }

    /// Upsert every indexed product. Returns `added`/`updated` counts.
    ///
    /// Batches target disjoint identities, so their order does not matter.
    /// Batches applied before a failure stay applied.
    pub fn apply<S: CatalogStore>(&self, store: &mut S, index: &SnapshotIndex) -> Result<Metrics> {
        let batch_size = self.batch_size.max(1);
        let mut batch: Vec<UpsertOp> = Vec::with_capacity(batch_size.min(index.len()));
        let mut metrics = Metrics::default();
        let mut batches = 0usize;

        for product in index.products() {
            batch.push(UpsertOp::from(product));
            if batch.len() == batch_size {
                batches += 1;
                metrics += self.flush(store, &batch, batches)?;
                batch.clear();
            }
        }

        if !batch.is_empty() {
            batches += 1;
            metrics += self.flush(store, &batch, batches)?;
        }

        tracing::info!(
            batches,
            added = metrics.added,
            updated = metrics.updated,
            "Upserts applied"
        );

        Ok(metrics)
    }

    fn flush<S: CatalogStore>(&self, store: &mut S, batch: &[UpsertOp], number: usize) -> Result<Metrics> {
        let outcome = self.retry.run("batch_upsert", || store.batch_upsert(batch))?;

        tracing::debug!(
            batch = number,
            size = batch.len(),
            inserted = outcome.inserted,
            modified = outcome.matched_and_modified,
            "Upsert batch done"
        );

        Ok(Metrics::added(outcome.inserted).merge(Metrics::updated(outcome.matched_and_modified)))
    }
}

impl Default for BatchMutator {
    fn default() -> Self {
        BatchMutator::new(DEFAULT_BATCH_SIZE, RetryPolicy::default())
    }
}
