// 🗄️ Store Interface
// Batch-read / batch-write seam between the sync engine and persistence.
//
// Any backend works as long as it honors the range-scan contract below;
// the deletion pass depends on it for correctness.

use crate::error::{Result, SyncError};
use crate::record::{Product, ProductFields};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Bound;

/// Filter by `id`, set `set`, insert if absent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOp {
    pub id: String,
    pub set: ProductFields,
}

impl From<&Product> for UpsertOp {
    fn from(product: &Product) -> Self {
        UpsertOp {
            id: product.id.clone(),
            set: product.fields(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertOutcome {
    /// Existing records whose fields actually changed
    pub matched_and_modified: u64,
    /// Records that did not exist before
    pub inserted: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOutcome {
    pub deleted: u64,
}

/// CatalogStore - persistence backend for product records
///
/// # Range-scan contract
///
/// `range_scan_ids(after, limit)` must return at most `limit` identities,
/// sorted strictly ascending (byte-wise), each strictly greater than
/// `after` when a cursor is given. Pages built this way never overlap and
/// never skip a key, which is what lets the deletion pass visit every
/// stored identity exactly once without loading the whole key set.
pub trait CatalogStore {
    /// Apply upserts for one batch. Ops target distinct identities.
    fn batch_upsert(&mut self, ops: &[UpsertOp]) -> Result<UpsertOutcome>;

    /// One page of identities after the cursor (see contract above)
    fn range_scan_ids(&self, after: Option<&str>, limit: usize) -> Result<Vec<String>>;

    /// Delete the given identities; missing ones are ignored
    fn batch_delete(&mut self, ids: &[String]) -> Result<DeleteOutcome>;

    /// Total number of stored records
    fn count(&self) -> Result<u64>;
}

// ============================================================================
// MEMORY STORE
// ============================================================================

/// Ordered in-memory backend. Useful for dry runs and tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    records: BTreeMap<String, ProductFields>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_products<I: IntoIterator<Item = Product>>(products: I) -> Self {
        let records = products
            .into_iter()
            .map(|p| {
                let fields = p.fields();
                (p.id, fields)
            })
            .collect();
        MemoryStore { records }
    }

    pub fn get(&self, id: &str) -> Option<Product> {
        self.records
            .get(id)
            .map(|fields| Product::from_parts(id.to_string(), fields.clone()))
    }

    pub fn ids(&self) -> Vec<String> {
        self.records.keys().cloned().collect()
    }

    /// All products in identity order
    pub fn products(&self) -> Vec<Product> {
        self.records
            .iter()
            .map(|(id, fields)| Product::from_parts(id.clone(), fields.clone()))
            .collect()
    }
}

impl CatalogStore for MemoryStore {
    fn batch_upsert(&mut self, ops: &[UpsertOp]) -> Result<UpsertOutcome> {
        let mut outcome = UpsertOutcome::default();

        for op in ops {
            match self.records.get_mut(&op.id) {
                Some(existing) if *existing == op.set => {}
                Some(existing) => {
                    *existing = op.set.clone();
                    outcome.matched_and_modified += 1;
                }
                None => {
                    self.records.insert(op.id.clone(), op.set.clone());
                    outcome.inserted += 1;
                }
            }
        }

        Ok(outcome)
    }

    fn range_scan_ids(&self, after: Option<&str>, limit: usize) -> Result<Vec<String>> {
        if limit == 0 {
            return Err(SyncError::store_op("range_scan_ids", "limit must be positive"));
        }

        let lower = match after {
            Some(cursor) => Bound::Excluded(cursor),
            None => Bound::Unbounded,
        };

        Ok(self
            .records
            .range::<str, _>((lower, Bound::Unbounded))
            .take(limit)
            .map(|(id, _)| id.clone())
            .collect())
    }

    fn batch_delete(&mut self, ids: &[String]) -> Result<DeleteOutcome> {
        let deleted = ids
            .iter()
            .filter(|id| self.records.remove(id.as_str()).is_some())
            .count();

        Ok(DeleteOutcome {
            deleted: deleted as u64,
        })
    }

    fn count(&self) -> Result<u64> {
        Ok(self.records.len() as u64)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Price;
    use chrono::{TimeZone, Utc};

    fn product(id: &str, cents: u64) -> Product {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Product {
            id: id.to_string(),
            name: format!("Product {}", id),
            price: Price::from_cents(cents),
            created_at: ts,
            updated_at: ts,
        }
    }

    #[test]
    fn test_upsert_counts_three_updates_two_inserts() {
        let mut store = MemoryStore::with_products(["a", "b", "c"].map(|id| product(id, 100)));

        let ops: Vec<UpsertOp> = vec![
            product("a", 200),
            product("b", 200),
            product("c", 200),
            product("d", 100),
            product("e", 100),
        ]
        .iter()
        .map(UpsertOp::from)
        .collect();

        let outcome = store.batch_upsert(&ops).unwrap();
        assert_eq!(outcome.matched_and_modified, 3);
        assert_eq!(outcome.inserted, 2);
        assert_eq!(store.get("a").unwrap().price.cents(), 200);
    }

    #[test]
    fn test_unchanged_upsert_is_not_counted() {
        let mut store = MemoryStore::with_products(vec![product("a", 100)]);
        let outcome = store.batch_upsert(&[UpsertOp::from(&product("a", 100))]).unwrap();
        assert_eq!(outcome, UpsertOutcome::default());
    }

    #[test]
    fn test_range_scan_is_sorted_and_cursor_exclusive() {
        let store = MemoryStore::with_products(["d", "b", "a", "c", "e"].map(|id| product(id, 1)));

        assert_eq!(store.range_scan_ids(None, 2).unwrap(), vec!["a", "b"]);
        assert_eq!(store.range_scan_ids(Some("b"), 2).unwrap(), vec!["c", "d"]);
        assert_eq!(store.range_scan_ids(Some("d"), 2).unwrap(), vec!["e"]);
        assert!(store.range_scan_ids(Some("e"), 2).unwrap().is_empty());
        // cursor need not be a stored key
        assert_eq!(store.range_scan_ids(Some("bb"), 10).unwrap(), vec!["c", "d", "e"]);
    }

    #[test]
    fn test_batch_delete_ignores_missing() {
        let mut store = MemoryStore::with_products(["a", "b"].map(|id| product(id, 1)));
        let outcome = store
            .batch_delete(&["a".to_string(), "zz".to_string()])
            .unwrap();
        assert_eq!(outcome.deleted, 1);
        assert_eq!(store.ids(), vec!["b"]);
        assert_eq!(store.count().unwrap(), 1);
    }
}
