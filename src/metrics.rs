// 📊 Run Metrics
// Additive counters threaded through every stage. Default is the neutral
// element; merge is associative, so per-batch results fold in any grouping.

use serde::{Deserialize, Serialize};
use std::iter::Sum;
use std::ops::{Add, AddAssign};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    pub added: u64,
    pub updated: u64,
    pub deleted: u64,
    pub rows_processed: u64,
}

impl Metrics {
    pub fn added(n: u64) -> Self {
        Metrics {
            added: n,
            ..Self::default()
        }
    }

    pub fn updated(n: u64) -> Self {
        Metrics {
            updated: n,
            ..Self::default()
        }
    }

    pub fn deleted(n: u64) -> Self {
        Metrics {
            deleted: n,
            ..Self::default()
        }
    }

    pub fn rows(n: u64) -> Self {
        Metrics {
            rows_processed: n,
            ..Self::default()
        }
    }

    pub fn merge(self, other: Metrics) -> Metrics {
        Metrics {
            added: self.added + other.added,
            updated: self.updated + other.updated,
            deleted: self.deleted + other.deleted,
            rows_processed: self.rows_processed + other.rows_processed,
        }
    }

    /// True when the run changed nothing in the store
    pub fn is_noop(&self) -> bool {
        self.added == 0 && self.updated == 0 && self.deleted == 0
    }

    pub fn summary(&self) -> String {
        format!(
            "{} rows processed: {} added, {} updated, {} deleted",
            self.rows_processed, self.added, self.updated, self.deleted
        )
    }
}

impl Add for Metrics {
    type Output = Metrics;

    fn add(self, rhs: Metrics) -> Metrics {
        self.merge(rhs)
    }
}

impl AddAssign for Metrics {
    fn add_assign(&mut self, rhs: Metrics) {
        *self = self.merge(rhs);
    }
}

impl Sum for Metrics {
    fn sum<I: Iterator<Item = Metrics>>(iter: I) -> Metrics {
        iter.fold(Metrics::default(), Metrics::merge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neutral_element() {
        let m = Metrics {
            added: 1,
            updated: 2,
            deleted: 3,
            rows_processed: 4,
        };
        assert_eq!(m.merge(Metrics::default()), m);
        assert_eq!(Metrics::default().merge(m), m);
    }

    #[test]
    fn test_merge_is_associative() {
        let a = Metrics::added(2);
        let b = Metrics::updated(3);
        let c = Metrics::deleted(5).merge(Metrics::rows(7));

        assert_eq!((a + b) + c, a + (b + c));
        assert_eq!(vec![a, b, c].into_iter().sum::<Metrics>(), a + b + c);
    }

    #[test]
    fn test_summary_and_noop() {
        let mut m = Metrics::rows(10);
        assert!(m.is_noop());

        m += Metrics::added(2);
        assert!(!m.is_noop());
        assert_eq!(m.summary(), "10 rows processed: 2 added, 0 updated, 0 deleted");
    }
}
