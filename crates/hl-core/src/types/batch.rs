//! Batches of items and the terminal session summary.

use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use serde::{Deserialize, Serialize};

use super::item::Item;

/// An ordered, non-empty group of items sent as one unit.
///
/// Construct through [`Batch::new`], which refuses empty input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Archive, RkyvSerialize, RkyvDeserialize)]
pub struct Batch {
    pub items: Vec<Item>,
    /// Assembly time in milliseconds since Unix epoch.
    pub created_at_ms: u64,
}

impl Batch {
    /// Returns `None` when `items` is empty.
    pub fn new(items: Vec<Item>, created_at_ms: u64) -> Option<Self> {
        if items.is_empty() { None } else { Some(Self { items, created_at_ms }) }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Terminal accounting result returned when a session closes.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Archive,
    RkyvSerialize,
    RkyvDeserialize,
)]
pub struct Summary {
    /// Sum of item counts over every acknowledged batch.
    pub processed_count: u64,
    /// Number of acknowledged batches.
    pub batch_count: u64,
}

impl Summary {
    /// Account for one acknowledged batch of `item_count` items.
    #[inline]
    pub fn record(&mut self, item_count: usize) {
        self.batch_count += 1;
        self.processed_count += item_count as u64;
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} headline(s) across {} batch(es)", self.processed_count, self.batch_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_no_batch() {
        assert!(Batch::new(Vec::new(), 1).is_none());
        let b = Batch::new(vec![Item::new("AAPL", "up", 10)], 1).unwrap();
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn summary_counts_items_and_batches() {
        let mut s = Summary::default();
        s.record(3);
        s.record(0);
        s.record(2);
        assert_eq!(s, Summary { processed_count: 5, batch_count: 3 });
    }
}
