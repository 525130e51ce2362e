//! Headline deduplication against recent history.
//!
//! Upstream news endpoints return overlapping result sets on every poll, so the
//! same headline shows up cycle after cycle. [`RecencyCache`] keeps, per symbol,
//! the identities of the last `capacity` headlines seen and answers whether a
//! freshly fetched headline is new.
//!
//! Each symbol owns a [`RecencyWindow`]: a FIFO ring of identities paired with
//! a hash set for O(1) membership. Inserting the `capacity + 1`-th identity
//! evicts the oldest one, so memory stays bounded no matter how long the
//! producer runs.

use std::collections::VecDeque;

use ahash::{AHashMap, AHashSet};

use crate::types::ItemId;

/// Default number of identities retained per symbol.
pub const DEFAULT_WINDOW_SIZE: usize = 100;

// ---------------------------------------------------------------------------
// RecencyWindow: bounded FIFO for one symbol
// ---------------------------------------------------------------------------

/// Bounded, arrival-ordered set of item identities for a single symbol.
#[derive(Debug)]
pub struct RecencyWindow {
    order: VecDeque<ItemId>,
    members: AHashSet<ItemId>,
    capacity: usize,
}

impl RecencyWindow {
    /// `capacity` must be non-zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "recency window capacity must be non-zero");
        Self {
            order: VecDeque::with_capacity(capacity),
            members: AHashSet::with_capacity(capacity),
            capacity,
        }
    }

    #[inline]
    pub fn contains(&self, id: &ItemId) -> bool {
        self.members.contains(id)
    }

    /// Record `id` as the most recent identity.
    ///
    /// Re-recording an identity already in the window is a no-op; it does not
    /// refresh its position.
    pub fn insert(&mut self, id: ItemId) {
        if self.members.contains(&id) {
            return;
        }
        if self.order.len() == self.capacity
            && let Some(oldest) = self.order.pop_front()
        {
            self.members.remove(&oldest);
        }
        self.members.insert(id.clone());
        self.order.push_back(id);
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Identities from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &ItemId> {
        self.order.iter()
    }
}

// ---------------------------------------------------------------------------
// RecencyCache: per-symbol windows
// ---------------------------------------------------------------------------

/// Per-symbol recency windows, created lazily on first sighting of a symbol.
///
/// Callers must check [`seen`](Self::seen) before calling
/// [`record`](Self::record); the cache does not enforce that ordering.
///
/// # Thread safety
///
/// Not thread-safe. The producer loop owns the only instance.
pub struct RecencyCache {
    windows: AHashMap<String, RecencyWindow>,
    capacity: usize,
}

impl RecencyCache {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "recency window capacity must be non-zero");
        Self { windows: AHashMap::new(), capacity }
    }

    /// Whether `id` is currently in `symbol`'s window.
    #[inline]
    pub fn seen(&self, symbol: &str, id: &ItemId) -> bool {
        self.windows.get(symbol).is_some_and(|w| w.contains(id))
    }

    /// Record `id` in `symbol`'s window, evicting the oldest identity if full.
    pub fn record(&mut self, symbol: &str, id: ItemId) {
        if let Some(window) = self.windows.get_mut(symbol) {
            window.insert(id);
            return;
        }
        let mut window = RecencyWindow::new(self.capacity);
        window.insert(id);
        self.windows.insert(symbol.to_string(), window);
    }

    /// Returns the window for a symbol, or `None` if never seen.
    pub fn window(&self, symbol: &str) -> Option<&RecencyWindow> {
        self.windows.get(symbol)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of symbols with a window.
    pub fn symbol_count(&self) -> usize {
        self.windows.len()
    }
}

impl Default for RecencyCache {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(text: &str, ts: i64) -> ItemId {
        ItemId::new(text, ts)
    }

    #[test]
    fn seen_after_record() {
        let mut c = RecencyCache::new(10);
        assert!(!c.seen("AAPL", &id("a", 1)));
        c.record("AAPL", id("a", 1));
        assert!(c.seen("AAPL", &id("a", 1)));
        assert!(!c.seen("AAPL", &id("a", 2))); // same text, different timestamp
        assert!(!c.seen("MSFT", &id("a", 1))); // different symbol
    }

    #[test]
    fn fifo_eviction_keeps_last_n() {
        let mut c = RecencyCache::new(2);
        for (i, t) in ["a", "b", "c", "d"].iter().enumerate() {
            c.record("S1", id(t, i as i64));
        }
        let w = c.window("S1").unwrap();
        assert_eq!(w.len(), 2);
        let kept: Vec<_> = w.iter().map(|i| i.text.as_str()).collect();
        assert_eq!(kept, ["c", "d"]);
        assert!(!c.seen("S1", &id("a", 0)));
        assert!(!c.seen("S1", &id("b", 1)));
    }

    #[test]
    fn window_never_exceeds_capacity() {
        let mut w = RecencyWindow::new(5);
        for i in 0..1_000 {
            w.insert(id("x", i % 17));
            assert!(w.len() <= 5);
        }
        assert_eq!(w.len(), 5);
    }

    #[test]
    fn duplicate_insert_does_not_evict() {
        let mut w = RecencyWindow::new(2);
        w.insert(id("a", 1));
        w.insert(id("b", 2));
        w.insert(id("b", 2));
        assert!(w.contains(&id("a", 1)));
        assert_eq!(w.len(), 2);
    }

    #[test]
    fn symbols_do_not_share_capacity() {
        let mut c = RecencyCache::new(1);
        c.record("S1", id("a", 1));
        c.record("S2", id("b", 1));
        assert!(c.seen("S1", &id("a", 1)));
        assert!(c.seen("S2", &id("b", 1)));
        assert_eq!(c.symbol_count(), 2);
    }
}
