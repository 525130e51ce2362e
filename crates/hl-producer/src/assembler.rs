//! Batch assembly with recency-window deduplication.
//!
//! One polling round yields raw items per symbol. [`BatchAssembler::assemble`]
//! walks the configured symbols in order, keeps every item whose identity is
//! not in that symbol's recency window, records it, and concatenates the
//! survivors. Symbol order is the configured order, never arrival order, so
//! identical input always produces identical batches.
//!
//! A round with nothing new yields no batch at all.

use ahash::AHashMap;
use hl_core::dedup::RecencyCache;
use hl_core::time_util::now_ms;
use hl_core::{Batch, Item};
use tracing::debug;

/// Builds batches from polling rounds, owning the producer's recency cache.
pub struct BatchAssembler {
    symbols: Vec<String>,
    cache: RecencyCache,
}

impl BatchAssembler {
    /// `symbols` fixes the concatenation order; `window_size` is the per-symbol
    /// recency capacity.
    pub fn new(symbols: Vec<String>, window_size: usize) -> Self {
        Self { symbols, cache: RecencyCache::new(window_size) }
    }

    /// Assemble one round, stamped with the current time.
    pub fn assemble(&mut self, round: &AHashMap<String, Vec<Item>>) -> Option<Batch> {
        self.assemble_at(round, now_ms())
    }

    /// Assemble one round with an explicit `created_at_ms`.
    ///
    /// Symbols missing from `round` (e.g. their fetch failed) contribute
    /// nothing. Symbols in `round` but not configured are ignored.
    pub fn assemble_at(&mut self, round: &AHashMap<String, Vec<Item>>, created_at_ms: u64) -> Option<Batch> {
        let mut fresh = Vec::new();

        for symbol in &self.symbols {
            let Some(raw) = round.get(symbol) else { continue };
            let before = fresh.len();
            for item in raw {
                let id = item.identity();
                if self.cache.seen(symbol, &id) {
                    continue;
                }
                self.cache.record(symbol, id);
                fresh.push(item.clone());
            }
            debug!("{symbol}: {} fetched, {} new", raw.len(), fresh.len() - before);
        }

        Batch::new(fresh, created_at_ms)
    }

    pub fn cache(&self) -> &RecencyCache {
        &self.cache
    }
}
