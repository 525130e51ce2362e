//! News items and their deduplication identity.

use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use serde::{Deserialize, Serialize};

/// A single news headline keyed by a tradable symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Archive, RkyvSerialize, RkyvDeserialize)]
pub struct Item {
    pub symbol: String,
    pub text: String,
    /// Publisher name as reported by the upstream source.
    pub source: String,
    /// Seconds since Unix epoch, as reported by the upstream source.
    pub source_timestamp: i64,
}

impl Item {
    pub fn new(symbol: impl Into<String>, text: impl Into<String>, source_timestamp: i64) -> Self {
        Self { symbol: symbol.into(), text: text.into(), source: String::new(), source_timestamp }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Deduplication identity: `(text, source_timestamp)`.
    ///
    /// Two items with equal identity are the same item regardless of the
    /// order in which they were retrieved.
    pub fn identity(&self) -> ItemId {
        ItemId { text: self.text.clone(), source_timestamp: self.source_timestamp }
    }
}

/// Identity of an [`Item`] for recency checks.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemId {
    pub text: String,
    pub source_timestamp: i64,
}

impl ItemId {
    pub fn new(text: impl Into<String>, source_timestamp: i64) -> Self {
        Self { text: text.into(), source_timestamp }
    }
}
