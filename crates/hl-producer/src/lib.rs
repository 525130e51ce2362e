//! # hl-producer
//!
//! Producer side of the headline pipeline.
//!
//! ## Architecture
//!
//! ```text
//! Fetcher (per symbol) ──► BatchAssembler (RecencyCache) ──► Session ──► consumer
//!          ▲                                                    │
//!          └──────────── ProducerLoop (poll cadence) ───────────┘
//! ```
//!
//! - [`assembler`]: turns one polling round into at most one batch
//! - [`finnhub`]: Finnhub company-news [`Fetcher`]
//! - [`producer`]: the long-running polling / session loop

pub mod assembler;
pub mod finnhub;
pub mod producer;

use async_trait::async_trait;
use hl_core::{HlError, Item};

/// Upstream news source for one symbol.
///
/// Implementations enforce their own rate limiting. The producer loop calls
/// `fetch` at most once per symbol per cycle and never concurrently.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Human-readable source name.
    fn name(&self) -> &str;

    /// Latest items for `symbol`, in the order the source returned them.
    async fn fetch(&self, symbol: &str) -> Result<Vec<Item>, HlError>;
}

pub use assembler::BatchAssembler;
pub use producer::{ProducerLoop, ProducerSettings, ProducerStats};
