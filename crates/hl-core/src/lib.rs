//! # hl-core
//!
//! Core crate for the headline streaming pipeline, providing:
//!
//! - **Types** (`types`): items, batches, session summaries
//! - **Configuration** (`config`): JSON config deserialization and validation
//! - **Error types** (`error`): domain-specific `HlError` via thiserror
//! - **Deduplication** (`dedup`): per-symbol bounded recency windows
//! - **Wire format** (`wire`): length-prefixed rkyv frames over a byte stream
//! - **Transport** (`transport`): Unix-socket and TCP bindings behind one trait
//! - **Session** (`session`): producer/consumer session state machines
//! - **Backoff** (`backoff`): bounded exponential retry delays
//! - **Time utilities** (`time_util`): wall-clock timestamps
//! - **Logging** (`logging`): tracing-based structured logging

pub mod backoff;
pub mod config;
pub mod dedup;
pub mod error;
pub mod logging;
pub mod session;
pub mod time_util;
pub mod transport;
pub mod types;
pub mod wire;

// Re-export types at crate root for convenience.
pub use error::HlError;
pub use types::*;
