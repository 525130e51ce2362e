//! # hl-consumer
//!
//! Consumer side of the headline pipeline: accepts producer sessions, runs
//! each received batch through a [`Processor`], and answers end-of-stream with
//! the session [`Summary`](hl_core::Summary).
//!
//! - [`dispatcher`]: accept loop and per-session batch dispatch
//! - [`processor`]: processor factory and the built-in implementations

pub mod dispatcher;
pub mod processor;

use async_trait::async_trait;
use hl_core::{Batch, HlError};
use serde::Serialize;

/// Result for one headline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Inference {
    pub symbol: String,
    pub headline: String,
    pub timestamp: i64,
    /// Model label, if the processor produces one.
    pub sentiment: Option<String>,
    pub confidence: Option<f32>,
}

/// What a processor reports for one batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Outcome {
    pub item_count: usize,
    pub inferences: Vec<Inference>,
}

/// Batch processing capability.
///
/// A dispatcher never calls `process` concurrently for the same session, but
/// different sessions may call it in parallel, hence `Sync`.
#[async_trait]
pub trait Processor: Send + Sync {
    fn name(&self) -> &str;

    async fn process(&self, batch: &Batch) -> Result<Outcome, HlError>;
}

pub use dispatcher::{BatchFailure, Dispatcher, SessionReport};
pub use processor::create_processor;
