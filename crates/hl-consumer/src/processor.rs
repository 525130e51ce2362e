//! Processor factory and built-in processors.
//!
//! The factory validates the `consumer.processor` config block and returns the
//! implementation it names. Only `"echo"` ships here: it walks the batch in
//! `batch_size` chunks, logs each headline and returns one unlabelled
//! [`Inference`] per item. Model-backed processors plug in through the
//! [`Processor`] trait.

use std::sync::Arc;

use async_trait::async_trait;
use hl_core::config::ProcessorConfig;
use hl_core::{Batch, HlError};
use tracing::{debug, info};

use crate::{Inference, Outcome, Processor};

/// Build the processor named by `config.implementation`.
pub fn create_processor(config: &ProcessorConfig) -> Result<Arc<dyn Processor>, HlError> {
    let implementation = config
        .implementation
        .as_deref()
        .ok_or_else(|| HlError::Config("missing consumer.processor.implementation".into()))?;

    match implementation {
        "echo" => {
            let processor = EchoProcessor::from_config(config)?;
            info!("creating echo processor (device={}, batch_size={})", processor.device, processor.batch_size);
            Ok(Arc::new(processor))
        }
        other => Err(HlError::Config(format!("unknown processor implementation: {other}"))),
    }
}

/// Logs headlines and returns them without a sentiment label.
#[derive(Debug, Clone)]
pub struct EchoProcessor {
    device: String,
    batch_size: usize,
}

impl EchoProcessor {
    pub fn from_config(config: &ProcessorConfig) -> Result<Self, HlError> {
        let device =
            config.device.clone().ok_or_else(|| HlError::Config("missing consumer.processor.device".into()))?;
        let batch_size = match config.batch_size {
            Some(n) if n > 0 => n,
            Some(_) => return Err(HlError::Config("consumer.processor.batch_size must be at least 1".into())),
            None => return Err(HlError::Config("missing consumer.processor.batch_size".into())),
        };
        Ok(Self { device, batch_size })
    }
}

#[async_trait]
impl Processor for EchoProcessor {
    fn name(&self) -> &str {
        "echo"
    }

    async fn process(&self, batch: &Batch) -> Result<Outcome, HlError> {
        debug!("processing batch of {} headline(s) on {}", batch.len(), self.device);
        let mut inferences = Vec::with_capacity(batch.len());
        for chunk in batch.items.chunks(self.batch_size) {
            for item in chunk {
                debug!("[{}] {} ({})", item.symbol, truncate(&item.text, 100), item.source);
                inferences.push(Inference {
                    symbol: item.symbol.clone(),
                    headline: item.text.clone(),
                    timestamp: item.source_timestamp,
                    sentiment: None,
                    confidence: None,
                });
            }
        }
        Ok(Outcome { item_count: batch.len(), inferences })
    }
}

/// At most `max` characters of `s`.
fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hl_core::Item;

    fn cfg(implementation: Option<&str>, device: Option<&str>, batch_size: Option<usize>) -> ProcessorConfig {
        ProcessorConfig {
            implementation: implementation.map(str::to_string),
            device: device.map(str::to_string),
            batch_size,
        }
    }

    #[test]
    fn factory_validates_config() {
        assert!(create_processor(&cfg(Some("echo"), Some("cpu"), Some(8))).is_ok());
        assert!(matches!(create_processor(&cfg(None, Some("cpu"), Some(8))), Err(HlError::Config(_))));
        assert!(matches!(create_processor(&cfg(Some("finbert"), Some("cpu"), Some(8))), Err(HlError::Config(_))));
        assert!(matches!(create_processor(&cfg(Some("echo"), None, Some(8))), Err(HlError::Config(_))));
        assert!(matches!(create_processor(&cfg(Some("echo"), Some("cpu"), Some(0))), Err(HlError::Config(_))));
    }

    #[tokio::test]
    async fn echo_returns_one_inference_per_item_in_order() {
        let p = create_processor(&cfg(Some("echo"), Some("cpu"), Some(2))).unwrap();
        let items = (0..5).map(|i| Item::new("MSFT", format!("h{i}"), i)).collect();
        let batch = Batch::new(items, 0).unwrap();

        let outcome = p.process(&batch).await.unwrap();
        assert_eq!(outcome.item_count, 5);
        let heads: Vec<_> = outcome.inferences.iter().map(|i| i.headline.as_str()).collect();
        assert_eq!(heads, ["h0", "h1", "h2", "h3", "h4"]);
        assert!(outcome.inferences.iter().all(|i| i.sentiment.is_none()));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
