//! Configuration parsing for the headline pipeline.
//!
//! Producer and consumer read their settings from a single JSON file. Every
//! section except `transport` is optional and falls back to defaults.
//!
//! # Example config
//!
//! ```json
//! {
//!   "app": { "module_name": "hl-producer", "log_path": "/tmp/log" },
//!   "transport": { "mode": "uds", "uds_path": "/tmp/headlines.sock" },
//!   "producer": {
//!     "symbols": ["AAPL", "MSFT"],
//!     "poll_interval_ms": 2000,
//!     "window_size": 100,
//!     "finnhub": { "lookback_days": 1 }
//!   },
//!   "consumer": {
//!     "max_sessions": 10,
//!     "processor": { "implementation": "echo", "device": "cpu", "batch_size": 32 }
//!   }
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;

use ahash::AHashSet;
use serde::Deserialize;

use crate::error::HlError;
use crate::transport::{ConnectOptions, Endpoint};
use crate::wire::DEFAULT_MAX_FRAME_LEN;

/// Top-level application config, deserialized from a JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Module metadata (name, log path).
    #[serde(default)]
    pub app: ModuleMeta,

    /// Endpoint selection shared by producer and consumer.
    pub transport: TransportConfig,

    #[serde(default)]
    pub producer: ProducerConfig,

    #[serde(default)]
    pub consumer: ConsumerConfig,
}

impl AppConfig {
    /// Reject configurations that cannot work at all. Called by [`load_config`].
    pub fn validate(&self) -> Result<(), HlError> {
        self.transport.endpoint()?;
        if self.transport.connect_timeout_ms == 0 || self.transport.summary_timeout_ms == 0 {
            return Err(HlError::Config("transport timeouts must be non-zero".into()));
        }
        if self.transport.max_message_size < 64 {
            return Err(HlError::Config("transport.max_message_size is too small".into()));
        }
        self.producer.validate()?;
        if self.consumer.max_sessions == 0 {
            return Err(HlError::Config("consumer.max_sessions must be at least 1".into()));
        }
        Ok(())
    }
}

/// Module metadata block.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModuleMeta {
    pub module_name: Option<String>,
    pub log_path: Option<String>,
    /// Emit JSON lines on the console instead of human-readable output.
    #[serde(default)]
    pub json_logs: bool,
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Transport binding selected at session construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Unix domain socket at `uds_path`.
    #[serde(alias = "local")]
    Uds,
    /// TCP at `host:port`.
    #[serde(alias = "remote")]
    Tcp,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    pub mode: TransportMode,

    pub uds_path: Option<PathBuf>,

    /// Host to connect to (producer) or bind on (consumer). Default `localhost`.
    pub host: Option<String>,

    /// Default 50051.
    pub port: Option<u16>,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// How long the producer waits for the summary after finishing.
    #[serde(default = "default_summary_timeout_ms")]
    pub summary_timeout_ms: u64,

    /// Upper bound for one serialized frame, in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

impl TransportConfig {
    /// Resolve the configured endpoint.
    pub fn endpoint(&self) -> Result<Endpoint, HlError> {
        match self.mode {
            TransportMode::Uds => {
                let path = self
                    .uds_path
                    .clone()
                    .filter(|p| !p.as_os_str().is_empty())
                    .ok_or_else(|| HlError::Config("transport.uds_path is required for uds mode".into()))?;
                Ok(Endpoint::Local(path))
            }
            TransportMode::Tcp => {
                let host = self.host.clone().unwrap_or_else(|| "localhost".to_string());
                if host.trim().is_empty() {
                    return Err(HlError::Config("transport.host must not be empty".into()));
                }
                Ok(Endpoint::Remote { host, port: self.port.unwrap_or(50051) })
            }
        }
    }

    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            summary_timeout: Duration::from_millis(self.summary_timeout_ms),
            max_frame_len: self.max_message_size,
        }
    }
}

// ---------------------------------------------------------------------------
// Producer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ProducerConfig {
    /// Symbols polled each cycle, in this order.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Identities retained per symbol for deduplication.
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// First reconnect delay after consecutive connect failures.
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    #[serde(default)]
    pub finnhub: FinnhubConfig,
}

impl ProducerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<(), HlError> {
        if self.symbols.is_empty() {
            return Err(HlError::Config("producer.symbols must not be empty".into()));
        }
        let mut unique = AHashSet::new();
        for s in &self.symbols {
            if s.trim().is_empty() {
                return Err(HlError::Config("producer.symbols contains an empty symbol".into()));
            }
            if !unique.insert(s.as_str()) {
                return Err(HlError::Config(format!("producer.symbols lists {s} twice")));
            }
        }
        if self.window_size == 0 {
            return Err(HlError::Config("producer.window_size must be at least 1".into()));
        }
        Ok(())
    }
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            poll_interval_ms: default_poll_interval_ms(),
            window_size: default_window_size(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            finnhub: FinnhubConfig::default(),
        }
    }
}

/// Finnhub company-news source settings.
#[derive(Debug, Clone, Deserialize)]
pub struct FinnhubConfig {
    /// Overridden by the `FINNHUB_API_KEY` environment variable.
    pub api_key: Option<String>,

    #[serde(default = "default_finnhub_url")]
    pub base_url: String,

    /// How many days back the `from` date reaches.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u64,

    #[serde(default = "default_max_items")]
    pub max_items_per_symbol: usize,

    /// Minimum spacing between two requests.
    #[serde(default = "default_min_request_interval_ms")]
    pub min_request_interval_ms: u64,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for FinnhubConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_finnhub_url(),
            lookback_days: default_lookback_days(),
            max_items_per_symbol: default_max_items(),
            min_request_interval_ms: default_min_request_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// Consumer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerConfig {
    /// Sessions served concurrently; further connections wait.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    #[serde(default)]
    pub processor: ProcessorConfig,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self { max_sessions: default_max_sessions(), processor: ProcessorConfig::default() }
    }
}

/// Processing capability selection. Validated by the processor factory.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorConfig {
    /// Implementation name (e.g. `"echo"`).
    #[serde(alias = "model_type")]
    pub implementation: Option<String>,
    pub device: Option<String>,
    pub batch_size: Option<usize>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self { implementation: Some("echo".into()), device: Some("cpu".into()), batch_size: Some(32) }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_summary_timeout_ms() -> u64 {
    30_000
}
fn default_max_message_size() -> usize {
    DEFAULT_MAX_FRAME_LEN
}
fn default_symbols() -> Vec<String> {
    vec!["AAPL".into(), "MSFT".into()]
}
fn default_poll_interval_ms() -> u64 {
    2_000
}
fn default_window_size() -> usize {
    crate::dedup::DEFAULT_WINDOW_SIZE
}
fn default_backoff_initial_ms() -> u64 {
    100
}
fn default_backoff_max_ms() -> u64 {
    30_000
}
fn default_finnhub_url() -> String {
    "https://finnhub.io/api/v1".into()
}
fn default_lookback_days() -> u64 {
    1
}
fn default_max_items() -> usize {
    10
}
fn default_min_request_interval_ms() -> u64 {
    1_000
}
fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_max_sessions() -> usize {
    10
}

/// Load, parse and validate a JSON config file.
pub fn load_config(path: &std::path::Path) -> anyhow::Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config = parse_config(&content)?;
    Ok(config)
}

/// Parse and validate a JSON config document.
pub fn parse_config(content: &str) -> Result<AppConfig, HlError> {
    let config: AppConfig = serde_json::from_str(content).map_err(|e| HlError::Config(e.to_string()))?;
    config.validate()?;
    Ok(config)
}
