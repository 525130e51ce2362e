//! Logging initialization using the `tracing` ecosystem.
//!
//! Console output is either human-readable or newline-delimited JSON (for log
//! shippers when the producer runs unattended for hours). An optional
//! directory adds a daily-rotating plain-text file via `tracing-appender`.
//! The level comes from `RUST_LOG` when set, otherwise from the caller.

use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Console output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Initialize the global tracing subscriber. Call once at program start.
///
/// - `log_level`: default filter if `RUST_LOG` is not set (e.g. `"info"`)
/// - `log_dir`: optional directory for daily-rotating log files
/// - `module_name`: log file prefix (e.g. `"hl-producer"`)
pub fn init_logging(log_level: &str, log_dir: Option<&str>, module_name: &str, format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let console_layer = match format {
        LogFormat::Pretty => fmt::layer().with_target(true).with_thread_ids(true).with_ansi(true).boxed(),
        LogFormat::Json => fmt::layer().json().with_current_span(false).with_target(true).boxed(),
    };

    let file_layer = log_dir.map(|dir| {
        let appender = tracing_appender::rolling::daily(dir, module_name);
        fmt::layer().with_writer(appender).with_ansi(false).with_target(true).with_thread_ids(true)
    });

    tracing_subscriber::registry().with(env_filter).with(console_layer).with(file_layer).init();
}
