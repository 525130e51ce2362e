//! # hl-runner
//!
//! Entry point for the headline pipeline. Runs either side of a session from
//! one JSON configuration file.
//!
//! # Usage
//!
//! ```bash
//! hl-runner config.json consume --log-level info
//! hl-runner config.json produce --log-dir /var/log/hl
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hl_core::config::AppConfig;
use hl_core::logging::LogFormat;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Headline ingestion pipeline runner.
#[derive(Parser)]
#[command(name = "hl-runner", about = "Headline ingestion pipeline runner")]
struct Cli {
    /// Configuration file path (JSON).
    config: PathBuf,

    #[command(subcommand)]
    role: Role,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Optional log directory for file output. Overrides `app.log_path`.
    #[arg(long)]
    log_dir: Option<String>,
}

#[derive(Subcommand, Clone, Copy)]
enum Role {
    /// Poll headline sources and stream new items to the consumer.
    Produce,
    /// Accept producer sessions and process their batches.
    Consume,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    // Config errors abort before logging or any network activity.
    let config = hl_core::config::load_config(&cli.config)
        .with_context(|| format!("loading config {}", cli.config.display()))?;

    let default_name = match cli.role {
        Role::Produce => "hl-producer",
        Role::Consume => "hl-consumer",
    };
    let module_name = config.app.module_name.clone().unwrap_or_else(|| default_name.to_string());
    let log_dir = cli.log_dir.clone().or_else(|| config.app.log_path.clone());
    let format = if config.app.json_logs { LogFormat::Json } else { LogFormat::Pretty };
    hl_core::logging::init_logging(&cli.log_level, log_dir.as_deref(), &module_name, format);

    info!(
        "{module_name} starting: config={}, transport={}, log_level={}",
        cli.config.display(),
        config.transport.endpoint()?,
        cli.log_level,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown signal received"),
            Err(e) => error!("cannot listen for shutdown signal: {e}"),
        }
        let _ = shutdown_tx.send(true);
    });

    match cli.role {
        Role::Produce => produce(&config, shutdown_rx).await?,
        Role::Consume => consume(&config, shutdown_rx).await?,
    }

    info!("{module_name} stopped");
    Ok(())
}

async fn produce(config: &AppConfig, shutdown: watch::Receiver<bool>) -> Result<()> {
    let api_key = std::env::var("FINNHUB_API_KEY")
        .ok()
        .or_else(|| config.producer.finnhub.api_key.clone())
        .context("FINNHUB_API_KEY is not set and producer.finnhub.api_key is missing")?;

    let fetcher = hl_producer::finnhub::FinnhubFetcher::new(api_key, &config.producer.finnhub)?;
    let settings = hl_producer::ProducerSettings::from_config(config)?;
    let mut producer = hl_producer::ProducerLoop::new(settings, Box::new(fetcher));

    match producer.run(shutdown).await {
        Some(summary) => info!("consumer processed {summary}"),
        None => warn!("no open session at shutdown, nothing to summarize"),
    }
    info!("producer stats: {:?}", producer.stats());
    Ok(())
}

async fn consume(config: &AppConfig, shutdown: watch::Receiver<bool>) -> Result<()> {
    let processor = hl_consumer::create_processor(&config.consumer.processor)?;
    let endpoint = config.transport.endpoint()?;
    let listener = hl_core::transport::bind(&endpoint, config.transport.max_message_size).await?;

    let (dispatcher, mut reports) = hl_consumer::Dispatcher::new(processor, config.consumer.max_sessions);
    tokio::spawn(async move {
        while let Some(report) = reports.recv().await {
            info!(
                "session {} from {}: {} ({} failed batch(es))",
                report.session_id,
                report.peer,
                report.summary,
                report.failed_batches,
            );
        }
    });

    dispatcher.serve(listener, shutdown).await;
    Ok(())
}
