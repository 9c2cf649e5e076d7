//! LogSink Relay
//!
//! Local forwarder: producers write NDJSON log records to a unix socket and
//! the relay ships them to the ingestion service.
//!
//! ## Relay Properties
//!
//! - Undeliverable records are persisted and retried on an interval
//! - Identical records are queued once
//! - The ingestion service's own access logs are not forwarded
//! - On shutdown the retry timer stops and one final drain runs

use anyhow::Result;
use clap::Parser;
use logsink_core::delivery::{DeliveryQueue, HttpSink, Relay};
use logsink_core::logging::RedactedKey;
use logsink_core::ClientConfig;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// LogSink Relay - local log forwarder
#[derive(Parser)]
#[command(name = "logsink-relay")]
#[command(author, version, about)]
struct Args {
    /// Unix socket to listen on
    #[arg(short, long, env = "LOGSINK_SOCKET", default_value = "/tmp/logsink.sock")]
    socket: PathBuf,

    /// Ingestion service base URL
    #[arg(long, env = "LOGSINK_ENDPOINT", default_value = logsink_core::config::DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Application name
    #[arg(long, env = "LOGSINK_APP_NAME")]
    app_name: String,

    /// Application API secret
    #[arg(long, env = "LOGSINK_API_SECRET", hide_env_values = true)]
    api_secret: String,

    /// File holding undelivered records
    #[arg(long, env = "LOGSINK_QUEUE_FILE", default_value = logsink_core::config::DEFAULT_QUEUE_FILE)]
    queue_file: PathBuf,

    /// Records per bulk request when retrying
    #[arg(long, env = "LOGSINK_MAX_BULK", default_value = "10")]
    max_bulk: usize,

    /// Seconds between retry passes
    #[arg(long, env = "LOGSINK_RETRY_SECS", default_value = "30")]
    retry_secs: u64,

    /// Enable verbose logging
    #[arg(short, long, env = "LOGSINK_VERBOSE")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = ClientConfig::new(&args.app_name, &args.api_secret)?
        .with_endpoint(&args.endpoint)
        .with_queue_path(&args.queue_file)
        .with_max_bulk_log(args.max_bulk)?
        .with_retry_interval(Duration::from_secs(args.retry_secs.max(1)));

    let sink = HttpSink::new(&config)?;
    let queue = Arc::new(DeliveryQueue::open(sink, &config));
    let relay = Relay::bind(&args.socket, Arc::clone(&queue))?;

    info!(
        socket = %args.socket.display(),
        endpoint = %config.endpoint,
        app = %config.app_name,
        key = %RedactedKey(&config.api_secret),
        "LogSink relay started"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let retry_queue = Arc::clone(&queue);
    let retry_rx = shutdown_rx.clone();
    let retry = tokio::spawn(async move { retry_queue.run(retry_rx).await });
    let server = tokio::spawn(relay.serve(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    let _ = shutdown_tx.send(true);

    match server.await {
        Ok(Err(e)) => error!("Relay error: {}", e),
        Err(e) => error!("Relay task failed: {}", e),
        Ok(Ok(())) => {}
    }
    let report = retry.await?;
    info!(
        delivered = report.delivered,
        pending = queue.len().await,
        "Relay stopped"
    );

    Ok(())
}
