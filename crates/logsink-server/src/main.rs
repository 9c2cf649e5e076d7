//! LogSink Server
//!
//! Accepts logs from authenticated applications, encrypts them per
//! application and stores them in SQLite. Expired logs are purged hourly.

use anyhow::Result;
use clap::Parser;
use logsink_core::identity::{system_time_ms, CodeDeliveryRegistry, IdentityService};
use logsink_core::storage::{Database, DatabaseConfig, DEFAULT_DB_NAME};
use logsink_server::{router, AppState};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Mutex as TokioMutex;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// LogSink - self-hosted log ingestion
#[derive(Parser)]
#[command(name = "logsink-server")]
#[command(author, version, about)]
struct Args {
    /// Listen address
    #[arg(short, long, env = "LOGSINK_BIND", default_value = "127.0.0.1:4000")]
    bind: String,

    /// Directory holding the database
    #[arg(long, env = "LOGSINK_DATA_DIR", default_value = ".logsink")]
    data_dir: PathBuf,

    /// Days to keep ingested logs (0 keeps them forever)
    #[arg(long, env = "LOGSINK_LOG_TTL_DAYS", default_value = "30")]
    log_ttl_days: u64,

    /// One-time code delivery channel
    #[arg(long, env = "LOGSINK_CODE_DELIVERY", default_value = "log")]
    code_delivery: String,

    /// Enable verbose logging
    #[arg(short, long, env = "LOGSINK_VERBOSE")]
    verbose: bool,
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutting down");
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

    let delivery = CodeDeliveryRegistry::resolve(&args.code_delivery)?;

    std::fs::create_dir_all(&args.data_dir).map_err(|e| {
        anyhow::anyhow!("Failed to create data directory {}: {}", args.data_dir.display(), e)
    })?;
    let db_config = DatabaseConfig {
        path: args.data_dir.join(DEFAULT_DB_NAME).to_string_lossy().into_owned(),
        in_memory: false,
    };
    let database = Database::open(&db_config)
        .map_err(|e| anyhow::anyhow!("Failed to open database: {}", e))?;
    let database = Arc::new(TokioMutex::new(database));

    let log_ttl = (args.log_ttl_days > 0).then(|| Duration::from_secs(args.log_ttl_days * 24 * 3600));
    let identity = IdentityService::new(Arc::clone(&database), delivery);
    let state = Arc::new(AppState::new(Arc::clone(&database), identity, log_ttl));

    // Start purge task
    let purge_db = Arc::clone(&database);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(3600));
        loop {
            interval.tick().await;
            let db = purge_db.lock().await;
            match db.purge_expired_logs(system_time_ms()) {
                Ok(purged) => info!(purged, "Purged expired logs"),
                Err(e) => warn!("Log purge failed: {}", e),
            }
        }
    });

    let listener = TcpListener::bind(&args.bind).await?;

    info!(
        address = %args.bind,
        data_dir = %args.data_dir.display(),
        code_delivery = %args.code_delivery,
        log_ttl_days = args.log_ttl_days,
        "LogSink server started"
    );
    if args.bind.starts_with("0.0.0.0") {
        warn!("Server accessible from network; put it behind TLS");
    }

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
