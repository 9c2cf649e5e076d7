//! Local relay: a unix socket that forwards log lines to the delivery queue.
//!
//! Producers write newline-delimited JSON [`LogRecord`]s to the socket. The
//! relay drops the ingestion service's own access logs, so shipping logs
//! does not generate more logs to ship.

use super::queue::DeliveryQueue;
use super::transport::LogSink;
use crate::error::{Error, Result};
use crate::logging::sanitize_for_log;
use crate::record::LogRecord;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Paths of the ingestion endpoints.
pub const INGEST_PATHS: &[&str] = &["/logs", "/logs/bulk"];

/// Decides which relayed records are forwarded.
#[derive(Debug, Clone, Default)]
pub struct RelayFilter;

impl RelayFilter {
    /// False only for successful access logs of the ingestion endpoints.
    pub fn should_forward(&self, record: &LogRecord) -> bool {
        let Some(path) = request_path(record) else {
            return true;
        };
        if !INGEST_PATHS.contains(&path) {
            return true;
        }
        if record.is_error_level() {
            return true;
        }
        matches!(response_status(record), Some(status) if status >= 400)
    }
}

fn request_path(record: &LogRecord) -> Option<&str> {
    let request = record.request.as_ref()?;
    let raw = request
        .get("url")
        .or_else(|| request.get("path"))
        .and_then(Value::as_str)?;

    let without_query = raw.split(['?', '#']).next().unwrap_or(raw);
    // Absolute URLs: drop scheme and authority.
    let path = match without_query.split_once("://") {
        Some((_, rest)) => rest.find('/').map(|i| &rest[i..]).unwrap_or("/"),
        None => without_query,
    };
    Some(if path.len() > 1 { path.trim_end_matches('/') } else { path })
}

fn response_status(record: &LogRecord) -> Option<u64> {
    let response = record.response.as_ref()?;
    let status = response
        .get("statusCode")
        .or_else(|| response.get("status"))?;
    match status {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Unix socket listener feeding a [`DeliveryQueue`].
pub struct Relay<S> {
    listener: UnixListener,
    path: PathBuf,
    queue: Arc<DeliveryQueue<S>>,
    filter: RelayFilter,
}

impl<S: LogSink + 'static> Relay<S> {
    /// Bind the socket, replacing a stale socket file.
    pub fn bind(path: impl Into<PathBuf>, queue: Arc<DeliveryQueue<S>>) -> Result<Self> {
        let path = path.into();
        match std::fs::remove_file(&path) {
            Ok(()) => debug!(path = %path.display(), "Removed stale socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let listener = UnixListener::bind(&path)?;
        info!(path = %path.display(), "Relay listening");
        Ok(Self {
            listener,
            path,
            queue,
            filter: RelayFilter,
        })
    }

    /// Socket path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until `shutdown` flips, then remove the socket file.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            let queue = Arc::clone(&self.queue);
                            let filter = self.filter.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, queue, filter).await {
                                    warn!("Relay connection error: {}", e);
                                }
                            });
                        }
                        Err(e) => warn!("Accept failed: {}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        drop(self.listener);
        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!("Socket cleanup: {}", e);
        }
        info!("Relay stopped");
        Ok(())
    }
}

async fn handle_connection<S: LogSink>(
    stream: UnixStream,
    queue: Arc<DeliveryQueue<S>>,
    filter: RelayFilter,
) -> Result<()> {
    let mut lines = BufReader::new(stream).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let record: LogRecord = match serde_json::from_str(line) {
            Ok(record) => record,
            Err(e) => {
                let preview: String = line.chars().take(80).collect();
                warn!(line = %sanitize_for_log(&preview), "Skipping malformed log line: {}", e);
                continue;
            }
        };

        if filter.should_forward(&record) {
            queue.deliver(record).await;
        } else {
            debug!("Dropped ingestion access log");
        }
    }
    Ok(())
}

/// Producer side of the relay socket.
pub struct RelayClient {
    stream: UnixStream,
}

impl RelayClient {
    /// Connect to a relay socket.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let stream = UnixStream::connect(path.as_ref())
            .await
            .map_err(|e| Error::Transport(format!("relay socket: {}", e)))?;
        Ok(Self { stream })
    }

    /// Write one record as a JSON line.
    pub async fn send(&mut self, record: &LogRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        self.stream.write_all(&line).await?;
        Ok(())
    }

    /// Flush and close the write half.
    pub async fn close(mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}
