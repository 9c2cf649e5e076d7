//! Durable client-side delivery queue.
//!
//! Records that fail to reach the ingestion service are kept in memory and
//! mirrored to a JSON file. A periodic retry pass drains the queue in
//! bulk batches. Entries are keyed by a hash of their content, so the same
//! record is never queued twice.
//!
//! ## Failure handling
//!
//! Network errors never reach the caller: a failed send queues the record
//! and reports `false`. A record leaves the queue only after a successful
//! send. Queue file problems are logged and the in-memory queue carries on.

use super::transport::LogSink;
use crate::config::ClientConfig;
use crate::crypto::sha256_hex;
use crate::error::{Error, Result};
use crate::record::LogRecord;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Buffer size of a [`LogStream`].
pub const STREAM_BUFFER: usize = 256;

/// A record waiting for redelivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedLogEntry {
    /// Content hash of `data`.
    pub id: String,
    /// The record itself.
    pub data: LogRecord,
}

impl QueuedLogEntry {
    /// Wrap a record, deriving its id from its content.
    pub fn new(data: LogRecord) -> Result<Self> {
        Ok(Self {
            id: content_hash(&data)?,
            data,
        })
    }
}

/// Hex SHA-256 of a record's JSON serialization.
pub fn content_hash(record: &LogRecord) -> Result<String> {
    Ok(sha256_hex(&serde_json::to_vec(record)?))
}

/// Outcome of one retry pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Bulk requests attempted.
    pub attempted_batches: usize,
    /// Records accepted by the sink.
    pub delivered: usize,
    /// Records put back for a later pass.
    pub requeued: usize,
}

/// Resilient sender in front of a [`LogSink`].
pub struct DeliveryQueue<S> {
    sink: S,
    queue: Mutex<Vec<QueuedLogEntry>>,
    path: PathBuf,
    max_bulk_log: usize,
    retry_interval: Duration,
    drain_lock: Mutex<()>,
}

impl<S: LogSink> DeliveryQueue<S> {
    /// Create a queue from client settings, loading any persisted entries.
    pub fn open(sink: S, config: &ClientConfig) -> Self {
        Self::with_options(
            sink,
            config.queue_path.clone(),
            config.max_bulk_log,
            config.retry_interval,
        )
    }

    /// Create a queue with explicit settings, loading any persisted entries.
    pub fn with_options(
        sink: S,
        path: impl Into<PathBuf>,
        max_bulk_log: usize,
        retry_interval: Duration,
    ) -> Self {
        let path = path.into();
        let entries = load_queue_file(&path);
        if !entries.is_empty() {
            info!(pending = entries.len(), path = %path.display(), "Loaded queued logs");
        }

        Self {
            sink,
            queue: Mutex::new(entries),
            path,
            max_bulk_log: max_bulk_log.max(1),
            retry_interval,
            drain_lock: Mutex::new(()),
        }
    }

    /// The queue file.
    pub fn queue_path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the pending entries.
    pub async fn pending(&self) -> Vec<QueuedLogEntry> {
        self.queue.lock().await.clone()
    }

    /// Number of pending entries.
    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Whether nothing is pending.
    pub async fn is_empty(&self) -> bool {
        self.queue.lock().await.is_empty()
    }

    /// Send one record now. Returns whether the sink accepted it.
    pub async fn send_log(&self, record: &LogRecord) -> bool {
        match self.sink.send_log(record).await {
            Ok(()) => true,
            Err(e) => {
                debug!("Send failed: {}", e);
                false
            }
        }
    }

    /// Send a batch now. An empty batch succeeds without a request.
    pub async fn send_logs(&self, records: &[LogRecord]) -> bool {
        if records.is_empty() {
            return true;
        }
        match self.sink.send_logs(records).await {
            Ok(()) => true,
            Err(e) => {
                debug!(count = records.len(), "Bulk send failed: {}", e);
                false
            }
        }
    }

    /// Queue a record for retry. Returns false if an identical record is already queued.
    pub async fn queue_log(&self, record: LogRecord) -> bool {
        let entry = match QueuedLogEntry::new(record) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Cannot queue log: {}", e);
                return false;
            }
        };

        let mut queue = self.queue.lock().await;
        if queue.iter().any(|queued| queued.id == entry.id) {
            return false;
        }
        queue.push(entry);
        self.persist(&queue).await;
        true
    }

    /// Send a record, queueing it on failure.
    pub async fn deliver(&self, record: LogRecord) -> bool {
        if self.send_log(&record).await {
            return true;
        }
        self.queue_log(record).await;
        false
    }

    /// Run one retry pass, waiting for any pass already in progress.
    pub async fn process_queue(&self) -> DrainReport {
        let _guard = self.drain_lock.lock().await;
        self.drain().await
    }

    /// Run one retry pass unless another is in progress.
    pub async fn try_process_queue(&self) -> Option<DrainReport> {
        let _guard = self.drain_lock.try_lock().ok()?;
        Some(self.drain().await)
    }

    async fn drain(&self) -> DrainReport {
        // In-flight entries stay queued (and on disk) until their batch is accepted.
        let pending = self.queue.lock().await.clone();
        let mut report = DrainReport::default();
        if pending.is_empty() {
            return report;
        }

        let mut delivered = HashSet::new();
        for batch in pending.chunks(self.max_bulk_log) {
            let records: Vec<LogRecord> = batch.iter().map(|entry| entry.data.clone()).collect();
            report.attempted_batches += 1;
            if self.send_logs(&records).await {
                report.delivered += batch.len();
                delivered.extend(batch.iter().map(|entry| entry.id.clone()));
            } else {
                report.requeued += batch.len();
            }
        }

        let mut queue = self.queue.lock().await;
        if !delivered.is_empty() {
            queue.retain(|entry| !delivered.contains(&entry.id));
            self.persist(&queue).await;
        }

        debug!(
            batches = report.attempted_batches,
            delivered = report.delivered,
            requeued = report.requeued,
            "Retry pass finished"
        );
        report
    }

    /// Retry on an interval until `shutdown` flips, then drain once more.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> DrainReport {
        let mut ticker = tokio::time::interval(self.retry_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.try_process_queue().await {
                        Some(report) if report.attempted_batches > 0 => {
                            info!(delivered = report.delivered, requeued = report.requeued, "Retried queued logs");
                        }
                        Some(_) => {}
                        None => debug!("Retry pass already running, skipping tick"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        let report = self.process_queue().await;
        let remaining = self.len().await;
        info!(
            delivered = report.delivered,
            remaining = remaining,
            "Final drain before shutdown"
        );
        report
    }

    async fn persist(&self, entries: &[QueuedLogEntry]) {
        if let Err(e) = write_queue_file(&self.path, entries).await {
            warn!(path = %self.path.display(), "Failed to persist queue: {}", e);
        }
    }
}

impl<S: LogSink + 'static> DeliveryQueue<S> {
    /// A push stream: each written record is delivered in order, queued on failure.
    pub fn stream(self: &Arc<Self>) -> LogStream {
        let (tx, mut rx) = mpsc::channel::<LogRecord>(STREAM_BUFFER);
        let queue = Arc::clone(self);
        let task = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                queue.deliver(record).await;
            }
        });
        LogStream { tx, task }
    }
}

/// Writable end of [`DeliveryQueue::stream`].
pub struct LogStream {
    tx: mpsc::Sender<LogRecord>,
    task: JoinHandle<()>,
}

impl LogStream {
    /// Push a record. Waits while the stream buffer is full.
    pub async fn write(&self, record: LogRecord) -> Result<()> {
        self.tx
            .send(record)
            .await
            .map_err(|_| Error::Transport("log stream closed".into()))
    }

    /// Close the stream and wait for every written record to be handled.
    pub async fn close(self) {
        drop(self.tx);
        if let Err(e) = self.task.await {
            warn!("Log stream task failed: {}", e);
        }
    }
}

fn load_queue_file(path: &Path) -> Vec<QueuedLogEntry> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!(path = %path.display(), "Unreadable queue file, starting empty: {}", e);
            return Vec::new();
        }
    };
    if content.trim().is_empty() {
        return Vec::new();
    }

    match serde_json::from_str::<Vec<QueuedLogEntry>>(&content) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %path.display(), "Corrupt queue file, starting empty: {}", e);
            Vec::new()
        }
    }
}

async fn write_queue_file(path: &Path, entries: &[QueuedLogEntry]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, serde_json::to_vec(entries)?).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct RejectAll;

    #[async_trait]
    impl LogSink for RejectAll {
        async fn send_log(&self, _: &LogRecord) -> Result<()> {
            Err(Error::Transport("down".into()))
        }
        async fn send_logs(&self, _: &[LogRecord]) -> Result<()> {
            Err(Error::Transport("down".into()))
        }
    }

    #[test]
    fn test_content_hash_is_stable() {
        let a = LogRecord::new("info", json!({"b": 2, "a": 1}));
        let b = LogRecord::new("info", json!({"a": 1, "b": 2}));
        assert_eq!(content_hash(&a).unwrap(), content_hash(&b).unwrap());
        assert_ne!(
            content_hash(&a).unwrap(),
            content_hash(&LogRecord::new("warn", json!({"a": 1, "b": 2}))).unwrap()
        );
        assert_eq!(content_hash(&a).unwrap().len(), 64);
    }

    #[tokio::test]
    async fn test_queue_dedup() {
        let dir = tempfile::tempdir().unwrap();
        let queue = DeliveryQueue::with_options(RejectAll, dir.path().join("q.json"), 10, Duration::from_secs(30));

        let record = LogRecord::new("info", json!("same"));
        assert!(queue.queue_log(record.clone()).await);
        assert!(!queue.queue_log(record).await);
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_empty_batch_sends_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let queue = DeliveryQueue::with_options(RejectAll, dir.path().join("q.json"), 10, Duration::from_secs(30));
        assert!(queue.send_logs(&[]).await);
    }

    #[tokio::test]
    async fn test_missing_and_corrupt_files_start_empty() {
        let dir = tempfile::tempdir().unwrap();
        let missing = DeliveryQueue::with_options(RejectAll, dir.path().join("none.json"), 10, Duration::from_secs(30));
        assert!(missing.is_empty().await);

        let corrupt_path = dir.path().join("bad.json");
        std::fs::write(&corrupt_path, "{not json").unwrap();
        let corrupt = DeliveryQueue::with_options(RejectAll, &corrupt_path, 10, Duration::from_secs(30));
        assert!(corrupt.is_empty().await);

        assert!(corrupt.queue_log(LogRecord::new("info", json!(1))).await);
        let reloaded = load_queue_file(&corrupt_path);
        assert_eq!(reloaded.len(), 1);
    }
}
