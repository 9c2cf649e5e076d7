//! Integration tests for the client delivery path.
//!
//! Tests cover:
//! - Bulk retry passes with partial batch failures
//! - Content-hash deduplication across restarts
//! - Push streams and the retry loop's final drain
//! - The unix socket relay, including filtering and malformed input

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::sync::{watch, Notify};

use logsink_core::delivery::{DeliveryQueue, LogSink, QueuedLogEntry, Relay, RelayClient};
use logsink_core::{Error, LogRecord, Result};

// ========================================
// Test Helpers
// ========================================

#[derive(Default)]
struct SinkState {
    /// Size of every bulk call, in order.
    bulk_calls: Vec<usize>,
    /// Bulk call indexes (0-based) that fail.
    failing_bulk_calls: HashSet<usize>,
    /// Fail every request.
    offline: bool,
    received: Vec<LogRecord>,
}

/// A sink whose failures are scripted by the test.
#[derive(Clone, Default)]
struct ScriptedSink(Arc<Mutex<SinkState>>);

impl ScriptedSink {
    fn offline() -> Self {
        let sink = Self::default();
        sink.set_offline(true);
        sink
    }

    fn set_offline(&self, offline: bool) {
        self.0.lock().unwrap().offline = offline;
    }

    fn fail_bulk_call(&self, index: usize) {
        self.0.lock().unwrap().failing_bulk_calls.insert(index);
    }

    fn bulk_calls(&self) -> Vec<usize> {
        self.0.lock().unwrap().bulk_calls.clone()
    }

    fn received(&self) -> Vec<LogRecord> {
        self.0.lock().unwrap().received.clone()
    }
}

#[async_trait]
impl LogSink for ScriptedSink {
    async fn send_log(&self, record: &LogRecord) -> Result<()> {
        let mut state = self.0.lock().unwrap();
        if state.offline {
            return Err(Error::Transport("offline".into()));
        }
        state.received.push(record.clone());
        Ok(())
    }

    async fn send_logs(&self, records: &[LogRecord]) -> Result<()> {
        let mut state = self.0.lock().unwrap();
        let index = state.bulk_calls.len();
        state.bulk_calls.push(records.len());
        if state.offline || state.failing_bulk_calls.contains(&index) {
            return Err(Error::Transport("batch rejected".into()));
        }
        state.received.extend_from_slice(records);
        Ok(())
    }
}

/// A sink that holds every bulk call until the test releases it.
#[derive(Clone, Default)]
struct GatedSink {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl LogSink for GatedSink {
    async fn send_log(&self, _: &LogRecord) -> Result<()> {
        Err(Error::Transport("offline".into()))
    }

    async fn send_logs(&self, _: &[LogRecord]) -> Result<()> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(())
    }
}

fn read_queue_file(path: &std::path::Path) -> Vec<QueuedLogEntry> {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

fn record(n: usize) -> LogRecord {
    LogRecord::new("info", json!({ "n": n }))
}

fn queue_at(sink: ScriptedSink, path: &std::path::Path) -> Arc<DeliveryQueue<ScriptedSink>> {
    Arc::new(DeliveryQueue::with_options(sink, path, 10, Duration::from_secs(3600)))
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

// ========================================
// Queue
// ========================================

#[tokio::test]
async fn test_partial_batch_failure_requeues_only_that_batch() {
    let dir = tempfile::tempdir().unwrap();
    let sink = ScriptedSink::default();
    let queue = queue_at(sink.clone(), &dir.path().join("queue.json"));

    for n in 0..25 {
        assert!(queue.queue_log(record(n)).await);
    }
    sink.fail_bulk_call(1);

    let report = queue.process_queue().await;
    assert_eq!(sink.bulk_calls(), vec![10, 10, 5]);
    assert_eq!(report.attempted_batches, 3);
    assert_eq!(report.delivered, 15);
    assert_eq!(report.requeued, 10);

    let remaining: Vec<_> = queue.pending().await.into_iter().map(|e| e.data).collect();
    assert_eq!(remaining, (10..20).map(record).collect::<Vec<_>>());

    // Next pass delivers the rest in one batch.
    let report = queue.process_queue().await;
    assert_eq!(report.delivered, 10);
    assert!(queue.is_empty().await);
    assert_eq!(sink.received().len(), 25);
}

#[tokio::test]
async fn test_queue_survives_restart_without_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.json");

    {
        let queue = queue_at(ScriptedSink::offline(), &path);
        assert!(!queue.deliver(record(1)).await);
        assert!(!queue.deliver(record(1)).await);
        assert!(!queue.deliver(record(2)).await);
        assert_eq!(queue.len().await, 2);
    }

    let sink = ScriptedSink::default();
    let queue = queue_at(sink.clone(), &path);
    assert_eq!(queue.len().await, 2);
    assert!(!queue.queue_log(record(2)).await);

    queue.process_queue().await;
    assert!(queue.is_empty().await);
    assert_eq!(sink.received(), vec![record(1), record(2)]);

    let reloaded = queue_at(ScriptedSink::default(), &path);
    assert!(reloaded.is_empty().await);
}

#[tokio::test]
async fn test_offline_pass_keeps_everything() {
    let dir = tempfile::tempdir().unwrap();
    let sink = ScriptedSink::offline();
    let queue = queue_at(sink.clone(), &dir.path().join("queue.json"));
    for n in 0..3 {
        queue.queue_log(record(n)).await;
    }

    let report = queue.process_queue().await;
    assert_eq!(report.delivered, 0);
    assert_eq!(report.requeued, 3);
    assert_eq!(queue.len().await, 3);
}

#[tokio::test]
async fn test_records_stay_on_disk_while_a_pass_is_sending() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.json");
    let sink = GatedSink::default();
    let queue = Arc::new(DeliveryQueue::with_options(
        sink.clone(),
        &path,
        10,
        Duration::from_secs(3600),
    ));
    for n in 0..5 {
        queue.queue_log(record(n)).await;
    }

    let pass = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move { queue.process_queue().await })
    };
    sink.entered.notified().await;

    // Queued mid-pass; the in-flight five must still be persisted.
    assert!(!queue.deliver(record(5)).await);
    assert!(!queue.queue_log(record(2)).await);
    let on_disk: Vec<_> = read_queue_file(&path).into_iter().map(|e| e.data).collect();
    assert_eq!(on_disk, (0..6).map(record).collect::<Vec<_>>());

    sink.release.notify_one();
    let report = pass.await.unwrap();
    assert_eq!(report.delivered, 5);

    let on_disk: Vec<_> = read_queue_file(&path).into_iter().map(|e| e.data).collect();
    assert_eq!(on_disk, vec![record(5)]);
    assert_eq!(queue.len().await, 1);
}

#[tokio::test]
async fn test_stream_delivers_in_order_and_queues_failures() {
    let dir = tempfile::tempdir().unwrap();
    let sink = ScriptedSink::default();
    let queue = queue_at(sink.clone(), &dir.path().join("queue.json"));

    let stream = queue.stream();
    for n in 0..5 {
        stream.write(record(n)).await.unwrap();
    }
    stream.close().await;
    assert_eq!(sink.received(), (0..5).map(record).collect::<Vec<_>>());

    sink.set_offline(true);
    let stream = queue.stream();
    stream.write(record(9)).await.unwrap();
    stream.close().await;
    assert_eq!(queue.len().await, 1);
}

#[tokio::test]
async fn test_run_drains_once_more_on_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let sink = ScriptedSink::default();
    let queue = queue_at(sink.clone(), &dir.path().join("queue.json"));
    queue.queue_log(record(7)).await;

    let (tx, rx) = watch::channel(false);
    let runner = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move { queue.run(rx).await })
    };

    tx.send(true).unwrap();
    runner.await.unwrap();

    assert!(queue.is_empty().await);
    assert_eq!(sink.received(), vec![record(7)]);
}

// ========================================
// Relay
// ========================================

#[tokio::test]
async fn test_relay_forwards_filtered_records() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("relay.sock");
    let sink = ScriptedSink::default();
    let queue = queue_at(sink.clone(), &dir.path().join("queue.json"));

    // A stale file at the socket path is replaced.
    std::fs::write(&socket, b"stale").unwrap();
    let relay = Relay::bind(&socket, Arc::clone(&queue)).unwrap();
    let (tx, rx) = watch::channel(false);
    let server = tokio::spawn(relay.serve(rx));

    let mut access_log = LogRecord::new("info", json!("POST /logs"));
    access_log.request = Some(json!({ "url": "/logs?batch=1" }));
    access_log.response = Some(json!({ "statusCode": 200 }));

    let mut client = RelayClient::connect(&socket).await.unwrap();
    client.send(&record(1)).await.unwrap();
    client.send(&access_log).await.unwrap();
    client.send(&record(2)).await.unwrap();
    client.close().await.unwrap();

    wait_for(|| sink.received().len() == 2).await;
    assert_eq!(sink.received(), vec![record(1), record(2)]);

    tx.send(true).unwrap();
    server.await.unwrap().unwrap();
    assert!(!socket.exists());
}

#[tokio::test]
async fn test_relay_skips_malformed_lines() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("relay.sock");
    let sink = ScriptedSink::default();
    let queue = queue_at(sink.clone(), &dir.path().join("queue.json"));

    let relay = Relay::bind(&socket, queue).unwrap();
    let (tx, rx) = watch::channel(false);
    let server = tokio::spawn(relay.serve(rx));

    let mut stream = UnixStream::connect(&socket).await.unwrap();
    let good = serde_json::to_string(&record(3)).unwrap();
    stream
        .write_all(format!("not json\n\n{}\n{{\"level\":\n", good).as_bytes())
        .await
        .unwrap();
    stream.shutdown().await.unwrap();

    wait_for(|| !sink.received().is_empty()).await;
    assert_eq!(sink.received(), vec![record(3)]);

    tx.send(true).unwrap();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_relay_queues_when_offline() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("relay.sock");
    let queue = queue_at(ScriptedSink::offline(), &dir.path().join("queue.json"));

    let relay = Relay::bind(&socket, Arc::clone(&queue)).unwrap();
    let (tx, rx) = watch::channel(false);
    let server = tokio::spawn(relay.serve(rx));

    let mut client = RelayClient::connect(&socket).await.unwrap();
    client.send(&record(4)).await.unwrap();
    client.close().await.unwrap();

    for _ in 0..200 {
        if queue.len().await == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(queue.len().await, 1);

    tx.send(true).unwrap();
    server.await.unwrap().unwrap();
}
