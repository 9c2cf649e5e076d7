//! Transport from client to ingestion service.

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::record::LogRecord;
use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

/// Header naming the target application.
pub const APP_NAME_HEADER: &str = "X-App-Name";

/// Something that can accept log records.
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Deliver one record.
    async fn send_log(&self, record: &LogRecord) -> Result<()>;

    /// Deliver a batch of records in one request.
    async fn send_logs(&self, records: &[LogRecord]) -> Result<()>;
}

#[derive(Serialize)]
struct SingleBody<'a> {
    log: &'a LogRecord,
}

#[derive(Serialize)]
struct BulkBody<'a> {
    logs: &'a [LogRecord],
}

/// Posts records to the ingestion HTTP API.
#[derive(Debug, Clone)]
pub struct HttpSink {
    client: reqwest::Client,
    endpoint: String,
    app_name: String,
    api_secret: String,
}

impl HttpSink {
    /// Build a sink from client settings. Every request carries the configured timeout.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Config(format!("http client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            app_name: config.app_name.clone(),
            api_secret: config.api_secret.clone(),
        })
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<()> {
        let url = format!("{}{}", self.endpoint, path);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_secret)
            .header(APP_NAME_HEADER, &self.app_name)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            debug!(%url, %status, "Ingestion request rejected");
            return Err(Error::Transport(format!("{} returned {}", path, status)));
        }
        Ok(())
    }
}

#[async_trait]
impl LogSink for HttpSink {
    async fn send_log(&self, record: &LogRecord) -> Result<()> {
        self.post("/logs", &SingleBody { log: record }).await
    }

    async fn send_logs(&self, records: &[LogRecord]) -> Result<()> {
        self.post("/logs/bulk", &BulkBody { logs: records }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_body_shapes() {
        let record = LogRecord::new("info", json!({"msg": "hi"}));
        let single = serde_json::to_value(SingleBody { log: &record }).unwrap();
        assert_eq!(single["log"]["level"], "info");

        let records = vec![record.clone(), record];
        let bulk = serde_json::to_value(BulkBody { logs: &records }).unwrap();
        assert_eq!(bulk["logs"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        let config = ClientConfig::new("billing", "secret")
            .unwrap()
            .with_endpoint("http://127.0.0.1:1")
            .with_request_timeout(Duration::from_secs(2));
        let sink = HttpSink::new(&config).unwrap();

        let result = sink.send_log(&LogRecord::new("info", json!("x"))).await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }
}
