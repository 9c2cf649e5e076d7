//! The log record shared by producers, the delivery queue and the server.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single log record.
///
/// `data` is a JSON value while in flight and the base64 ciphertext string
/// once persisted. Serialized in camelCase to match the HTTP API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    /// Severity (`info`, `warn`, `error`, ...).
    pub level: String,
    /// Logger or event name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Event time as emitted by the producer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    /// Payload.
    #[serde(default)]
    pub data: Value,
    /// Free-form producer context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    /// Distributed trace id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    /// HTTP request details, present on access logs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<Value>,
    /// HTTP response details, present on access logs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    /// Milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_taken: Option<f64>,
    /// Masked API key the record was ingested with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Owning application, stamped by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
}

impl LogRecord {
    /// A record with only level and data set.
    pub fn new(level: impl Into<String>, data: Value) -> Self {
        Self {
            level: level.into(),
            name: None,
            time: None,
            data,
            context: None,
            trace_id: None,
            request: None,
            response: None,
            time_taken: None,
            key: None,
            app_name: None,
        }
    }

    /// Set the logger name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Whether the level denotes a failure.
    pub fn is_error_level(&self) -> bool {
        matches!(
            self.level.to_ascii_lowercase().as_str(),
            "error" | "fatal" | "critical"
        )
    }
}

/// A persisted record and its row id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredLog {
    /// Row id, doubles as the pagination cursor.
    pub id: i64,
    /// The stored record.
    #[serde(flatten)]
    pub record: LogRecord,
}
