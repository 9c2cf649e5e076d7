//! Client configuration.

use crate::error::{Error, Result};
use crate::identity::{checksum_matches, has_secret_format};
use std::path::PathBuf;
use std::time::Duration;

/// Default ingestion endpoint.
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:4000";

/// Default durable queue file.
pub const DEFAULT_QUEUE_FILE: &str = "logsink-queue.json";

/// Default number of records per bulk request.
pub const DEFAULT_MAX_BULK_LOG: usize = 10;

/// Default interval between retry passes.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(30);

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings for a delivery client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Application name sent as `X-App-Name`.
    pub app_name: String,
    /// API secret sent as the bearer credential.
    pub api_secret: String,
    /// Base URL of the ingestion service.
    pub endpoint: String,
    /// Where undelivered records are persisted.
    pub queue_path: PathBuf,
    /// Records per bulk request during a retry pass.
    pub max_bulk_log: usize,
    /// Interval between retry passes.
    pub retry_interval: Duration,
    /// Timeout applied to every ingestion request.
    pub request_timeout: Duration,
}

impl ClientConfig {
    /// Create a config with defaults. Both credentials are required.
    pub fn new(app_name: impl Into<String>, api_secret: impl Into<String>) -> Result<Self> {
        let app_name = app_name.into();
        let api_secret = api_secret.into();
        if app_name.trim().is_empty() {
            return Err(Error::Config("app name is required".into()));
        }
        if api_secret.trim().is_empty() {
            return Err(Error::Config("api secret is required".into()));
        }
        if has_secret_format(&api_secret) && !checksum_matches(&api_secret, &app_name) {
            return Err(Error::Config(format!(
                "api secret was not issued for app '{}'",
                app_name
            )));
        }

        Ok(Self {
            app_name,
            api_secret,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            queue_path: PathBuf::from(DEFAULT_QUEUE_FILE),
            max_bulk_log: DEFAULT_MAX_BULK_LOG,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    /// Build from `LOGSINK_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::new(
            lookup("LOGSINK_APP_NAME").unwrap_or_default(),
            lookup("LOGSINK_API_SECRET").unwrap_or_default(),
        )?;

        if let Some(endpoint) = lookup("LOGSINK_ENDPOINT") {
            config = config.with_endpoint(endpoint);
        }
        if let Some(path) = lookup("LOGSINK_QUEUE_FILE") {
            config = config.with_queue_path(path);
        }
        if let Some(max_bulk) = lookup("LOGSINK_MAX_BULK") {
            let max_bulk = max_bulk
                .parse()
                .map_err(|_| Error::Config(format!("LOGSINK_MAX_BULK is not a number: {}", max_bulk)))?;
            config = config.with_max_bulk_log(max_bulk)?;
        }
        Ok(config)
    }

    /// Set the ingestion base URL. A trailing slash is dropped.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the durable queue file.
    pub fn with_queue_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.queue_path = path.into();
        self
    }

    /// Set the retry batch size. Must be at least 1.
    pub fn with_max_bulk_log(mut self, max_bulk_log: usize) -> Result<Self> {
        if max_bulk_log == 0 {
            return Err(Error::Config("max bulk size must be at least 1".into()));
        }
        self.max_bulk_log = max_bulk_log;
        Ok(self)
    }

    /// Set the retry interval.
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Set the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}
