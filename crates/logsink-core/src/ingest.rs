//! Server-side ingestion: validate, encrypt and store records, and read them back.

use crate::crypto::{decrypt_object, encrypt_object};
use crate::error::{Error, Result};
use crate::identity::{system_time_ms, AppContext};
use crate::record::{LogRecord, StoredLog};
use crate::storage::Database;
use chrono::{SecondsFormat, TimeZone, Utc};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Largest accepted bulk request.
pub const MAX_BULK_RECORDS: usize = 1000;

/// Page size when the caller gives none.
pub const DEFAULT_PAGE_LIMIT: usize = 50;

/// Largest page a caller may request.
pub const MAX_PAGE_LIMIT: usize = 500;

/// One page of decrypted logs.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogPage {
    /// Logs, newest first.
    pub logs: Vec<StoredLog>,
    /// Cursor for the next (older) page, if there is one.
    pub next_cursor: Option<i64>,
}

/// Reject records without a level or payload.
pub fn validate_record(record: &LogRecord) -> Result<()> {
    if record.level.trim().is_empty() {
        return Err(Error::validation("log level is required"));
    }
    if record.data.is_null() {
        return Err(Error::validation("log data is required"));
    }
    Ok(())
}

fn rfc3339(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(Utc::now)
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Validate, tag, encrypt and store records for an authenticated application.
///
/// Every record is checked before any is stored. Returns the new row ids.
pub fn ingest_logs(
    db: &Database,
    ctx: &AppContext,
    records: Vec<LogRecord>,
    ttl: Option<Duration>,
) -> Result<Vec<i64>> {
    if records.is_empty() {
        return Err(Error::validation("no logs supplied"));
    }
    if records.len() > MAX_BULK_RECORDS {
        return Err(Error::validation(format!(
            "at most {} logs per request",
            MAX_BULK_RECORDS
        )));
    }
    for record in &records {
        validate_record(record)?;
    }

    let now = system_time_ms();
    let received = rfc3339(now);
    let sealed = records
        .into_iter()
        .map(|mut record| {
            record.data = Value::String(encrypt_object(&record.data, &ctx.app_name)?);
            record.app_name = Some(ctx.app_name.clone());
            record.key = Some(ctx.masked_key.clone());
            if record.time.is_none() {
                record.time = Some(received.clone());
            }
            Ok(record)
        })
        .collect::<Result<Vec<_>>>()?;

    let expires_at = ttl.map(|ttl| now.saturating_add(ttl.as_millis() as i64));
    let ids = db.insert_logs(&sealed, now, expires_at)?;
    debug!(app = %ctx.app_name, count = ids.len(), "Stored logs");
    Ok(ids)
}

/// Read a page of an application's logs, newest first, with payloads decrypted.
pub fn read_logs(
    db: &Database,
    app_name: &str,
    cursor: Option<i64>,
    limit: Option<usize>,
) -> Result<LogPage> {
    let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT);
    let mut logs = db.list_logs(app_name, cursor, limit + 1)?;

    let next_cursor = if logs.len() > limit {
        logs.truncate(limit);
        logs.last().map(|log| log.id)
    } else {
        None
    };

    for log in &mut logs {
        if let Value::String(ciphertext) = &log.record.data {
            log.record.data = decrypt_object(ciphertext, app_name)?;
        }
    }

    Ok(LogPage { logs, next_cursor })
}
