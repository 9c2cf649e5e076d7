//! SQLite-backed persistence for accounts, applications, passcodes and logs.

use super::schema::{CREATE_SCHEMA, SCHEMA_VERSION};
use crate::error::{Error, Result};
use crate::record::{LogRecord, StoredLog};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Path to the database file.
    pub path: String,
    /// Whether to use in-memory database (for testing).
    pub in_memory: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: super::DEFAULT_DB_NAME.to_string(),
            in_memory: false,
        }
    }
}

/// A user account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAccount {
    /// Row id.
    pub id: i64,
    /// Unique email address.
    pub email: String,
    /// Hash of the most recently issued login token.
    pub login_token_hash: Option<String>,
}

/// Application status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AppStatus {
    /// Credentials may be used until expiry.
    Active,
    /// Revoked.
    Disabled,
}

impl AppStatus {
    /// Lowercase name, as stored.
    pub fn as_str(&self) -> &'static str {
        match self {
            AppStatus::Active => "active",
            AppStatus::Disabled => "disabled",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "active" => AppStatus::Active,
            _ => AppStatus::Disabled,
        }
    }
}

/// A credential record binding hashed secrets to one (user, app name) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationIdentity {
    /// Row id.
    pub id: i64,
    /// Application name, unique per owner.
    pub app_name: String,
    /// Hash of the current API secret.
    pub secret_hash: String,
    /// Hash of the current token.
    pub token_hash: String,
    /// Current status.
    pub status: AppStatus,
    /// Expiry, epoch milliseconds.
    pub expires: i64,
    /// Owning user id.
    pub owner_user_id: i64,
}

impl ApplicationIdentity {
    /// Usable iff active and not yet expired.
    pub fn is_usable(&self, now_ms: i64) -> bool {
        self.status == AppStatus::Active && now_ms < self.expires
    }
}

/// Passcode status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpStatus {
    /// Issued, not yet used.
    Pending,
    /// Used once; cannot be replayed.
    Consumed,
}

/// A stored one-time passcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OneTimePasscode {
    /// Row id.
    pub id: i64,
    /// Hash of the passcode.
    pub otp_hash: String,
    /// Owning user id.
    pub user_id: i64,
    /// Application the code was requested for, if any.
    pub app_name: Option<String>,
    /// Current status.
    pub status: OtpStatus,
    /// Expiry, epoch milliseconds.
    pub expires_at: i64,
}

/// Database handle.
pub struct Database {
    conn: Connection,
}

const APP_COLUMNS: &str =
    "id, app_name, secret_hash, token_hash, status, expires, user_id";

const LOG_COLUMNS: &str =
    "id, app_name, level, name, time, data, context, trace_id, request, response, time_taken, key";

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<UserAccount> {
    Ok(UserAccount {
        id: row.get(0)?,
        email: row.get(1)?,
        login_token_hash: row.get(2)?,
    })
}

fn row_to_app(row: &Row<'_>) -> rusqlite::Result<ApplicationIdentity> {
    let status: String = row.get(4)?;
    Ok(ApplicationIdentity {
        id: row.get(0)?,
        app_name: row.get(1)?,
        secret_hash: row.get(2)?,
        token_hash: row.get(3)?,
        status: AppStatus::parse(&status),
        expires: row.get(5)?,
        owner_user_id: row.get(6)?,
    })
}

fn json_column(value: Option<String>) -> Option<Value> {
    value.and_then(|s| serde_json::from_str(&s).ok())
}

fn row_to_log(row: &Row<'_>) -> rusqlite::Result<StoredLog> {
    let data: String = row.get(5)?;
    Ok(StoredLog {
        id: row.get(0)?,
        record: LogRecord {
            app_name: row.get(1)?,
            level: row.get(2)?,
            name: row.get(3)?,
            time: row.get(4)?,
            data: serde_json::from_str(&data).unwrap_or(Value::String(data)),
            context: json_column(row.get(6)?),
            trace_id: row.get(7)?,
            request: json_column(row.get(8)?),
            response: json_column(row.get(9)?),
            time_taken: row.get(10)?,
            key: row.get(11)?,
        },
    })
}

fn to_json_column(value: &Option<Value>) -> Result<Option<String>> {
    value
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(Error::from)
}

impl Database {
    /// Open or create a database.
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        let conn = if config.in_memory {
            Connection::open_in_memory()
        } else {
            if let Some(parent) = Path::new(&config.path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| Error::Storage(format!("failed to create directory: {}", e)))?;
                }
            }

            Connection::open_with_flags(
                &config.path,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
        }
        .map_err(|e| Error::Storage(format!("failed to open database: {}", e)))?;

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;
            PRAGMA secure_delete = ON;
            PRAGMA temp_store = MEMORY;
            "#,
        )
        .map_err(|e| Error::Storage(format!("failed to set pragmas: {}", e)))?;

        let db = Self { conn };
        db.init_schema()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        Self::open(&DatabaseConfig {
            path: String::new(),
            in_memory: true,
        })
    }

    fn init_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(&CREATE_SCHEMA.replace('?', &SCHEMA_VERSION.to_string()))
            .map_err(|e| Error::Storage(format!("failed to create schema: {}", e)))?;
        Ok(())
    }

    // ---- users ----

    /// Create a user account.
    pub fn create_user(&self, email: &str, login_token_hash: &str, now_ms: i64) -> Result<UserAccount> {
        self.conn.execute(
            "INSERT INTO users (email, login_token_hash, created_at, updated_at) VALUES (?, ?, ?, ?)",
            params![email, login_token_hash, now_ms, now_ms],
        )?;
        Ok(UserAccount {
            id: self.conn.last_insert_rowid(),
            email: email.to_string(),
            login_token_hash: Some(login_token_hash.to_string()),
        })
    }

    /// Find a user by email.
    pub fn find_user_by_email(&self, email: &str) -> Result<Option<UserAccount>> {
        let user = self
            .conn
            .query_row(
                "SELECT id, email, login_token_hash FROM users WHERE email = ?",
                params![email],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    /// Find a user by the hash of their current login token.
    pub fn find_user_by_login_token_hash(&self, token_hash: &str) -> Result<Option<UserAccount>> {
        let user = self
            .conn
            .query_row(
                "SELECT id, email, login_token_hash FROM users WHERE login_token_hash = ?",
                params![token_hash],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    /// Replace a user's login token hash.
    pub fn set_login_token_hash(&self, user_id: i64, token_hash: &str, now_ms: i64) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE users SET login_token_hash = ?, updated_at = ? WHERE id = ?",
            params![token_hash, now_ms, user_id],
        )?;
        if changed == 0 {
            return Err(Error::not_found("user"));
        }
        Ok(())
    }

    // ---- applications ----

    /// Create an application identity.
    pub fn insert_app(
        &self,
        user_id: i64,
        app_name: &str,
        secret_hash: &str,
        token_hash: &str,
        expires: i64,
        now_ms: i64,
    ) -> Result<ApplicationIdentity> {
        self.conn.execute(
            r#"INSERT INTO applications
               (user_id, app_name, secret_hash, token_hash, status, expires, created_at, updated_at)
               VALUES (?, ?, ?, ?, 'active', ?, ?, ?)"#,
            params![user_id, app_name, secret_hash, token_hash, expires, now_ms, now_ms],
        )?;
        Ok(ApplicationIdentity {
            id: self.conn.last_insert_rowid(),
            app_name: app_name.to_string(),
            secret_hash: secret_hash.to_string(),
            token_hash: token_hash.to_string(),
            status: AppStatus::Active,
            expires,
            owner_user_id: user_id,
        })
    }

    /// Find a user's application by name.
    pub fn find_app(&self, user_id: i64, app_name: &str) -> Result<Option<ApplicationIdentity>> {
        let app = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM applications WHERE user_id = ? AND app_name = ?",
                    APP_COLUMNS
                ),
                params![user_id, app_name],
                row_to_app,
            )
            .optional()?;
        Ok(app)
    }

    /// All applications with this name, across owners.
    pub fn find_apps_by_name(&self, app_name: &str) -> Result<Vec<ApplicationIdentity>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM applications WHERE app_name = ? ORDER BY id",
            APP_COLUMNS
        ))?;
        let apps = stmt
            .query_map(params![app_name], row_to_app)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(apps)
    }

    /// All applications owned by a user.
    pub fn list_user_apps(&self, user_id: i64) -> Result<Vec<ApplicationIdentity>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM applications WHERE user_id = ? ORDER BY app_name",
            APP_COLUMNS
        ))?;
        let apps = stmt
            .query_map(params![user_id], row_to_app)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(apps)
    }

    /// Rotate an application's credentials and re-activate it.
    pub fn rotate_app_credentials(
        &self,
        app_id: i64,
        secret_hash: &str,
        token_hash: &str,
        expires: i64,
        now_ms: i64,
    ) -> Result<()> {
        let changed = self.conn.execute(
            r#"UPDATE applications
               SET secret_hash = ?, token_hash = ?, expires = ?, status = 'active', updated_at = ?
               WHERE id = ?"#,
            params![secret_hash, token_hash, expires, now_ms, app_id],
        )?;
        if changed == 0 {
            return Err(Error::not_found("application"));
        }
        Ok(())
    }

    /// Set an application's status.
    pub fn set_app_status(&self, app_id: i64, status: AppStatus, now_ms: i64) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE applications SET status = ?, updated_at = ? WHERE id = ?",
            params![status.as_str(), now_ms, app_id],
        )?;
        if changed == 0 {
            return Err(Error::not_found("application"));
        }
        Ok(())
    }

    // ---- one-time passcodes ----

    /// Store a passcode hash.
    pub fn insert_otp(
        &self,
        user_id: i64,
        otp_hash: &str,
        app_name: Option<&str>,
        expires_at: i64,
        now_ms: i64,
    ) -> Result<i64> {
        self.conn.execute(
            r#"INSERT INTO otps (user_id, otp_hash, app_name, status, created_at, expires_at)
               VALUES (?, ?, ?, 'pending', ?, ?)"#,
            params![user_id, otp_hash, app_name, now_ms, expires_at],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Remove a passcode that was never delivered.
    pub fn delete_otp(&self, id: i64) -> Result<()> {
        self.conn.execute("DELETE FROM otps WHERE id = ?", params![id])?;
        Ok(())
    }

    /// Atomically consume a matching pending passcode.
    ///
    /// A code bound to an application only matches that application.
    /// Returns `false` when no pending, unexpired code matches.
    pub fn consume_otp(
        &self,
        user_id: i64,
        otp_hash: &str,
        app_name: Option<&str>,
        now_ms: i64,
    ) -> Result<bool> {
        let changed = self.conn.execute(
            r#"UPDATE otps SET status = 'consumed'
               WHERE id = (
                   SELECT id FROM otps
                   WHERE user_id = ? AND otp_hash = ? AND status = 'pending' AND expires_at > ?
                     AND (app_name IS NULL OR app_name = ?)
                   ORDER BY id DESC LIMIT 1
               )"#,
            params![user_id, otp_hash, now_ms, app_name],
        )?;
        Ok(changed == 1)
    }

    /// Passcodes issued to a user, newest first.
    pub fn list_otps(&self, user_id: i64) -> Result<Vec<OneTimePasscode>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT id, otp_hash, user_id, app_name, status, expires_at
               FROM otps WHERE user_id = ? ORDER BY id DESC"#,
        )?;
        let otps = stmt
            .query_map(params![user_id], |row| {
                let status: String = row.get(4)?;
                Ok(OneTimePasscode {
                    id: row.get(0)?,
                    otp_hash: row.get(1)?,
                    user_id: row.get(2)?,
                    app_name: row.get(3)?,
                    status: if status == "pending" {
                        OtpStatus::Pending
                    } else {
                        OtpStatus::Consumed
                    },
                    expires_at: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(otps)
    }

    // ---- logs ----

    /// Persist records in one transaction. Returns the new row ids.
    pub fn insert_logs(
        &self,
        records: &[LogRecord],
        received_at: i64,
        expires_at: Option<i64>,
    ) -> Result<Vec<i64>> {
        let tx = self.conn.unchecked_transaction()?;
        let mut ids = Vec::with_capacity(records.len());
        {
            let mut stmt = tx.prepare(
                r#"INSERT INTO logs
                   (app_name, level, name, time, data, context, trace_id, request, response,
                    time_taken, key, received_at, expires_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            )?;
            for record in records {
                let app_name = record
                    .app_name
                    .as_deref()
                    .ok_or_else(|| Error::validation("record has no application"))?;
                stmt.execute(params![
                    app_name,
                    record.level,
                    record.name,
                    record.time,
                    serde_json::to_string(&record.data)?,
                    to_json_column(&record.context)?,
                    record.trace_id,
                    to_json_column(&record.request)?,
                    to_json_column(&record.response)?,
                    record.time_taken,
                    record.key,
                    received_at,
                    expires_at,
                ])?;
                ids.push(tx.last_insert_rowid());
            }
        }
        tx.commit()?;
        Ok(ids)
    }

    /// Fetch one stored log.
    pub fn get_log(&self, id: i64) -> Result<Option<StoredLog>> {
        let log = self
            .conn
            .query_row(
                &format!("SELECT {} FROM logs WHERE id = ?", LOG_COLUMNS),
                params![id],
                row_to_log,
            )
            .optional()?;
        Ok(log)
    }

    /// A page of an application's logs, newest first, strictly older than `before`.
    pub fn list_logs(&self, app_name: &str, before: Option<i64>, limit: usize) -> Result<Vec<StoredLog>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM logs WHERE app_name = ? AND id < ? ORDER BY id DESC LIMIT ?",
            LOG_COLUMNS
        ))?;
        let logs = stmt
            .query_map(
                params![app_name, before.unwrap_or(i64::MAX), limit as i64],
                row_to_log,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(logs)
    }

    /// Number of stored logs for an application.
    pub fn count_logs(&self, app_name: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM logs WHERE app_name = ?",
            params![app_name],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Delete logs whose TTL has passed.
    pub fn purge_expired_logs(&self, now_ms: i64) -> Result<usize> {
        let count = self.conn.execute(
            "DELETE FROM logs WHERE expires_at IS NOT NULL AND expires_at <= ?",
            params![now_ms],
        )?;
        Ok(count)
    }
}
