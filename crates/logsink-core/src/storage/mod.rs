//! Server-side persistence for LogSink.
//!
//! A single SQLite database holds user accounts, application identities,
//! one-time passcodes and ingested logs. Only hashes of credentials are
//! stored, and log payloads are stored as ciphertext.

mod database;
mod schema;

pub use database::{
    AppStatus, ApplicationIdentity, Database, DatabaseConfig, OneTimePasscode, OtpStatus,
    UserAccount,
};

/// Default database filename.
pub const DEFAULT_DB_NAME: &str = "logsink.db";
