//! Database schema definitions.

/// Schema version for migrations.
pub const SCHEMA_VERSION: u32 = 1;

/// SQL to create the database schema.
pub const CREATE_SCHEMA: &str = r#"
-- User accounts (created lazily on first login)
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    email TEXT NOT NULL UNIQUE,
    login_token_hash TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_users_login_token ON users(login_token_hash);

-- Application identities (one per user + app name)
CREATE TABLE IF NOT EXISTS applications (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    app_name TEXT NOT NULL,
    secret_hash TEXT NOT NULL,
    token_hash TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    expires INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE(user_id, app_name)
);

CREATE INDEX IF NOT EXISTS idx_applications_name ON applications(app_name);

-- One-time passcodes
CREATE TABLE IF NOT EXISTS otps (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    otp_hash TEXT NOT NULL,
    app_name TEXT,
    status TEXT NOT NULL DEFAULT 'pending',
    created_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_otps_user ON otps(user_id, status);

-- Ingested log records (data column holds ciphertext)
CREATE TABLE IF NOT EXISTS logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    app_name TEXT NOT NULL,
    level TEXT NOT NULL,
    name TEXT,
    time TEXT,
    data TEXT NOT NULL,
    context TEXT,
    trace_id TEXT,
    request TEXT,
    response TEXT,
    time_taken REAL,
    key TEXT,
    received_at INTEGER NOT NULL,
    expires_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_logs_app ON logs(app_name, id);
CREATE INDEX IF NOT EXISTS idx_logs_expires ON logs(expires_at);

-- Settings table
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Schema version
INSERT OR REPLACE INTO settings (key, value) VALUES ('schema_version', ?);
"#;
