//! Error types for LogSink.
//!
//! One tagged enum covers every failure kind. Each kind knows its HTTP status,
//! so the server can render it without a parallel mapping table.
//! Display strings stay generic: identity failures must not reveal which of
//! email, application or passcode was wrong.

use thiserror::Error;

/// Core error type for LogSink operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed input.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Presented secret is not a LogSink credential.
    #[error("invalid api key")]
    InvalidKey(String),

    /// Missing or wrong secret, or the application is not usable.
    #[error("authentication failed")]
    Auth(String),

    /// One-time passcode did not match a pending code.
    #[error("authentication failed")]
    InvalidOtp,

    /// Unknown application or user.
    #[error("not found")]
    NotFound(String),

    /// Re-authorizing an application that is still active.
    #[error("application is already authorized")]
    Conflict(String),

    /// Network failure talking to the ingestion endpoint.
    #[error("transport error")]
    Transport(String),

    /// Ciphertext could not be decrypted under the given application.
    /// Details are intentionally vague to prevent oracle attacks.
    #[error("decryption failed")]
    Decryption,

    /// Cryptographic primitive failure (key setup, RNG).
    #[error("cryptographic operation failed")]
    Crypto(String),

    /// Storage operation failed.
    #[error("storage error")]
    Storage(String),

    /// Encoding/decoding error.
    #[error("encoding error")]
    Encoding(String),

    /// Required configuration is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias using LogSink's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Stable machine-readable error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// See [`Error::Validation`].
    Validation,
    /// See [`Error::InvalidKey`].
    InvalidKey,
    /// See [`Error::Auth`].
    Auth,
    /// See [`Error::InvalidOtp`].
    InvalidOtp,
    /// See [`Error::NotFound`].
    NotFound,
    /// See [`Error::Conflict`].
    Conflict,
    /// See [`Error::Transport`].
    Transport,
    /// See [`Error::Decryption`].
    Decryption,
    /// Crypto, storage and encoding failures.
    Internal,
    /// See [`Error::Config`].
    Config,
}

impl ErrorKind {
    /// Short snake_case name, used in API responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::InvalidKey => "invalid_key",
            ErrorKind::Auth => "auth_error",
            ErrorKind::InvalidOtp => "invalid_otp",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Transport => "transport_error",
            ErrorKind::Decryption => "decryption_error",
            ErrorKind::Internal => "internal_error",
            ErrorKind::Config => "config_error",
        }
    }
}

impl Error {
    /// Validation failure.
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Authentication failure.
    pub fn auth(msg: impl Into<String>) -> Self {
        Error::Auth(msg.into())
    }

    /// Lookup failure.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Conflicting state.
    pub fn conflict(msg: impl Into<String>) -> Self {
        Error::Conflict(msg.into())
    }

    /// Storage failure.
    pub fn storage(msg: impl Into<String>) -> Self {
        Error::Storage(msg.into())
    }

    /// Error kind tag.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::InvalidKey(_) => ErrorKind::InvalidKey,
            Error::Auth(_) => ErrorKind::Auth,
            Error::InvalidOtp => ErrorKind::InvalidOtp,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Transport(_) => ErrorKind::Transport,
            Error::Decryption => ErrorKind::Decryption,
            Error::Crypto(_) | Error::Storage(_) | Error::Encoding(_) => ErrorKind::Internal,
            Error::Config(_) => ErrorKind::Config,
        }
    }

    /// HTTP status code for this error.
    pub fn http_status(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation | ErrorKind::InvalidKey => 400,
            ErrorKind::Auth | ErrorKind::InvalidOtp => 401,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Transport => 502,
            ErrorKind::Decryption | ErrorKind::Internal | ErrorKind::Config => 500,
        }
    }

    /// Whether the message is safe to show to an API caller.
    ///
    /// Internal failures are replaced with a generic message.
    pub fn is_client_error(&self) -> bool {
        self.http_status() < 500
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Encoding(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(Error::validation("x").http_status(), 400);
        assert_eq!(Error::InvalidKey("x".into()).http_status(), 400);
        assert_eq!(Error::auth("x").http_status(), 401);
        assert_eq!(Error::InvalidOtp.http_status(), 401);
        assert_eq!(Error::not_found("x").http_status(), 404);
        assert_eq!(Error::conflict("x").http_status(), 409);
        assert_eq!(Error::Decryption.http_status(), 500);
        assert_eq!(Error::storage("disk").http_status(), 500);
    }

    #[test]
    fn test_identity_errors_are_generic() {
        // Wrong OTP and wrong secret read the same to the caller.
        assert_eq!(Error::InvalidOtp.to_string(), Error::auth("bad secret").to_string());
        assert!(!Error::not_found("user alice@example.com").to_string().contains("alice"));
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(Error::conflict("x").kind().as_str(), "conflict");
        assert_eq!(Error::Encoding("x".into()).kind(), ErrorKind::Internal);
        assert!(!Error::Crypto("x".into()).is_client_error());
        assert!(Error::validation("x").is_client_error());
    }
}
