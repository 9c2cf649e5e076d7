//! # LogSink Core Library
//!
//! Building blocks of a self-hosted log ingestion service: a resilient
//! client delivery queue with a local relay socket, passwordless identity
//! and API-key lifecycle, and per-application encryption of stored payloads.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐   NDJSON    ┌──────────────────────────┐
//! │   producer    │ ──────────▶ │  delivery::Relay         │
//! └───────────────┘   (unix)    │  delivery::DeliveryQueue │
//!                               └────────────┬─────────────┘
//!                                            │ HTTPS (HttpSink)
//!                               ┌────────────▼─────────────┐
//!                               │  identity  │   ingest    │
//!                               ├────────────┴─────────────┤
//!                               │  crypto    │   storage   │
//!                               └──────────────────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - A record leaves the client queue only after the service accepted it
//! - Identical records are queued at most once
//! - Only hashes of secrets, tokens and passcodes are stored
//! - Stored payloads decrypt only under the application that wrote them

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

pub mod config;
pub mod crypto;
pub mod delivery;
pub mod error;
pub mod identity;
pub mod ingest;
pub mod logging;
pub mod record;
pub mod storage;

pub use config::ClientConfig;
pub use error::{Error, Result};
pub use record::{LogRecord, StoredLog};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
