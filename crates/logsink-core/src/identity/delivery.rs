//! Out-of-band delivery of one-time codes.
//!
//! How a code reaches its owner (email, console, chat) is not the identity
//! service's concern; it only calls [`CodeDelivery::deliver`]. Channels are
//! picked by name from a static registry at startup.

use crate::error::{Error, Result};
use crate::logging::RedactedEmail;
use std::sync::{Arc, Mutex};
use tracing::info;

/// A channel that can hand a code to its destination.
pub trait CodeDelivery: Send + Sync {
    /// Deliver `code` to `destination` (an email address).
    fn deliver(&self, code: &str, destination: &str) -> Result<()>;
}

/// Writes codes to the service log. For development setups: the code itself is
/// the message, so this channel must not be used where logs are shared.
#[derive(Debug, Default)]
pub struct LogDelivery;

impl CodeDelivery for LogDelivery {
    fn deliver(&self, code: &str, destination: &str) -> Result<()> {
        info!(to = %RedactedEmail(destination), code = %code, "One-time code issued");
        Ok(())
    }
}

/// Keeps delivered codes in memory so tests and tools can read them back.
#[derive(Debug, Default)]
pub struct MemoryDelivery {
    sent: Mutex<Vec<(String, String)>>,
}

impl MemoryDelivery {
    /// Create an empty outbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent code sent to `destination`.
    pub fn last_code_for(&self, destination: &str) -> Option<String> {
        let sent = self.sent.lock().ok()?;
        sent.iter()
            .rev()
            .find(|(_, to)| to == destination)
            .map(|(code, _)| code.clone())
    }

    /// Number of codes delivered so far.
    pub fn count(&self) -> usize {
        self.sent.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl CodeDelivery for MemoryDelivery {
    fn deliver(&self, code: &str, destination: &str) -> Result<()> {
        let mut sent = self
            .sent
            .lock()
            .map_err(|_| Error::Storage("lock poisoned".into()))?;
        sent.push((code.to_string(), destination.to_string()));
        Ok(())
    }
}

type Constructor = fn() -> Arc<dyn CodeDelivery>;

fn log_channel() -> Arc<dyn CodeDelivery> {
    Arc::new(LogDelivery)
}

/// Name → constructor table of known delivery channels.
///
/// [`MemoryDelivery`] is not listed: its codes are only readable through the
/// instance, so callers inject it directly.
pub struct CodeDeliveryRegistry;

impl CodeDeliveryRegistry {
    const CHANNELS: &'static [(&'static str, Constructor)] = &[("log", log_channel)];

    /// Registered channel names.
    pub fn names() -> Vec<&'static str> {
        Self::CHANNELS.iter().map(|(name, _)| *name).collect()
    }

    /// Build the channel registered under `name`.
    pub fn resolve(name: &str) -> Result<Arc<dyn CodeDelivery>> {
        Self::CHANNELS
            .iter()
            .find(|(registered, _)| *registered == name)
            .map(|(_, build)| build())
            .ok_or_else(|| {
                Error::Config(format!(
                    "unknown code delivery channel '{}' (known: {})",
                    name,
                    Self::names().join(", ")
                ))
            })
    }
}
