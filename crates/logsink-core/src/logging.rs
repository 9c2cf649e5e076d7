//! Logging helpers that keep credentials out of log output.
//!
//! Secrets, tokens and email addresses pass through these wrappers before they
//! reach a `tracing` field.

use crate::identity::mask_key;
use std::fmt;

/// Display an API secret or token in its masked form.
pub struct RedactedKey<'a>(pub &'a str);

impl<'a> fmt::Display for RedactedKey<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&mask_key(self.0))
    }
}

impl<'a> fmt::Debug for RedactedKey<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Redact an email address, keeping the first character and the domain.
pub struct RedactedEmail<'a>(pub &'a str);

impl<'a> fmt::Display for RedactedEmail<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.split_once('@') {
            Some((local, domain)) if !local.is_empty() => {
                let first = local.chars().next().unwrap_or('*');
                write!(f, "{}***@{}", first, domain)
            }
            _ => write!(f, "[REDACTED EMAIL]"),
        }
    }
}

impl<'a> fmt::Debug for RedactedEmail<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Patterns that should be redacted from logs.
const SENSITIVE_PATTERNS: &[&str] = &[
    "password",
    "secret",
    "token",
    "otp",
    "authorization",
    "credential",
    "lgsk_",
    "lgtk_",
];

/// Check if a string appears to contain sensitive data.
pub fn appears_sensitive(s: &str) -> bool {
    let lower = s.to_lowercase();
    SENSITIVE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Sanitize a string for logging, redacting sensitive patterns.
pub fn sanitize_for_log(s: &str) -> String {
    if appears_sensitive(s) {
        "[REDACTED]".to_string()
    } else {
        s.to_string()
    }
}
