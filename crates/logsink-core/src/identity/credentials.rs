//! Credential formats: API secrets, tokens, passcodes and login tokens.
//!
//! Issued secrets look like `lgsk_<payload><checksum>_LGS`:
//!
//! - `payload`: 24 random bytes, base64url without padding (32 chars)
//! - `checksum`: first 14 hex chars of the app name's checksum hash
//!
//! The checksum ties a credential to the application it was issued for.
//! Verification does not recompute it; the server rehashes the whole
//! presented secret and compares against the stored hash.

use crate::crypto::{hash, random_bytes, HashPurpose};
use crate::error::{Error, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::Rng;

/// Prefix of application API secrets.
pub const SECRET_PREFIX: &str = "lgsk";

/// Prefix of application tokens.
pub const TOKEN_PREFIX: &str = "lgtk";

/// Trailing tag shared by all issued credentials.
pub const CREDENTIAL_TAG: &str = "LGS";

/// Redaction used by [`mask_key`].
pub const MASK: &str = "XXXXXXXXXXXXX";

/// Random payload size in bytes.
const PAYLOAD_BYTES: usize = 24;

/// Hex characters of checksum embedded in a credential.
const CHECKSUM_LEN: usize = 14;

/// Length of the middle segment (base64url payload + checksum).
pub const CREDENTIAL_BODY_LEN: usize = 32 + CHECKSUM_LEN;

/// Longest passcode `generate_otp` will produce.
pub const MAX_OTP_LENGTH: usize = 16;

fn checksum(app_name: &str) -> String {
    let mut digest = hash(app_name, HashPurpose::Checksum);
    digest.truncate(CHECKSUM_LEN);
    digest
}

fn issue(prefix: &str, app_name: &str) -> String {
    let payload = URL_SAFE_NO_PAD.encode(random_bytes::<PAYLOAD_BYTES>());
    format!("{}_{}{}_{}", prefix, payload, checksum(app_name), CREDENTIAL_TAG)
}

/// Issue a new API secret for an application.
pub fn create_secret_key(app_name: &str) -> String {
    issue(SECRET_PREFIX, app_name)
}

/// Issue a new application token.
pub fn create_token(app_name: &str) -> String {
    issue(TOKEN_PREFIX, app_name)
}

fn credential_body<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    let body = value
        .strip_prefix(prefix)?
        .strip_prefix('_')?
        .strip_suffix(CREDENTIAL_TAG)?
        .strip_suffix('_')?;
    let well_formed = body.len() == CREDENTIAL_BODY_LEN
        && body
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    well_formed.then_some(body)
}

/// Whether a value is shaped like an API secret.
pub fn has_secret_format(value: &str) -> bool {
    credential_body(value, SECRET_PREFIX).is_some()
}

/// Whether a value is shaped like an application token.
pub fn has_token_format(value: &str) -> bool {
    credential_body(value, TOKEN_PREFIX).is_some()
}

/// Whether a secret or token carries the checksum for `app_name`.
pub fn checksum_matches(credential: &str, app_name: &str) -> bool {
    credential_body(credential, SECRET_PREFIX)
        .or_else(|| credential_body(credential, TOKEN_PREFIX))
        .map(|body| body.ends_with(&checksum(app_name)))
        .unwrap_or(false)
}

/// Mask a key for display: keep the prefix and tag, redact the middle.
pub fn mask_key(key: &str) -> String {
    match (key.find('_'), key.rfind('_')) {
        (Some(first), Some(last)) if first < last => {
            format!("{}_{}_{}", &key[..first], MASK, &key[last + 1..])
        }
        _ => MASK.to_string(),
    }
}

/// Generate a random decimal passcode of exactly `length` digits.
pub fn generate_otp(length: usize) -> Result<String> {
    if length == 0 || length > MAX_OTP_LENGTH {
        return Err(Error::validation(format!(
            "otp length must be between 1 and {}",
            MAX_OTP_LENGTH
        )));
    }
    let mut rng = rand::rngs::OsRng;
    Ok((0..length)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect())
}

/// Generate a login token.
pub fn generate_login_token() -> String {
    URL_SAFE_NO_PAD.encode(random_bytes::<32>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_format() {
        let secret = create_secret_key("billing");
        assert!(secret.starts_with("lgsk_"));
        assert!(secret.ends_with("_LGS"));
        assert_eq!(secret.len(), "lgsk_".len() + CREDENTIAL_BODY_LEN + "_LGS".len());
        assert!(has_secret_format(&secret));
        assert!(!has_token_format(&secret));
    }

    #[test]
    fn test_token_format() {
        let token = create_token("billing");
        assert!(has_token_format(&token));
        assert!(!has_secret_format(&token));
    }

    #[test]
    fn test_credentials_are_random() {
        assert_ne!(create_secret_key("app"), create_secret_key("app"));
    }

    #[test]
    fn test_checksum_binds_app() {
        let secret = create_secret_key("billing");
        assert!(checksum_matches(&secret, "billing"));
        assert!(!checksum_matches(&secret, "checkout"));
        assert!(checksum_matches(&create_token("billing"), "billing"));
        assert!(!checksum_matches("garbage", "billing"));
    }

    #[test]
    fn test_rejects_malformed_secrets() {
        assert!(!has_secret_format(""));
        assert!(!has_secret_format("lgsk__LGS"));
        assert!(!has_secret_format("sk_abcdef_LGS"));
        assert!(!has_secret_format(&format!("lgsk_{}_ZEE", "a".repeat(CREDENTIAL_BODY_LEN))));
        assert!(!has_secret_format(&format!("lgsk_{}_LGS", "a".repeat(CREDENTIAL_BODY_LEN - 1))));
        assert!(!has_secret_format(&format!("lgsk_{}_LGS", "!".repeat(CREDENTIAL_BODY_LEN))));
        assert!(has_secret_format(&format!("lgsk_{}_LGS", "a".repeat(CREDENTIAL_BODY_LEN))));
    }

    #[test]
    fn test_mask_key() {
        assert_eq!(mask_key("chbxsk_abcdef123456_ZEE"), "chbxsk_XXXXXXXXXXXXX_ZEE");

        let secret = create_secret_key("billing");
        assert_eq!(mask_key(&secret), "lgsk_XXXXXXXXXXXXX_LGS");

        assert_eq!(mask_key("no-separators"), MASK);
        assert_eq!(mask_key("one_separator"), MASK);
    }

    #[test]
    fn test_generate_otp_lengths() {
        for n in [4, 6, 8] {
            let otp = generate_otp(n).unwrap();
            assert_eq!(otp.len(), n);
            assert!(otp.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_generate_otp_rejects_bad_length() {
        assert!(matches!(generate_otp(0), Err(Error::Validation(_))));
        assert!(generate_otp(MAX_OTP_LENGTH + 1).is_err());
    }

    #[test]
    fn test_login_token() {
        let a = generate_login_token();
        assert_eq!(a.len(), 43);
        assert_ne!(a, generate_login_token());
    }
}
