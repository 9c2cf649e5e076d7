//! Passwordless account and application-key lifecycle.
//!
//! Per (user, app name) an application moves between four states:
//!
//! ```text
//!   no-app ──authorize──▶ active ──time──▶ expired
//!                          ▲  │                │
//!                          │  └──revoke──▶ disabled
//!                          └──authorize────────┘
//! ```
//!
//! Authorizing an active, unexpired application is a conflict. An OTP proves
//! ownership and may rotate the secret in any state.

use super::credentials::{
    create_secret_key, create_token, generate_login_token, generate_otp,
};
use super::delivery::CodeDelivery;
use super::verifier::{self, AppContext};
use crate::crypto::{hash, HashPurpose};
use crate::error::{Error, Result};
use crate::logging::RedactedEmail;
use crate::storage::{AppStatus, ApplicationIdentity, Database, UserAccount};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Digits in an issued passcode.
pub const OTP_LENGTH: usize = 6;

/// Passcode lifetime in milliseconds (10 minutes).
pub const OTP_TTL_MS: i64 = 10 * 60 * 1000;

/// Application lifetime when the caller gives none (30 days).
pub const DEFAULT_EXPIRES_SECS: u64 = 30 * 24 * 60 * 60;

/// Longest application lifetime accepted (10 years).
pub const MAX_EXPIRES_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Longest accepted application name.
pub const MAX_APP_NAME_LEN: usize = 64;

/// Millisecond clock.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Current wall-clock time in epoch milliseconds.
pub fn system_time_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Summary of an application, as listed after login.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSummary {
    /// Application name.
    pub app_name: String,
    /// Stored status.
    pub status: AppStatus,
    /// Expiry, epoch milliseconds.
    pub expires: i64,
    /// Whether the current secret would authenticate right now.
    pub usable: bool,
}

/// Result of a login.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    /// Fresh login token; only its hash is stored.
    pub login_token: String,
    /// Applications the user already owns.
    pub existing_apps: Vec<AppSummary>,
}

/// Freshly issued application credentials, returned exactly once.
#[derive(Debug, Clone)]
pub struct IssuedCredentials {
    /// Application name.
    pub app_name: String,
    /// Plaintext API secret.
    pub api_secret: String,
    /// Plaintext application token.
    pub token: String,
    /// Expiry, epoch milliseconds.
    pub expires: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IssueMode {
    /// Create, or rotate an expired/disabled app.
    CreateOrRotate,
    /// Rotate an expired/disabled app; never create.
    ExistingOnly,
    /// Ownership already proven; rotate or create regardless of state.
    Reissue,
}

/// Normalize and validate an email address.
pub fn validate_email(email: &str) -> Result<String> {
    let email = email.trim().to_ascii_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && email.len() <= 254
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if !valid {
        return Err(Error::validation("invalid email address"));
    }
    Ok(email)
}

/// Validate an application name.
pub fn validate_app_name(app_name: &str) -> Result<()> {
    let valid = !app_name.is_empty()
        && app_name.len() <= MAX_APP_NAME_LEN
        && app_name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'));
    if !valid {
        return Err(Error::validation(format!(
            "app name must be 1-{} characters of [A-Za-z0-9._-]",
            MAX_APP_NAME_LEN
        )));
    }
    Ok(())
}

fn validate_expires(expires_secs: u64) -> Result<i64> {
    if expires_secs == 0 || expires_secs > MAX_EXPIRES_SECS {
        return Err(Error::validation(format!(
            "expires must be between 1 and {} seconds",
            MAX_EXPIRES_SECS
        )));
    }
    Ok(expires_secs as i64 * 1000)
}

/// Issues, rotates, verifies and revokes application credentials.
pub struct IdentityService {
    db: Arc<Mutex<Database>>,
    delivery: Arc<dyn CodeDelivery>,
    clock: Clock,
}

impl IdentityService {
    /// Create a service over a shared database and a code delivery channel.
    pub fn new(db: Arc<Mutex<Database>>, delivery: Arc<dyn CodeDelivery>) -> Self {
        Self {
            db,
            delivery,
            clock: Arc::new(system_time_ms),
        }
    }

    /// Replace the clock (tests).
    pub fn with_clock(mut self, clock: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    fn now(&self) -> i64 {
        (self.clock)()
    }

    /// Find or create the account and issue a new login token.
    pub async fn login(&self, email: &str) -> Result<LoginOutcome> {
        let email = validate_email(email)?;
        let now = self.now();
        let login_token = generate_login_token();
        let token_hash = hash(&login_token, HashPurpose::LoginToken);

        let db = self.db.lock().await;
        let user = match db.find_user_by_email(&email)? {
            Some(user) => {
                db.set_login_token_hash(user.id, &token_hash, now)?;
                user
            }
            None => {
                let user = db.create_user(&email, &token_hash, now)?;
                info!(user_id = user.id, email = %RedactedEmail(&email), "Created user account");
                user
            }
        };

        let existing_apps = db
            .list_user_apps(user.id)?
            .into_iter()
            .map(|app| AppSummary {
                usable: app.is_usable(now),
                app_name: app.app_name,
                status: app.status,
                expires: app.expires,
            })
            .collect();

        debug!(user_id = user.id, "Login token rotated");
        Ok(LoginOutcome {
            login_token,
            existing_apps,
        })
    }

    /// Create an application, or re-authorize an expired or disabled one.
    pub async fn authorize(&self, email: &str, app_name: &str, expires_secs: u64) -> Result<IssuedCredentials> {
        self.authorize_with_mode(email, app_name, expires_secs, IssueMode::CreateOrRotate)
            .await
    }

    /// Like [`authorize`](Self::authorize) but never creates an application.
    pub async fn api_authorize(&self, email: &str, app_name: &str, expires_secs: u64) -> Result<IssuedCredentials> {
        self.authorize_with_mode(email, app_name, expires_secs, IssueMode::ExistingOnly)
            .await
    }

    async fn authorize_with_mode(
        &self,
        email: &str,
        app_name: &str,
        expires_secs: u64,
        mode: IssueMode,
    ) -> Result<IssuedCredentials> {
        let email = validate_email(email)?;
        validate_app_name(app_name)?;
        let lifetime_ms = validate_expires(expires_secs)?;

        let db = self.db.lock().await;
        let user = db
            .find_user_by_email(&email)?
            .ok_or_else(|| Error::not_found("user"))?;
        self.issue(&db, &user, app_name, lifetime_ms, mode)
    }

    fn issue(
        &self,
        db: &Database,
        user: &UserAccount,
        app_name: &str,
        lifetime_ms: i64,
        mode: IssueMode,
    ) -> Result<IssuedCredentials> {
        let now = self.now();
        let existing = db.find_app(user.id, app_name)?;

        match (&existing, mode) {
            (Some(app), IssueMode::CreateOrRotate | IssueMode::ExistingOnly) if app.is_usable(now) => {
                return Err(Error::conflict("application is active"));
            }
            (None, IssueMode::ExistingOnly) => return Err(Error::not_found("application")),
            _ => {}
        }

        let api_secret = create_secret_key(app_name);
        let token = create_token(app_name);
        let secret_hash = hash(&api_secret, HashPurpose::Secret);
        let token_hash = hash(&token, HashPurpose::Token);
        let expires = now.saturating_add(lifetime_ms);

        match existing {
            Some(app) => {
                db.rotate_app_credentials(app.id, &secret_hash, &token_hash, expires, now)?;
                info!(app_id = app.id, app = %app_name, "Rotated application secret");
            }
            None => {
                let app = db.insert_app(user.id, app_name, &secret_hash, &token_hash, expires, now)?;
                info!(app_id = app.id, app = %app_name, "Created application");
            }
        }

        Ok(IssuedCredentials {
            app_name: app_name.to_string(),
            api_secret,
            token,
            expires,
        })
    }

    /// Disable an application. The record is kept for re-authorization.
    pub async fn revoke(&self, app_name: &str, presented_secret: &str) -> Result<()> {
        let now = self.now();
        let db = self.db.lock().await;
        let app = verifier::find_matching_app(&db, app_name, presented_secret)?
            .ok_or_else(|| Error::auth("secret does not match"))?;
        db.set_app_status(app.id, AppStatus::Disabled, now)?;
        info!(app_id = app.id, app = %app_name, "Revoked application");
        Ok(())
    }

    /// Check a presented secret against the stored hash.
    pub async fn verify(&self, app_name: &str, presented_secret: &str) -> Result<bool> {
        let db = self.db.lock().await;
        verifier::verify_service(&db, app_name, presented_secret)
    }

    /// Verify a secret and require the application to be usable.
    pub async fn authenticate(&self, app_name: &str, presented_secret: &str) -> Result<AppContext> {
        let now = self.now();
        let db = self.db.lock().await;
        verifier::authenticate(&db, app_name, presented_secret, now)
    }

    /// Generate a passcode, store its hash and deliver it to the user.
    pub async fn generate_save_and_send_otp(&self, user: &UserAccount, app_name: Option<&str>) -> Result<()> {
        let db = self.db.lock().await;
        self.save_and_send_otp(&db, user, app_name)
    }

    fn save_and_send_otp(&self, db: &Database, user: &UserAccount, app_name: Option<&str>) -> Result<()> {
        let now = self.now();
        let otp = generate_otp(OTP_LENGTH)?;
        let otp_id = db.insert_otp(
            user.id,
            &hash(&otp, HashPurpose::Otp),
            app_name,
            now + OTP_TTL_MS,
            now,
        )?;
        if let Err(e) = self.delivery.deliver(&otp, &user.email) {
            warn!(user_id = user.id, "One-time code delivery failed: {}", e);
            db.delete_otp(otp_id)?;
            return Err(e);
        }
        debug!(user_id = user.id, "One-time code dispatched");
        Ok(())
    }

    /// Send the login-token holder a passcode bound to `app_name`.
    ///
    /// The application need not exist yet; [`authorize_with_otp`](Self::authorize_with_otp)
    /// creates it.
    pub async fn request_otp(&self, app_name: &str, login_token: &str) -> Result<()> {
        validate_app_name(app_name)?;
        let db = self.db.lock().await;
        let user = db
            .find_user_by_login_token_hash(&hash(login_token, HashPurpose::LoginToken))?
            .ok_or_else(|| Error::auth("unknown login token"))?;
        self.save_and_send_otp(&db, &user, Some(app_name))
    }

    fn consume_otp(&self, db: &Database, email: &str, otp: &str, app_name: Option<&str>) -> Result<UserAccount> {
        let email = validate_email(email).map_err(|_| Error::InvalidOtp)?;
        if otp.is_empty() {
            return Err(Error::InvalidOtp);
        }
        let user = db.find_user_by_email(&email)?.ok_or(Error::InvalidOtp)?;
        if !db.consume_otp(user.id, &hash(otp, HashPurpose::Otp), app_name, self.now())? {
            warn!(user_id = user.id, "Rejected one-time code");
            return Err(Error::InvalidOtp);
        }
        Ok(user)
    }

    /// Check and consume a passcode. A code is accepted at most once.
    pub async fn verify_otp(&self, email: &str, otp: &str, app_name: Option<&str>) -> Result<UserAccount> {
        let db = self.db.lock().await;
        self.consume_otp(&db, email, otp, app_name)
    }

    /// Verify a passcode, then rotate (or create) the application's secret.
    pub async fn authorize_with_otp(
        &self,
        email: &str,
        otp: &str,
        app_name: &str,
        expires_secs: u64,
    ) -> Result<IssuedCredentials> {
        validate_app_name(app_name)?;
        let lifetime_ms = validate_expires(expires_secs)?;

        let db = self.db.lock().await;
        let user = self.consume_otp(&db, email, otp, Some(app_name))?;
        self.issue(&db, &user, app_name, lifetime_ms, IssueMode::Reissue)
    }

    /// Look up an application owned by a user (for listings and tests).
    pub async fn find_app(&self, email: &str, app_name: &str) -> Result<Option<ApplicationIdentity>> {
        let email = validate_email(email)?;
        let db = self.db.lock().await;
        match db.find_user_by_email(&email)? {
            Some(user) => db.find_app(user.id, app_name),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::MemoryDelivery;

    #[test]
    fn test_validate_email() {
        assert_eq!(validate_email("  Alice@Example.COM ").unwrap(), "alice@example.com");
        for bad in ["", "alice", "@example.com", "alice@", "alice@example", "a b@example.com", "a@b@c.com", "a@.com"] {
            assert!(validate_email(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_validate_app_name() {
        assert!(validate_app_name("billing-api_v2.prod").is_ok());
        assert!(validate_app_name("").is_err());
        assert!(validate_app_name("has space").is_err());
        assert!(validate_app_name(&"a".repeat(MAX_APP_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn test_validate_expires() {
        assert_eq!(validate_expires(60).unwrap(), 60_000);
        assert!(validate_expires(0).is_err());
        assert!(validate_expires(MAX_EXPIRES_SECS + 1).is_err());
    }

    #[tokio::test]
    async fn test_login_creates_then_rotates() {
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let service = IdentityService::new(db.clone(), Arc::new(MemoryDelivery::new()));

        let first = service.login("a@example.com").await.unwrap();
        let second = service.login("A@example.com").await.unwrap();
        assert_ne!(first.login_token, second.login_token);

        let db = db.lock().await;
        assert!(db
            .find_user_by_login_token_hash(&hash(&first.login_token, HashPurpose::LoginToken))
            .unwrap()
            .is_none());
        assert!(db
            .find_user_by_login_token_hash(&hash(&second.login_token, HashPurpose::LoginToken))
            .unwrap()
            .is_some());
    }
}
