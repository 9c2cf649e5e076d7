//! Integration tests for the identity lifecycle.
//!
//! Tests cover:
//! - login → authorize → verify → revoke → re-authorize
//! - Conflict on active apps and rotation after expiry
//! - OTP request, single use and expiry
//! - Credential hashes only at rest

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use logsink_core::crypto::{hash, HashPurpose};
use logsink_core::identity::{
    has_secret_format, has_token_format, CodeDelivery, IdentityService, MemoryDelivery, OTP_TTL_MS,
};
use logsink_core::storage::{AppStatus, Database};
use logsink_core::Error;

const EMAIL: &str = "dev@example.com";
const START: i64 = 1_700_000_000_000;

struct Harness {
    service: IdentityService,
    db: Arc<Mutex<Database>>,
    outbox: Arc<MemoryDelivery>,
    clock: Arc<AtomicI64>,
}

impl Harness {
    fn new() -> Self {
        let db = Arc::new(Mutex::new(
            Database::open_in_memory().expect("should open in-memory db"),
        ));
        let outbox = Arc::new(MemoryDelivery::new());
        let clock = Arc::new(AtomicI64::new(START));
        let now = Arc::clone(&clock);
        let service = IdentityService::new(Arc::clone(&db), outbox.clone())
            .with_clock(move || now.load(Ordering::SeqCst));
        Self {
            service,
            db,
            outbox,
            clock,
        }
    }

    fn advance(&self, ms: i64) {
        self.clock.fetch_add(ms, Ordering::SeqCst);
    }

    fn last_code(&self) -> String {
        self.outbox.last_code_for(EMAIL).expect("a code was delivered")
    }
}

#[tokio::test]
async fn test_full_lifecycle() {
    let h = Harness::new();

    let login = h.service.login(EMAIL).await.unwrap();
    assert!(login.existing_apps.is_empty());

    let issued = h.service.authorize(EMAIL, "billing", 3600).await.unwrap();
    assert!(has_secret_format(&issued.api_secret));
    assert!(has_token_format(&issued.token));
    assert_eq!(issued.expires, START + 3_600_000);

    assert!(h.service.verify("billing", &issued.api_secret).await.unwrap());
    let ctx = h.service.authenticate("billing", &issued.api_secret).await.unwrap();
    assert_eq!(ctx.app_name, "billing");

    // Plaintext never stored.
    {
        let db = h.db.lock().await;
        let user = db.find_user_by_email(EMAIL).unwrap().unwrap();
        let app = db.find_app(user.id, "billing").unwrap().unwrap();
        assert_eq!(app.secret_hash, hash(&issued.api_secret, HashPurpose::Secret));
        assert_ne!(app.secret_hash, issued.api_secret);
    }

    h.service.revoke("billing", &issued.api_secret).await.unwrap();
    assert!(matches!(
        h.service.authenticate("billing", &issued.api_secret).await,
        Err(Error::Auth(_))
    ));
    let app = h.service.find_app(EMAIL, "billing").await.unwrap().unwrap();
    assert_eq!(app.status, AppStatus::Disabled);

    // A disabled app can be re-authorized and gets a new secret.
    let reissued = h.service.authorize(EMAIL, "billing", 3600).await.unwrap();
    assert_ne!(reissued.api_secret, issued.api_secret);
    assert!(!h.service.verify("billing", &issued.api_secret).await.unwrap());
    assert!(h.service.authenticate("billing", &reissued.api_secret).await.is_ok());

    let login = h.service.login(EMAIL).await.unwrap();
    assert_eq!(login.existing_apps.len(), 1);
    assert!(login.existing_apps[0].usable);
}

#[tokio::test]
async fn test_conflict_then_rotation_after_expiry() {
    let h = Harness::new();
    h.service.login(EMAIL).await.unwrap();

    let first = h.service.authorize(EMAIL, "billing", 60).await.unwrap();
    assert!(matches!(
        h.service.authorize(EMAIL, "billing", 60).await,
        Err(Error::Conflict(_))
    ));
    assert!(matches!(
        h.service.api_authorize(EMAIL, "billing", 60).await,
        Err(Error::Conflict(_))
    ));

    h.advance(60_000);
    assert!(matches!(
        h.service.authenticate("billing", &first.api_secret).await,
        Err(Error::Auth(_))
    ));

    let rotated = h.service.api_authorize(EMAIL, "billing", 60).await.unwrap();
    assert_ne!(rotated.api_secret, first.api_secret);
    assert!(h.service.authenticate("billing", &rotated.api_secret).await.is_ok());
}

#[tokio::test]
async fn test_api_authorize_never_creates() {
    let h = Harness::new();
    h.service.login(EMAIL).await.unwrap();
    assert!(matches!(
        h.service.api_authorize(EMAIL, "checkout", 60).await,
        Err(Error::NotFound(_))
    ));
    assert!(h.service.find_app(EMAIL, "checkout").await.unwrap().is_none());
}

#[tokio::test]
async fn test_authorize_requires_known_user() {
    let h = Harness::new();
    assert!(matches!(
        h.service.authorize("nobody@example.com", "billing", 60).await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn test_otp_rotates_active_secret_once() {
    let h = Harness::new();
    let login = h.service.login(EMAIL).await.unwrap();
    let original = h.service.authorize(EMAIL, "billing", 3600).await.unwrap();

    h.service.request_otp("billing", &login.login_token).await.unwrap();
    let code = h.last_code();
    assert_eq!(code.len(), 6);

    let rotated = h
        .service
        .authorize_with_otp(EMAIL, &code, "billing", 3600)
        .await
        .unwrap();
    assert_ne!(rotated.api_secret, original.api_secret);
    assert!(h.service.authenticate("billing", &rotated.api_secret).await.is_ok());

    // Replay is rejected.
    assert!(matches!(
        h.service.authorize_with_otp(EMAIL, &code, "billing", 3600).await,
        Err(Error::InvalidOtp)
    ));
}

#[tokio::test]
async fn test_otp_expires_and_is_bound_to_app() {
    let h = Harness::new();
    let login = h.service.login(EMAIL).await.unwrap();
    h.service.authorize(EMAIL, "billing", 3600).await.unwrap();
    h.service.authorize(EMAIL, "checkout", 3600).await.unwrap();

    h.service.request_otp("billing", &login.login_token).await.unwrap();
    let code = h.last_code();
    assert!(matches!(
        h.service.verify_otp(EMAIL, &code, Some("checkout")).await,
        Err(Error::InvalidOtp)
    ));

    h.advance(OTP_TTL_MS);
    assert!(matches!(
        h.service.verify_otp(EMAIL, &code, Some("billing")).await,
        Err(Error::InvalidOtp)
    ));
}

#[tokio::test]
async fn test_otp_for_unbound_code() {
    let h = Harness::new();
    h.service.login(EMAIL).await.unwrap();
    let user = {
        let db = h.db.lock().await;
        db.find_user_by_email(EMAIL).unwrap().unwrap()
    };

    h.service.generate_save_and_send_otp(&user, None).await.unwrap();
    let code = h.last_code();
    let verified = h.service.verify_otp(EMAIL, &code, None).await.unwrap();
    assert_eq!(verified.id, user.id);
    assert!(h.service.verify_otp(EMAIL, &code, None).await.is_err());
}

#[tokio::test]
async fn test_request_otp_checks_login_token() {
    let h = Harness::new();
    let login = h.service.login(EMAIL).await.unwrap();
    h.service.authorize(EMAIL, "billing", 3600).await.unwrap();

    assert!(matches!(
        h.service.request_otp("billing", "not-a-token").await,
        Err(Error::Auth(_))
    ));
    assert!(matches!(
        h.service.request_otp("bad name", &login.login_token).await,
        Err(Error::Validation(_))
    ));

    // Logging in again invalidates the old token.
    h.service.login(EMAIL).await.unwrap();
    assert!(h.service.request_otp("billing", &login.login_token).await.is_err());
    assert_eq!(h.outbox.count(), 0);
}

#[tokio::test]
async fn test_otp_creates_first_application() {
    let h = Harness::new();
    let login = h.service.login(EMAIL).await.unwrap();
    assert!(h.service.find_app(EMAIL, "checkout").await.unwrap().is_none());

    h.service.request_otp("checkout", &login.login_token).await.unwrap();
    let code = h.last_code();

    // The code is bound to the requested name.
    assert!(matches!(
        h.service.authorize_with_otp(EMAIL, &code, "billing", 3600).await,
        Err(Error::InvalidOtp)
    ));
    let issued = h
        .service
        .authorize_with_otp(EMAIL, &code, "checkout", 3600)
        .await
        .unwrap();
    assert!(has_secret_format(&issued.api_secret));

    let app = h.service.find_app(EMAIL, "checkout").await.unwrap().unwrap();
    assert_eq!(app.status, AppStatus::Active);
    assert!(h.service.authenticate("checkout", &issued.api_secret).await.is_ok());
}

/// A delivery channel that is always down.
struct FailingDelivery;

impl CodeDelivery for FailingDelivery {
    fn deliver(&self, _code: &str, _destination: &str) -> logsink_core::Result<()> {
        Err(Error::Transport("mail relay unavailable".into()))
    }
}

#[tokio::test]
async fn test_failed_delivery_leaves_no_usable_code() {
    let db = Arc::new(Mutex::new(
        Database::open_in_memory().expect("should open in-memory db"),
    ));
    let service = IdentityService::new(Arc::clone(&db), Arc::new(FailingDelivery));
    let login = service.login(EMAIL).await.unwrap();

    assert!(matches!(
        service.request_otp("billing", &login.login_token).await,
        Err(Error::Transport(_))
    ));

    let db = db.lock().await;
    let user = db.find_user_by_email(EMAIL).unwrap().unwrap();
    assert!(db.list_otps(user.id).unwrap().is_empty());
}

#[tokio::test]
async fn test_wrong_otp_reveals_nothing() {
    let h = Harness::new();
    h.service.login(EMAIL).await.unwrap();

    let unknown_user = h.service.verify_otp("ghost@example.com", "123456", None).await;
    let wrong_code = h.service.verify_otp(EMAIL, "123456", None).await;
    assert_eq!(
        unknown_user.unwrap_err().to_string(),
        wrong_code.unwrap_err().to_string()
    );
}

#[tokio::test]
async fn test_revoke_requires_matching_secret() {
    let h = Harness::new();
    h.service.login(EMAIL).await.unwrap();
    let issued = h.service.authorize(EMAIL, "billing", 3600).await.unwrap();

    let other = h.service.authorize(EMAIL, "checkout", 3600).await.unwrap();
    assert!(matches!(
        h.service.revoke("billing", &other.api_secret).await,
        Err(Error::Auth(_))
    ));
    assert!(h.service.authenticate("billing", &issued.api_secret).await.is_ok());
}
