//! Authentication of presented API secrets.

use super::credentials::{has_secret_format, mask_key};
use crate::crypto::{constant_time_eq, hash, HashPurpose};
use crate::error::{Error, Result};
use crate::storage::{ApplicationIdentity, Database};

/// Caller identity attached to an authenticated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppContext {
    /// Application row id.
    pub app_id: i64,
    /// Application name, used to tag and encrypt ingested logs.
    pub app_name: String,
    /// Owning user id.
    pub owner_user_id: i64,
    /// Masked form of the secret the caller presented.
    pub masked_key: String,
}

pub(crate) fn find_matching_app(db: &Database, app_name: &str, presented_secret: &str) -> Result<Option<ApplicationIdentity>> {
    if !has_secret_format(presented_secret) {
        return Err(Error::InvalidKey("secret is not a logsink api key".into()));
    }

    let apps = db.find_apps_by_name(app_name)?;
    if apps.is_empty() {
        return Err(Error::not_found("application"));
    }

    let presented_hash = hash(presented_secret, HashPurpose::Secret);
    Ok(apps
        .into_iter()
        .find(|app| constant_time_eq(app.secret_hash.as_bytes(), presented_hash.as_bytes())))
}

/// Check a presented secret against the stored hash for `app_name`.
///
/// Fails with `InvalidKey` when the secret is not in credential format and
/// `NotFound` when no application has that name.
pub fn verify_service(db: &Database, app_name: &str, presented_secret: &str) -> Result<bool> {
    Ok(find_matching_app(db, app_name, presented_secret)?.is_some())
}

/// Verify the secret and require the application to be usable.
pub fn authenticate(
    db: &Database,
    app_name: &str,
    presented_secret: &str,
    now_ms: i64,
) -> Result<AppContext> {
    let app = find_matching_app(db, app_name, presented_secret)?
        .ok_or_else(|| Error::auth("secret does not match"))?;

    if !app.is_usable(now_ms) {
        return Err(Error::auth("application disabled or expired"));
    }

    Ok(AppContext {
        app_id: app.id,
        app_name: app.app_name,
        owner_user_id: app.owner_user_id,
        masked_key: mask_key(presented_secret),
    })
}
