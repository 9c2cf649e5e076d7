//! Identity: users, applications and their credentials.
//!
//! Users log in with an email address and receive a login token. Each user
//! owns named applications, and each application holds one API secret that
//! clients present when shipping logs. Secrets are only ever stored hashed.

mod credentials;
mod delivery;
mod service;
mod verifier;

pub use credentials::{
    checksum_matches, create_secret_key, create_token, generate_login_token, generate_otp,
    has_secret_format, has_token_format, mask_key, CREDENTIAL_BODY_LEN, CREDENTIAL_TAG, MASK,
    MAX_OTP_LENGTH, SECRET_PREFIX, TOKEN_PREFIX,
};
pub use delivery::{CodeDelivery, CodeDeliveryRegistry, LogDelivery, MemoryDelivery};
pub use service::{
    system_time_ms, validate_app_name, validate_email, AppSummary, Clock, IdentityService,
    IssuedCredentials, LoginOutcome, DEFAULT_EXPIRES_SECS, MAX_APP_NAME_LEN, MAX_EXPIRES_SECS, OTP_LENGTH, OTP_TTL_MS,
};
pub use verifier::{authenticate, verify_service, AppContext};
