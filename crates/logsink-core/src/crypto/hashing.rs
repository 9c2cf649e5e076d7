//! One-way credential hashing with purpose binding.
//!
//! Every stored credential hash is `SHA-256(value || suffix)` where the
//! suffix depends on what the value is. A secret's hash can therefore never
//! be replayed as a token, passcode or login-token hash.

use sha2::{Digest, Sha256};

/// What a hashed value is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashPurpose {
    /// Application API secret.
    Secret,
    /// Application token.
    Token,
    /// One-time passcode.
    Otp,
    /// User login token.
    LoginToken,
    /// Checksum segment embedded in issued credentials.
    Checksum,
}

impl HashPurpose {
    fn suffix(&self) -> &'static str {
        match self {
            HashPurpose::Secret => "::logsink.secret.v1",
            HashPurpose::Token => "::logsink.token.v1",
            HashPurpose::Otp => "::logsink.otp.v1",
            HashPurpose::LoginToken => "::logsink.login.v1",
            HashPurpose::Checksum => "::logsink.checksum.v1",
        }
    }
}

/// Hash a value for the given purpose, as lowercase hex.
pub fn hash(value: &str, purpose: HashPurpose) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hasher.update(purpose.suffix().as_bytes());
    hex::encode(hasher.finalize())
}

/// Plain SHA-256 of arbitrary bytes, as lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
