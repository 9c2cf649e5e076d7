//! Cryptographic primitives for LogSink.
//!
//! - **HKDF-SHA256**: deterministic key/IV derivation from an application id
//! - **AES-256-CBC**: payload encryption at rest
//! - **SHA-256**: credential hashing and content hashes
//!
//! ## Security Properties
//!
//! Payload keys are derived from the application name alone, with no server
//! secret mixed in. This is application-level obfuscation of stored logs,
//! not cryptographic secrecy: anyone who knows an application's name can
//! derive its key.

pub mod cipher;
pub mod hashing;

pub use cipher::{decrypt, decrypt_object, derive_key_iv, encrypt, encrypt_object, IV_SIZE, KEY_SIZE};
pub use hashing::{hash, sha256_hex, HashPurpose};

use crate::error::{Error, Result};
use hkdf::Hkdf;
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use zeroize::Zeroizing;

/// HKDF-SHA256 extract-and-expand into a zeroizing buffer of `len` bytes.
pub fn hkdf_derive(salt: Option<&[u8]>, ikm: &[u8], info: &[u8], len: usize) -> Result<Zeroizing<Vec<u8>>> {
    let mut okm = Zeroizing::new(vec![0u8; len]);
    Hkdf::<Sha256>::new(salt, ikm)
        .expand(info, okm.as_mut_slice())
        .map_err(|_| Error::Crypto(format!("cannot expand {} bytes", len)))?;
    Ok(okm)
}

/// `N` bytes from the OS RNG.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    OsRng.fill_bytes(&mut buf);
    buf
}

/// Compare two byte strings without early exit on the first difference.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hkdf_derive() {
        let ikm = b"billing-service";
        let info = b"logsink payload key";

        let out1 = hkdf_derive(None, ikm, info, 32).expect("should derive");
        assert_eq!(out1.len(), 32);

        // Deterministic
        let out2 = hkdf_derive(None, ikm, info, 32).expect("should derive");
        assert_eq!(&*out1, &*out2);

        // Different info -> different output
        let out3 = hkdf_derive(None, ikm, b"different", 32).expect("should derive");
        assert_ne!(&*out1, &*out3);
    }

    #[test]
    fn test_random_bytes() {
        let a: [u8; 32] = random_bytes();
        let b: [u8; 32] = random_bytes();
        assert_ne!(a, b);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_eq(b"hello", b"hi"));
    }
}
