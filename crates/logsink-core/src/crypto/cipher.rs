//! Deterministic per-application payload encryption.
//!
//! Key and IV are pure functions of the application id, so any process that
//! knows the id can reproduce them without a key exchange. The same
//! plaintext under the same id always yields the same ciphertext.
//!
//! Wire format: `base64(AES-256-CBC(check || plaintext))` where `check` is an
//! 8-byte digest of the derived key. Decrypting under the wrong id garbles
//! the first block, so the check fails even when the padding happens to
//! look valid.

use super::{constant_time_eq, hkdf_derive};
use crate::error::{Error, Result};
use aes::Aes256;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// AES-256 key size in bytes.
pub const KEY_SIZE: usize = 32;

/// CBC IV size in bytes.
pub const IV_SIZE: usize = 16;

/// Length of the key-check prefix.
const CHECK_SIZE: usize = 8;

const KEY_INFO: &[u8] = b"logsink payload key v1";
const IV_INFO: &[u8] = b"logsink payload iv v1";

/// Derive the payload key and IV for an application id.
pub fn derive_key_iv(id: &str) -> Result<(Zeroizing<[u8; KEY_SIZE]>, [u8; IV_SIZE])> {
    let key_material = hkdf_derive(None, id.as_bytes(), KEY_INFO, KEY_SIZE)?;
    let iv_material = hkdf_derive(None, id.as_bytes(), IV_INFO, IV_SIZE)?;

    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    key.copy_from_slice(&key_material);
    let mut iv = [0u8; IV_SIZE];
    iv.copy_from_slice(&iv_material);

    Ok((key, iv))
}

fn key_check(key: &[u8; KEY_SIZE]) -> [u8; CHECK_SIZE] {
    let digest = Sha256::new()
        .chain_update(b"logsink key check")
        .chain_update(key)
        .finalize();
    let mut check = [0u8; CHECK_SIZE];
    check.copy_from_slice(&digest[..CHECK_SIZE]);
    check
}

/// Encrypt a string for an application, returning base64.
pub fn encrypt(plaintext: &str, app_id: &str) -> Result<String> {
    let (key, iv) = derive_key_iv(app_id)?;

    let mut buf = Zeroizing::new(Vec::with_capacity(CHECK_SIZE + plaintext.len()));
    buf.extend_from_slice(&key_check(&key));
    buf.extend_from_slice(plaintext.as_bytes());

    let cipher = Aes256CbcEnc::new_from_slices(key.as_slice(), &iv)
        .map_err(|_| Error::Crypto("invalid key length".into()))?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(&buf);

    Ok(BASE64.encode(ciphertext))
}

/// Decrypt a base64 ciphertext produced by [`encrypt`] for the same app id.
///
/// Fails with [`Error::Decryption`] on the wrong id or corrupted input.
pub fn decrypt(ciphertext: &str, app_id: &str) -> Result<String> {
    let raw = BASE64.decode(ciphertext.trim()).map_err(|_| Error::Decryption)?;
    if raw.is_empty() || raw.len() % IV_SIZE != 0 {
        return Err(Error::Decryption);
    }

    let (key, iv) = derive_key_iv(app_id)?;
    let cipher = Aes256CbcDec::new_from_slices(key.as_slice(), &iv)
        .map_err(|_| Error::Crypto("invalid key length".into()))?;
    let plaintext = Zeroizing::new(
        cipher
            .decrypt_padded_vec_mut::<Pkcs7>(&raw)
            .map_err(|_| Error::Decryption)?,
    );

    if plaintext.len() < CHECK_SIZE || !constant_time_eq(&plaintext[..CHECK_SIZE], &key_check(&key)) {
        return Err(Error::Decryption);
    }

    String::from_utf8(plaintext[CHECK_SIZE..].to_vec()).map_err(|_| Error::Decryption)
}

/// JSON-serialize a value and encrypt it.
pub fn encrypt_object<T: Serialize + ?Sized>(value: &T, app_id: &str) -> Result<String> {
    let json = serde_json::to_string(value)?;
    encrypt(&json, app_id)
}

/// Decrypt and parse JSON, falling back to the raw string when it does not parse.
pub fn decrypt_object(ciphertext: &str, app_id: &str) -> Result<Value> {
    let plaintext = decrypt(ciphertext, app_id)?;
    Ok(serde_json::from_str(&plaintext).unwrap_or(Value::String(plaintext)))
}
