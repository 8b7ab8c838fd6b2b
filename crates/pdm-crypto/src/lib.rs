//! Cryptographic primitives for the PDM broker.
//!
//! Key derivation (PBKDF2-HMAC-SHA-256), authenticated encryption
//! (AES-256-GCM), content hashing (SHA-256), and random identifier
//! generation. No function here performs I/O; callers own persistence.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use uuid::Uuid;
use zeroize::Zeroizing;

pub const SALT_LEN: usize = 16;
pub const NONCE_LEN: usize = 12;
pub const KEY_LEN: usize = 32;
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Errors from the crypto layer.
///
/// `DecryptionFailed` covers both a wrong passphrase and a tampered
/// ciphertext on purpose: the spec requires callers be unable to
/// distinguish a bad passphrase from an integrity failure.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("invalid key material")]
    InvalidKey,
}

/// A PBKDF2-derived 256-bit key. Zeroized on drop.
pub struct DerivedKey(Zeroizing<[u8; KEY_LEN]>);

impl DerivedKey {
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

/// Derives a 256-bit key from a passphrase and a 16-byte salt using
/// PBKDF2-HMAC-SHA-256 with `PBKDF2_ITERATIONS` rounds.
pub fn derive(passphrase: &str, salt: &[u8; SALT_LEN]) -> DerivedKey {
    let mut out = [0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, PBKDF2_ITERATIONS, &mut out);
    DerivedKey(Zeroizing::new(out))
}

/// An AES-256-GCM ciphertext with its random nonce. The authentication tag
/// is appended to `ciphertext` by the underlying AEAD implementation.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
}

/// Encrypts `plaintext` under `key` with a fresh random 96-bit nonce.
pub fn encrypt(key: &DerivedKey, plaintext: &[u8]) -> Result<Envelope, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::InvalidKey)?;
    Ok(Envelope {
        nonce: nonce_bytes,
        ciphertext,
    })
}

/// Decrypts an envelope produced by [`encrypt`]. Any authentication failure
/// (wrong key or tampered ciphertext) surfaces as [`CryptoError::DecryptionFailed`].
pub fn decrypt(
    key: &DerivedKey,
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)?;
    Ok(Zeroizing::new(plaintext))
}

/// SHA-256 digest of `bytes`.
pub fn hash(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// `n` cryptographically random bytes.
pub fn random_bytes(n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    buf
}

/// A fresh random 16-byte salt, one per credential blob.
pub fn random_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

/// A fresh random 128-bit identifier (document ids, grant ids, correlation ids).
pub fn new_uuid() -> Uuid {
    Uuid::new_v4()
}

/// Constant-time byte comparison, for any manual tag/digest comparison that
/// doesn't already go through an AEAD's own constant-time verification.
pub fn fixed_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
