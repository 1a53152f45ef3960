//! SecureVault Core - Key Material
//!
//! Value types for the transient data key, the persisted verifier hash,
//! and the random inputs (salt, nonce) the rest of the crypto stack needs.

use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::{ExposeSecret, Secret};
use subtle::ConstantTimeEq;

/// Key length for AES-256
pub const KEY_LEN: usize = 32;

/// Nonce length for AES-GCM (96 bits)
pub const NONCE_LEN: usize = 12;

/// GCM authentication tag length
pub const TAG_LEN: usize = 16;

/// Salt length (shared by both identities, persisted in clear)
pub const SALT_LEN: usize = 16;

/// Verifier hash length
pub const VERIFIER_LEN: usize = 32;

/// The session data key.
///
/// Wraps the 32 key bytes so they are zeroized when the last clone is
/// dropped. Only the currently unlocked identity's key is ever resident.
#[derive(Clone)]
pub struct DataKey {
    inner: Secret<[u8; KEY_LEN]>,
}

impl DataKey {
    /// Wrap raw key bytes
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self {
            inner: Secret::new(bytes),
        }
    }

    /// Expose the key bytes (use with caution)
    pub fn expose(&self) -> &[u8; KEY_LEN] {
        self.inner.expose_secret()
    }
}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DataKey([redacted])")
    }
}

/// A domain-separated digest of (secret, salt).
///
/// Used only as a constant-time comparison target; never as key material.
#[derive(Clone, PartialEq, Eq)]
pub struct VerifierHash([u8; VERIFIER_LEN]);

impl VerifierHash {
    pub fn new(bytes: [u8; VERIFIER_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; VERIFIER_LEN] {
        &self.0
    }

    /// Constant-time equality against stored verifier bytes
    pub fn matches(&self, stored: &[u8]) -> bool {
        self.0.as_slice().ct_eq(stored).into()
    }
}

impl std::fmt::Debug for VerifierHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("VerifierHash([redacted])")
    }
}

/// Generate a random salt
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Generate a random nonce for AES-GCM
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}
