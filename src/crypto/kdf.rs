//! SecureVault Core - Key Derivation
//!
//! Argon2id turns a user secret and the vault salt into a 32-byte root,
//! and HKDF-SHA256 expands that root under two distinct context labels:
//! one for the data key, one for the credential verifier. The labels are
//! what keep the verifier useless for decryption - HKDF outputs under
//! different info strings are computationally independent.
//!
//! The memory-hard call is the expensive part (>= 150 ms at the default
//! cost on commodity mobile hardware), so an unlock attempt derives the
//! root once and expands both outputs from it.

use argon2::{Algorithm, Argon2, Params, Version};
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::crypto::keys::{DataKey, VerifierHash, KEY_LEN, VERIFIER_LEN};
use crate::error::{VaultError, VaultResult};

/// HKDF context labels for domain separation
mod contexts {
    /// Context for the session data key
    pub const DATA: &[u8] = b"SECUREVAULT:DATA:v1";

    /// Context for the credential verifier
    pub const VERIFY: &[u8] = b"SECUREVAULT:VERIFY:v1";
}

/// Minimum memory cost in KiB. Anything below this is a misconfiguration,
/// not a tuning choice.
const MIN_MEMORY_KIB: u32 = 8 * 1024;

/// Argon2id cost parameters
///
/// Fixed at vault-construction time; the derivation itself never branches
/// on the lock type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Passes over memory (time cost)
    pub passes: u32,
    /// Parallelism lanes
    pub lanes: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 64 * 1024, // 64 MiB
            passes: 3,
            lanes: 2,
        }
    }
}

impl KdfParams {
    /// Parameters for low-memory devices
    pub fn low_memory() -> Self {
        Self {
            memory_kib: 16 * 1024, // 16 MiB
            passes: 4,
            lanes: 1,
        }
    }

    /// Cheapest parameters the floor allows. Test fixtures only - far too
    /// weak for a real vault.
    pub fn floor() -> Self {
        Self {
            memory_kib: MIN_MEMORY_KIB,
            passes: 1,
            lanes: 1,
        }
    }

    fn validate(&self) -> VaultResult<()> {
        if self.memory_kib < MIN_MEMORY_KIB {
            return Err(VaultError::ConstraintViolated(format!(
                "KDF memory cost must be at least {} KiB (got {})",
                MIN_MEMORY_KIB, self.memory_kib
            )));
        }
        if self.passes < 1 || self.lanes < 1 {
            return Err(VaultError::ConstraintViolated(
                "KDF passes and lanes must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Key derivation over (secret, salt)
///
/// Both `derive_key` and `derive_verifier` are deterministic pure
/// functions of their inputs and the configured parameters.
#[derive(Debug, Clone)]
pub struct Kdf {
    params: KdfParams,
}

impl Kdf {
    /// Build a derivation context, validating the cost parameters up front
    pub fn new(params: KdfParams) -> VaultResult<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    /// Derive the 32-byte data key
    pub fn derive_key(&self, secret: &[u8], salt: &[u8]) -> VaultResult<DataKey> {
        let root = self.derive_root(secret, salt)?;
        Ok(DataKey::new(expand(&root, contexts::DATA)))
    }

    /// Derive the 32-byte verifier hash
    pub fn derive_verifier(&self, secret: &[u8], salt: &[u8]) -> VaultResult<VerifierHash> {
        let root = self.derive_root(secret, salt)?;
        Ok(VerifierHash::new(expand(&root, contexts::VERIFY)))
    }

    /// Derive both outputs from a single memory-hard call.
    ///
    /// Unlock needs the verifier to identify the credential and the data
    /// key to open the metadata envelope; paying the Argon2id cost twice
    /// would double every unlock.
    pub fn derive_pair(&self, secret: &[u8], salt: &[u8]) -> VaultResult<(DataKey, VerifierHash)> {
        let root = self.derive_root(secret, salt)?;
        let key = DataKey::new(expand(&root, contexts::DATA));
        let verifier = VerifierHash::new(expand(&root, contexts::VERIFY));
        Ok((key, verifier))
    }

    /// The memory-hard step: Argon2id(secret, salt) -> 32-byte root
    fn derive_root(&self, secret: &[u8], salt: &[u8]) -> VaultResult<Zeroizing<[u8; KEY_LEN]>> {
        let params = Params::new(
            self.params.memory_kib,
            self.params.passes,
            self.params.lanes,
            Some(KEY_LEN),
        )
        .map_err(|e| VaultError::ConstraintViolated(format!("invalid Argon2 params: {e}")))?;

        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut root = Zeroizing::new([0u8; KEY_LEN]);
        argon2
            .hash_password_into(secret, salt, &mut *root)
            .map_err(|e| VaultError::ConstraintViolated(format!("Argon2id failed: {e}")))?;

        Ok(root)
    }
}

/// Expand the root under a context label
fn expand(root: &[u8; KEY_LEN], info: &[u8]) -> [u8; VERIFIER_LEN] {
    let hk = Hkdf::<Sha256>::new(None, root);
    let mut okm = [0u8; VERIFIER_LEN];
    hk.expand(info, &mut okm)
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    okm
}
