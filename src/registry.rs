//! SecureVault Core - Credential Registry
//!
//! Owns the persisted auth record: the shared salt, the real verifier,
//! the optional decoy verifier, the lock-type tag, and the opaque
//! collaborator settings. Stored as a plaintext JSON file *outside* the
//! encrypted object tree - it must be readable before any secret is
//! known, and it never contains key material, only salt and verifiers.

use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::crypto::keys::{VerifierHash, SALT_LEN, VERIFIER_LEN};
use crate::error::{VaultError, VaultResult};

/// Which credential a verifier matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity {
    Real,
    Decoy,
}

/// The declared shape of the master secret.
///
/// Advisory: derivation never branches on it, it only drives input
/// validation and UI affordances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockType {
    #[serde(rename = "PIN")]
    Pin,
    #[serde(rename = "PASSWORD")]
    Password,
}

/// On-disk shape of the auth record. Binary values base64-encoded.
#[derive(Serialize, Deserialize)]
struct RecordFile {
    salt: String,
    verifier_real: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    verifier_decoy: Option<String>,
    lock_type: LockType,
    biometric_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    intruder_settings: Option<String>,
}

#[derive(Clone)]
struct Record {
    salt: [u8; SALT_LEN],
    verifier_real: [u8; VERIFIER_LEN],
    verifier_decoy: Option<[u8; VERIFIER_LEN]>,
    lock_type: LockType,
    biometric_enabled: bool,
    intruder_settings: Option<Vec<u8>>,
}

impl Record {
    fn to_file(&self) -> RecordFile {
        RecordFile {
            salt: BASE64.encode(self.salt),
            verifier_real: BASE64.encode(self.verifier_real),
            verifier_decoy: self.verifier_decoy.map(|v| BASE64.encode(v)),
            lock_type: self.lock_type,
            biometric_enabled: self.biometric_enabled,
            intruder_settings: self.intruder_settings.as_deref().map(|v| BASE64.encode(v)),
        }
    }

    fn from_file(file: RecordFile) -> VaultResult<Self> {
        Ok(Self {
            salt: decode_fixed(&file.salt)?,
            verifier_real: decode_fixed(&file.verifier_real)?,
            verifier_decoy: file
                .verifier_decoy
                .as_deref()
                .map(decode_fixed)
                .transpose()?,
            lock_type: file.lock_type,
            biometric_enabled: file.biometric_enabled,
            intruder_settings: file
                .intruder_settings
                .as_deref()
                .map(|v| BASE64.decode(v).map_err(|_| VaultError::Crypto))
                .transpose()?,
        })
    }
}

fn decode_fixed<const N: usize>(encoded: &str) -> VaultResult<[u8; N]> {
    let bytes = BASE64.decode(encoded).map_err(|_| VaultError::Crypto)?;
    bytes.try_into().map_err(|_| VaultError::Crypto)
}

/// The persisted credential registry
pub struct CredentialRegistry {
    path: PathBuf,
    record: Mutex<Option<Record>>,
}

impl CredentialRegistry {
    /// Open the registry at `path`, loading the record if one exists
    pub fn open(path: &Path) -> VaultResult<Self> {
        let record = if path.exists() {
            let data = fs::read(path)?;
            let file: RecordFile = serde_json::from_slice(&data).map_err(|_| VaultError::Crypto)?;
            Some(Record::from_file(file)?)
        } else {
            None
        };

        Ok(Self {
            path: path.to_path_buf(),
            record: Mutex::new(record),
        })
    }

    /// Whether an auth record exists
    pub fn is_initialized(&self) -> bool {
        self.record.lock().is_some()
    }

    /// Create the auth record. Fails if one already exists.
    pub fn init(
        &self,
        salt: [u8; SALT_LEN],
        verifier_real: &VerifierHash,
        lock_type: LockType,
    ) -> VaultResult<()> {
        let mut guard = self.record.lock();
        if guard.is_some() {
            return Err(VaultError::AlreadyInitialized);
        }

        let record = Record {
            salt,
            verifier_real: *verifier_real.as_bytes(),
            verifier_decoy: None,
            lock_type,
            biometric_enabled: false,
            intruder_settings: None,
        };
        self.persist(&record)?;
        *guard = Some(record);
        Ok(())
    }

    /// Identify a candidate verifier against the stored credentials.
    ///
    /// Both comparisons run unconditionally and in constant time; when no
    /// decoy is set the candidate is compared against a dummy so the
    /// timing profile does not reveal whether a decoy exists.
    pub fn identify(&self, candidate: &VerifierHash) -> VaultResult<Option<Identity>> {
        let guard = self.record.lock();
        let record = guard.as_ref().ok_or(VaultError::NotInitialized)?;

        let dummy = [0u8; VERIFIER_LEN];
        let real_match: bool = candidate
            .as_bytes()
            .ct_eq(&record.verifier_real)
            .into();
        let decoy_match: bool = candidate
            .as_bytes()
            .ct_eq(record.verifier_decoy.as_ref().unwrap_or(&dummy))
            .into();
        let decoy_present = record.verifier_decoy.is_some();

        if real_match {
            Ok(Some(Identity::Real))
        } else if decoy_match && decoy_present {
            Ok(Some(Identity::Decoy))
        } else {
            Ok(None)
        }
    }

    /// The shared salt
    pub fn salt(&self) -> VaultResult<[u8; SALT_LEN]> {
        let guard = self.record.lock();
        guard
            .as_ref()
            .map(|r| r.salt)
            .ok_or(VaultError::NotInitialized)
    }

    /// The declared secret shape
    pub fn lock_type(&self) -> VaultResult<LockType> {
        let guard = self.record.lock();
        guard
            .as_ref()
            .map(|r| r.lock_type)
            .ok_or(VaultError::NotInitialized)
    }

    /// Install a decoy verifier under the shared salt.
    ///
    /// Rejects equality with the real verifier - an equal decoy would be
    /// unreachable (the real identity always matches first).
    pub fn set_decoy(&self, verifier_decoy: &VerifierHash) -> VaultResult<()> {
        let mut guard = self.record.lock();
        let record = guard.as_mut().ok_or(VaultError::NotInitialized)?;

        if verifier_decoy.matches(&record.verifier_real) {
            return Err(VaultError::ConstraintViolated(
                "decoy verifier equals the real verifier".into(),
            ));
        }

        let mut updated = record.clone();
        updated.verifier_decoy = Some(*verifier_decoy.as_bytes());
        self.persist(&updated)?;
        *record = updated;
        Ok(())
    }

    /// Remove the decoy verifier
    pub fn clear_decoy(&self) -> VaultResult<()> {
        let mut guard = self.record.lock();
        let record = guard.as_mut().ok_or(VaultError::NotInitialized)?;
        let mut updated = record.clone();
        updated.verifier_decoy = None;
        self.persist(&updated)?;
        *record = updated;
        Ok(())
    }

    /// Whether a decoy credential is currently installed
    pub fn has_decoy(&self) -> bool {
        self.record
            .lock()
            .as_ref()
            .map(|r| r.verifier_decoy.is_some())
            .unwrap_or(false)
    }

    /// Replace salt, real verifier and lock type in one atomic write.
    ///
    /// Always clears the decoy: the salt changed, so the old decoy
    /// verifier is unreachable from any secret.
    pub fn rotate(
        &self,
        new_salt: [u8; SALT_LEN],
        new_verifier_real: &VerifierHash,
        new_lock_type: LockType,
    ) -> VaultResult<()> {
        let mut guard = self.record.lock();
        let record = guard.as_mut().ok_or(VaultError::NotInitialized)?;

        let mut updated = record.clone();
        updated.salt = new_salt;
        updated.verifier_real = *new_verifier_real.as_bytes();
        updated.verifier_decoy = None;
        updated.lock_type = new_lock_type;
        self.persist(&updated)?;
        *record = updated;
        Ok(())
    }

    /// Erase the record from disk and memory
    pub fn wipe(&self) -> VaultResult<()> {
        let mut guard = self.record.lock();
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        *guard = None;
        Ok(())
    }

    pub fn biometric_enabled(&self) -> bool {
        self.record
            .lock()
            .as_ref()
            .map(|r| r.biometric_enabled)
            .unwrap_or(false)
    }

    pub fn set_biometric_enabled(&self, enabled: bool) -> VaultResult<()> {
        let mut guard = self.record.lock();
        let record = guard.as_mut().ok_or(VaultError::NotInitialized)?;
        let mut updated = record.clone();
        updated.biometric_enabled = enabled;
        self.persist(&updated)?;
        *record = updated;
        Ok(())
    }

    /// Opaque settings blob consumed by the intruder-capture collaborator
    pub fn intruder_settings(&self) -> Option<Vec<u8>> {
        self.record
            .lock()
            .as_ref()
            .and_then(|r| r.intruder_settings.clone())
    }

    pub fn set_intruder_settings(&self, settings: Option<Vec<u8>>) -> VaultResult<()> {
        let mut guard = self.record.lock();
        let record = guard.as_mut().ok_or(VaultError::NotInitialized)?;
        let mut updated = record.clone();
        updated.intruder_settings = settings;
        self.persist(&updated)?;
        *record = updated;
        Ok(())
    }

    /// Atomic rewrite of the registry file
    fn persist(&self, record: &Record) -> VaultResult<()> {
        let data = serde_json::to_vec_pretty(&record.to_file()).map_err(|_| VaultError::Crypto)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, &data)?;
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn verifier(byte: u8) -> VerifierHash {
        VerifierHash::new([byte; VERIFIER_LEN])
    }

    #[test]
    fn init_once() {
        let dir = tempdir().unwrap();
        let registry = CredentialRegistry::open(&dir.path().join("auth.json")).unwrap();

        assert!(!registry.is_initialized());
        registry
            .init([1u8; SALT_LEN], &verifier(0xAA), LockType::Password)
            .unwrap();
        assert!(registry.is_initialized());

        assert!(matches!(
            registry.init([2u8; SALT_LEN], &verifier(0xBB), LockType::Pin),
            Err(VaultError::AlreadyInitialized)
        ));
    }

    #[test]
    fn identify_real_decoy_none() {
        let dir = tempdir().unwrap();
        let registry = CredentialRegistry::open(&dir.path().join("auth.json")).unwrap();
        registry
            .init([1u8; SALT_LEN], &verifier(0xAA), LockType::Pin)
            .unwrap();

        assert_eq!(
            registry.identify(&verifier(0xAA)).unwrap(),
            Some(Identity::Real)
        );
        assert_eq!(registry.identify(&verifier(0xBB)).unwrap(), None);

        registry.set_decoy(&verifier(0xBB)).unwrap();
        assert_eq!(
            registry.identify(&verifier(0xBB)).unwrap(),
            Some(Identity::Decoy)
        );

        registry.clear_decoy().unwrap();
        assert_eq!(registry.identify(&verifier(0xBB)).unwrap(), None);
    }

    #[test]
    fn all_zero_candidate_never_matches_missing_decoy() {
        let dir = tempdir().unwrap();
        let registry = CredentialRegistry::open(&dir.path().join("auth.json")).unwrap();
        registry
            .init([1u8; SALT_LEN], &verifier(0xAA), LockType::Pin)
            .unwrap();

        // The dummy compare target is all zeros; a zero candidate must
        // still come back as no match.
        assert_eq!(registry.identify(&verifier(0x00)).unwrap(), None);
    }

    #[test]
    fn decoy_equal_to_real_rejected() {
        let dir = tempdir().unwrap();
        let registry = CredentialRegistry::open(&dir.path().join("auth.json")).unwrap();
        registry
            .init([1u8; SALT_LEN], &verifier(0xAA), LockType::Pin)
            .unwrap();

        assert!(matches!(
            registry.set_decoy(&verifier(0xAA)),
            Err(VaultError::ConstraintViolated(_))
        ));
    }

    #[test]
    fn rotate_clears_decoy_and_survives_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("auth.json");

        let registry = CredentialRegistry::open(&path).unwrap();
        registry
            .init([1u8; SALT_LEN], &verifier(0xAA), LockType::Password)
            .unwrap();
        registry.set_decoy(&verifier(0xBB)).unwrap();
        registry
            .rotate([2u8; SALT_LEN], &verifier(0xCC), LockType::Pin)
            .unwrap();

        // Reload from disk
        let reloaded = CredentialRegistry::open(&path).unwrap();
        assert_eq!(reloaded.salt().unwrap(), [2u8; SALT_LEN]);
        assert_eq!(reloaded.lock_type().unwrap(), LockType::Pin);
        assert!(!reloaded.has_decoy());
        assert_eq!(
            reloaded.identify(&verifier(0xCC)).unwrap(),
            Some(Identity::Real)
        );
        assert_eq!(reloaded.identify(&verifier(0xAA)).unwrap(), None);
        assert_eq!(reloaded.identify(&verifier(0xBB)).unwrap(), None);
    }

    #[test]
    fn wipe_erases_record_and_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("auth.json");

        let registry = CredentialRegistry::open(&path).unwrap();
        registry
            .init([1u8; SALT_LEN], &verifier(0xAA), LockType::Pin)
            .unwrap();
        registry.wipe().unwrap();

        assert!(!registry.is_initialized());
        assert!(!path.exists());
        assert!(matches!(registry.salt(), Err(VaultError::NotInitialized)));
    }

    #[test]
    fn settings_pass_through() {
        let dir = tempdir().unwrap();
        let registry = CredentialRegistry::open(&dir.path().join("auth.json")).unwrap();
        registry
            .init([1u8; SALT_LEN], &verifier(0xAA), LockType::Pin)
            .unwrap();

        assert!(!registry.biometric_enabled());
        registry.set_biometric_enabled(true).unwrap();
        assert!(registry.biometric_enabled());

        assert_eq!(registry.intruder_settings(), None);
        registry
            .set_intruder_settings(Some(b"opaque blob".to_vec()))
            .unwrap();
        assert_eq!(
            registry.intruder_settings(),
            Some(b"opaque blob".to_vec())
        );
    }
}
