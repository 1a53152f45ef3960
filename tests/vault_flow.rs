//! End-to-end vault flows against the filesystem store.

use std::fs;
use std::path::{Path, PathBuf};

use securevault_core::{
    Identity, KdfParams, LockType, VaultConfig, VaultError, VaultManager, VaultState,
};
use tempfile::{tempdir, TempDir};

const REAL: &str = "correct horse battery staple";
const DECOY: &str = "000000";

fn fast_config() -> VaultConfig {
    VaultConfig {
        kdf: KdfParams::floor(),
        ..VaultConfig::default()
    }
}

fn fresh_vault() -> (TempDir, VaultManager) {
    let dir = tempdir().unwrap();
    let manager = VaultManager::open(dir.path(), fast_config()).unwrap();
    (dir, manager)
}

fn object_path(root: &Path, name: &str) -> PathBuf {
    root.join("objects").join(name)
}

#[test]
fn init_import_relock_unlock_read() {
    let (dir, vault) = fresh_vault();

    vault.init(REAL, LockType::Password).unwrap();
    assert_eq!(vault.unlock(REAL).unwrap(), Identity::Real);

    let item = vault
        .import(b"hello", "greet.txt", Some("text/plain"))
        .unwrap();
    assert_eq!(item.size, 5);

    vault.lock();
    assert_eq!(vault.unlock(REAL).unwrap(), Identity::Real);

    let listed = vault.list().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, item.id);
    assert_eq!(listed[0].original_name, "greet.txt");

    let preview = vault.preview(item.id).unwrap();
    assert_eq!(&*preview, b"hello");
    drop(preview);

    // A second manager over the same directory sees the same vault
    drop(vault);
    let reopened = VaultManager::open(dir.path(), fast_config()).unwrap();
    assert!(reopened.is_initialized());
    reopened.unlock(REAL).unwrap();
    assert_eq!(&*reopened.preview(item.id).unwrap(), b"hello");
}

#[test]
fn wrong_secret_then_correct_succeeds() {
    let (_dir, vault) = fresh_vault();
    vault.init(REAL, LockType::Password).unwrap();

    assert!(matches!(
        vault.unlock("wrong"),
        Err(VaultError::InvalidCredential)
    ));
    // No lockout in the core
    assert_eq!(vault.unlock(REAL).unwrap(), Identity::Real);
}

#[test]
fn decoy_corpus_is_disjoint() {
    let (_dir, vault) = fresh_vault();
    vault.init(REAL, LockType::Password).unwrap();
    vault.unlock(REAL).unwrap();

    let real_item = vault
        .import(b"hello", "greet.txt", Some("text/plain"))
        .unwrap();
    vault.set_decoy(DECOY).unwrap();

    // The decoy session looks like a fresh vault
    vault.lock();
    assert_eq!(vault.unlock(DECOY).unwrap(), Identity::Decoy);
    assert_eq!(vault.state(), VaultState::UnlockedDecoy);
    assert!(vault.list().unwrap().is_empty());
    assert!(matches!(
        vault.preview(real_item.id),
        Err(VaultError::NotFound(_))
    ));

    let decoy_item = vault
        .import(b"lie", "note.txt", Some("text/plain"))
        .unwrap();
    assert_eq!(&*vault.preview(decoy_item.id).unwrap(), b"lie");

    // Back in the real session: only the real corpus, untouched
    vault.lock();
    assert_eq!(vault.unlock(REAL).unwrap(), Identity::Real);
    let listed = vault.list().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, real_item.id);
    assert_eq!(&*vault.preview(real_item.id).unwrap(), b"hello");
    assert!(matches!(
        vault.preview(decoy_item.id),
        Err(VaultError::NotFound(_))
    ));
}

#[test]
fn decoy_session_rejects_privileged_operations() {
    let (_dir, vault) = fresh_vault();
    vault.init(REAL, LockType::Password).unwrap();
    vault.unlock(REAL).unwrap();
    vault.set_decoy(DECOY).unwrap();

    vault.lock();
    vault.unlock(DECOY).unwrap();

    assert!(matches!(
        vault.rotate(DECOY, "p@ssw0rd-2025", LockType::Password, &Default::default()),
        Err(VaultError::DecoyForbidden)
    ));
    assert!(matches!(
        vault.set_decoy("111111"),
        Err(VaultError::DecoyForbidden)
    ));
    assert!(matches!(
        vault.remove_decoy(),
        Err(VaultError::DecoyForbidden)
    ));
    assert!(matches!(vault.reset(DECOY), Err(VaultError::DecoyForbidden)));

    // The decoy session is still functional afterwards
    assert!(vault.list().unwrap().is_empty());
}

#[test]
fn decoy_equal_to_real_secret_rejected() {
    let (_dir, vault) = fresh_vault();
    vault.init(REAL, LockType::Password).unwrap();
    vault.unlock(REAL).unwrap();

    assert!(matches!(
        vault.set_decoy(REAL),
        Err(VaultError::ConstraintViolated(_))
    ));
}

#[test]
fn remove_decoy_sweeps_decoy_files() {
    let (dir, vault) = fresh_vault();
    vault.init(REAL, LockType::Password).unwrap();
    vault.unlock(REAL).unwrap();
    let real_item = vault.import(b"keep me", "keep.txt", None).unwrap();
    vault.set_decoy(DECOY).unwrap();

    vault.lock();
    vault.unlock(DECOY).unwrap();
    let decoy_item = vault.import(b"shadow", "s.txt", None).unwrap();

    vault.lock();
    vault.unlock(REAL).unwrap();
    vault.remove_decoy().unwrap();

    // Decoy metadata and file envelopes are gone; the real item is not
    assert!(!object_path(dir.path(), "meta/decoy").exists());
    assert!(!object_path(dir.path(), &decoy_item.id.object_name()).exists());
    assert!(object_path(dir.path(), &real_item.id.object_name()).exists());

    vault.lock();
    assert!(matches!(
        vault.unlock(DECOY),
        Err(VaultError::InvalidCredential)
    ));
    vault.unlock(REAL).unwrap();
    assert_eq!(&*vault.preview(real_item.id).unwrap(), b"keep me");
}

#[test]
fn tampered_envelope_detected_but_session_survives() {
    let (dir, vault) = fresh_vault();
    vault.init(REAL, LockType::Password).unwrap();
    vault.unlock(REAL).unwrap();
    let victim = vault.import(b"hello", "greet.txt", None).unwrap();
    let witness = vault.import(b"intact", "ok.txt", None).unwrap();
    vault.lock();

    // Flip one byte in the middle of the stored envelope
    let path = object_path(dir.path(), &victim.id.object_name());
    let mut bytes = fs::read(&path).unwrap();
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0x01;
    fs::write(&path, bytes).unwrap();

    // Unlock still succeeds: the index is intact
    vault.unlock(REAL).unwrap();
    let listed = vault.list().unwrap();
    assert!(listed.iter().any(|i| i.id == victim.id));

    // The tampered item fails closed; the session and other items do not
    assert!(matches!(vault.preview(victim.id), Err(VaultError::Crypto)));
    assert_eq!(vault.state(), VaultState::UnlockedReal);
    assert_eq!(&*vault.preview(witness.id).unwrap(), b"intact");
}

#[test]
fn tampered_metadata_envelope_keeps_vault_locked() {
    let (dir, vault) = fresh_vault();
    vault.init(REAL, LockType::Password).unwrap();
    vault.unlock(REAL).unwrap();
    vault.import(b"hello", "greet.txt", None).unwrap();
    vault.lock();

    let path = object_path(dir.path(), "meta/real");
    let mut bytes = fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    fs::write(&path, bytes).unwrap();

    assert!(matches!(vault.unlock(REAL), Err(VaultError::Crypto)));
    assert_eq!(vault.state(), VaultState::Locked);
    assert!(vault.debug_key_material().is_none());
}

#[test]
fn reset_wipes_everything() {
    let (dir, vault) = fresh_vault();
    vault.init(REAL, LockType::Password).unwrap();
    vault.unlock(REAL).unwrap();
    vault.import(b"hello", "greet.txt", None).unwrap();
    vault.lock();

    vault.reset(REAL).unwrap();

    assert!(!vault.is_initialized());
    assert_eq!(vault.state(), VaultState::Uninitialized);

    // Object subtrees are empty
    let objects = dir.path().join("objects");
    let leftover: Vec<_> = walk(&objects);
    assert!(leftover.is_empty(), "files survived reset: {leftover:?}");

    assert!(matches!(
        vault.unlock(REAL),
        Err(VaultError::NotInitialized)
    ));

    // The directory can host a brand-new vault
    vault.init("fresh-start-secret", LockType::Password).unwrap();
    vault.unlock("fresh-start-secret").unwrap();
    assert!(vault.list().unwrap().is_empty());
}

#[test]
fn reset_requires_the_real_secret() {
    let (_dir, vault) = fresh_vault();
    vault.init(REAL, LockType::Password).unwrap();
    vault.unlock(REAL).unwrap();
    vault.set_decoy(DECOY).unwrap();
    vault.lock();

    assert!(matches!(
        vault.reset("wrong-secret"),
        Err(VaultError::InvalidCredential)
    ));
    assert!(matches!(vault.reset(DECOY), Err(VaultError::DecoyForbidden)));
    assert!(vault.is_initialized());

    vault.reset(REAL).unwrap();
    assert!(!vault.is_initialized());
}

#[test]
fn key_buffer_zeroed_on_every_exit_path() {
    let (_dir, vault) = fresh_vault();
    vault.init(REAL, LockType::Password).unwrap();

    vault.unlock(REAL).unwrap();
    assert!(vault.debug_key_material().is_some());
    vault.lock();
    assert!(vault.debug_key_material().is_none());

    vault.unlock(REAL).unwrap();
    vault
        .rotate(REAL, "p@ssw0rd-2025", LockType::Password, &Default::default())
        .unwrap();
    assert!(vault.debug_key_material().is_none());

    vault.unlock("p@ssw0rd-2025").unwrap();
    vault.reset("p@ssw0rd-2025").unwrap();
    assert!(vault.debug_key_material().is_none());
}

#[test]
fn locked_vault_rejects_file_operations() {
    let (_dir, vault) = fresh_vault();
    vault.init(REAL, LockType::Password).unwrap();

    assert!(matches!(vault.list(), Err(VaultError::Locked)));
    assert!(matches!(
        vault.import(b"x", "x", None),
        Err(VaultError::Locked)
    ));
    assert!(matches!(
        vault.rotate(REAL, "p@ssw0rd-2025", LockType::Password, &Default::default()),
        Err(VaultError::Locked)
    ));
}

fn walk(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    if let Ok(entries) = fs::read_dir(root) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                files.extend(walk(&path));
            } else {
                files.push(path);
            }
        }
    }
    files
}
