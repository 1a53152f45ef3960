//! SecureVault Core - Vault Manager
//!
//! The state machine owning the session. Every operation routes through
//! here; the KDF, envelope codec, object store, and credential registry
//! are taken by injected handle so tests can run against an in-memory
//! store.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use secrecy::ExposeSecret;
use zeroize::Zeroizing;

use crate::biometric::BiometricBroker;
use crate::capture::CaptureIntake;
use crate::config::VaultConfig;
use crate::crypto::keys::{generate_salt, KEY_LEN};
use crate::crypto::{open, seal, Kdf};
use crate::error::{VaultError, VaultResult};
use crate::item::{detect_mime, ItemId, MetadataIndex, VaultItem};
use crate::preview::{NoPrivacy, PreviewGuard, PreviewTracker, ScreenPrivacy};
use crate::registry::{CredentialRegistry, Identity, LockType};
use crate::rotation::{self, OpControl, RotationJournal};
use crate::session::Session;
use crate::store::{FsStore, ObjectStore};

/// Metadata envelope name for the real identity
const META_REAL: &str = "meta/real";

/// Metadata envelope name for the decoy identity
const META_DECOY: &str = "meta/decoy";

fn meta_name(identity: Identity) -> &'static str {
    match identity {
        Identity::Real => META_REAL,
        Identity::Decoy => META_DECOY,
    }
}

/// Vault lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultState {
    Uninitialized,
    Locked,
    UnlockedReal,
    UnlockedDecoy,
    Rotating,
    Wiped,
}

/// One file to deposit, for bulk import
pub struct ImportRequest {
    pub bytes: Vec<u8>,
    pub name: String,
    pub mime: Option<String>,
}

struct Inner {
    state: VaultState,
    session: Option<Session>,
}

/// The vault state machine
///
/// A process holds one manager per vault; operations are serialized by
/// the internal state lock. Long-running bulk work (rotation, bulk
/// import) runs with the lock released and reports progress at item
/// granularity.
pub struct VaultManager {
    store: Arc<dyn ObjectStore>,
    registry: CredentialRegistry,
    kdf: Kdf,
    config: VaultConfig,
    inner: Mutex<Inner>,
    previews: Arc<PreviewTracker>,
}

impl VaultManager {
    // ═══════════════════════════════════════════════════════════════════════
    // CONSTRUCTION
    // ═══════════════════════════════════════════════════════════════════════

    /// Open (or prepare) a vault rooted at `vault_root`.
    ///
    /// The encrypted object tree lives under `objects/`, the credential
    /// registry next to it at `auth.json`.
    pub fn open(vault_root: &Path, config: VaultConfig) -> VaultResult<Self> {
        let store = Arc::new(FsStore::open(&vault_root.join("objects"))?);
        let registry = CredentialRegistry::open(&vault_root.join("auth.json"))?;
        Self::with_parts(store, registry, config, Box::new(NoPrivacy))
    }

    /// Assemble a manager from injected component handles
    pub fn with_parts(
        store: Arc<dyn ObjectStore>,
        registry: CredentialRegistry,
        config: VaultConfig,
        privacy: Box<dyn ScreenPrivacy>,
    ) -> VaultResult<Self> {
        let kdf = Kdf::new(config.kdf)?;
        let state = if registry.is_initialized() {
            VaultState::Locked
        } else {
            VaultState::Uninitialized
        };

        Ok(Self {
            store,
            registry,
            kdf,
            config,
            inner: Mutex::new(Inner {
                state,
                session: None,
            }),
            previews: Arc::new(PreviewTracker::new(privacy)),
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> VaultState {
        self.inner.lock().state
    }

    /// Identity of the current session, if unlocked
    pub fn identity(&self) -> Option<Identity> {
        self.inner.lock().session.as_ref().map(Session::identity)
    }

    pub fn is_initialized(&self) -> bool {
        self.registry.is_initialized()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // INIT / UNLOCK / LOCK
    // ═══════════════════════════════════════════════════════════════════════

    /// Initialize a fresh vault.
    ///
    /// Generates the shared salt, writes the real credential, and seals
    /// an empty metadata envelope under the derived data key. Ends in the
    /// locked state; the caller unlocks explicitly.
    pub fn init(&self, secret: &str, lock_type: LockType) -> VaultResult<()> {
        let mut inner = self.inner.lock();
        if inner.state != VaultState::Uninitialized || self.registry.is_initialized() {
            return Err(VaultError::AlreadyInitialized);
        }
        validate_secret(secret, lock_type)?;

        let salt = generate_salt();
        let (key, verifier) = self.kdf.derive_pair(secret.as_bytes(), &salt)?;

        let empty = MetadataIndex::empty().encode()?;
        self.store.put(META_REAL, &seal(&key, &empty)?)?;
        self.registry.init(salt, &verifier, lock_type)?;

        inner.state = VaultState::Locked;
        log::info!("vault initialized");
        Ok(())
    }

    /// Unlock with a secret, entering the real or decoy session.
    ///
    /// One memory-hard derivation yields both the verifier (identified in
    /// constant time) and the data key; a mismatch is `InvalidCredential`
    /// with no state change. A metadata envelope that fails to open under
    /// the derived key leaves the vault locked.
    pub fn unlock(&self, secret: &str) -> VaultResult<Identity> {
        let mut inner = self.inner.lock();
        match inner.state {
            VaultState::Uninitialized => return Err(VaultError::NotInitialized),
            VaultState::Rotating | VaultState::Wiped => return Err(VaultError::Locked),
            VaultState::UnlockedReal | VaultState::UnlockedDecoy => {
                // Re-authenticating drops the existing session first
                inner.session = None;
                inner.state = VaultState::Locked;
            }
            VaultState::Locked => {}
        }

        let salt = self.registry.salt()?;
        let (key, verifier) = self.kdf.derive_pair(secret.as_bytes(), &salt)?;

        let identity = self
            .registry
            .identify(&verifier)?
            .ok_or(VaultError::InvalidCredential)?;

        // Finish or abandon any half-done rotation before trusting the tree
        rotation::recover(self.store.as_ref(), &salt)?;

        let envelope = self.store.get(meta_name(identity))?;
        let plaintext = open(&key, &envelope)?;
        let index = MetadataIndex::decode(&plaintext, self.config.max_index_bytes)?;

        inner.session = Some(Session::new(identity, key, index));
        inner.state = match identity {
            Identity::Real => VaultState::UnlockedReal,
            Identity::Decoy => VaultState::UnlockedDecoy,
        };

        if identity == Identity::Real {
            self.drain_captures(&mut inner);
        }

        Ok(identity)
    }

    /// Unlock via the biometric broker.
    ///
    /// The broker attests presence and yields the cached master secret;
    /// the secret then takes the normal unlock path.
    pub fn unlock_with_biometric(&self, broker: &dyn BiometricBroker) -> VaultResult<Identity> {
        if !self.registry.is_initialized() {
            return Err(VaultError::NotInitialized);
        }
        if !self.registry.biometric_enabled() {
            return Err(VaultError::ConstraintViolated(
                "biometric unlock is not enabled".into(),
            ));
        }
        let secret = broker
            .acquire_secret()
            .ok_or(VaultError::InvalidCredential)?;
        self.unlock(secret.expose_secret())
    }

    /// Lock the vault: the session is dropped and the data key buffer is
    /// zeroed. Idempotent.
    pub fn lock(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            VaultState::Uninitialized | VaultState::Wiped => {}
            VaultState::Rotating => {
                log::warn!("lock() ignored while a rotation is in flight");
            }
            _ => {
                inner.session = None;
                inner.state = VaultState::Locked;
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // FILE OPERATIONS
    // ═══════════════════════════════════════════════════════════════════════

    /// Deposit a file into the current session's corpus.
    ///
    /// When `mime` is `None` the label is sniffed from the payload's
    /// magic bytes. If the metadata write fails after the file envelope
    /// landed, the envelope is deleted again and the vault stays
    /// consistent: the item never becomes reachable.
    pub fn import(&self, bytes: &[u8], name: &str, mime: Option<&str>) -> VaultResult<VaultItem> {
        let mut inner = self.inner.lock();
        let session = unlocked_session(&mut inner)?;
        self.import_into(session, bytes, name, mime)
    }

    /// Deposit several files, reporting progress at item granularity.
    ///
    /// Each item is imported atomically; cancellation between items
    /// leaves the already-imported prefix in place and never a file
    /// envelope whose id made it into the persisted index half-way.
    pub fn import_many(
        &self,
        requests: &[ImportRequest],
        ctl: &OpControl<'_>,
    ) -> VaultResult<Vec<VaultItem>> {
        let total = requests.len();
        let mut imported = Vec::with_capacity(total);

        for (done, request) in requests.iter().enumerate() {
            if ctl.cancelled() {
                return Err(VaultError::Cancelled);
            }
            let item = self.import(&request.bytes, &request.name, request.mime.as_deref())?;
            imported.push(item);
            // Lock released between items; safe to call out
            ctl.report(done + 1, total);
        }

        Ok(imported)
    }

    /// Read-only snapshot of the current session's items, newest first
    pub fn list(&self) -> VaultResult<Vec<VaultItem>> {
        let mut inner = self.inner.lock();
        let session = unlocked_session(&mut inner)?;
        Ok(session.index().snapshot())
    }

    /// Decrypt an item for display.
    ///
    /// The returned guard wipes the plaintext on release (or drop) and
    /// keeps the advisory screen-privacy flags raised while any preview
    /// is open. A corrupt envelope surfaces as `Crypto` without touching
    /// the session; other items stay accessible.
    pub fn preview(&self, id: ItemId) -> VaultResult<PreviewGuard> {
        let mut inner = self.inner.lock();
        let session = unlocked_session(&mut inner)?;

        if !session.index().contains(id) {
            return Err(VaultError::NotFound(id.to_string()));
        }

        let envelope = self.store.get(&id.object_name())?;
        let mut plaintext = open(session.key(), &envelope)?;
        Ok(PreviewTracker::acquire(&self.previews, std::mem::take(&mut *plaintext)))
    }

    /// Decrypt an item for export; the caller owns the buffer, which is
    /// zeroed on drop.
    pub fn export(&self, id: ItemId) -> VaultResult<Zeroizing<Vec<u8>>> {
        let mut inner = self.inner.lock();
        let session = unlocked_session(&mut inner)?;

        if !session.index().contains(id) {
            return Err(VaultError::NotFound(id.to_string()));
        }

        let envelope = self.store.get(&id.object_name())?;
        open(session.key(), &envelope)
    }

    /// Remove an item from the current session's corpus.
    ///
    /// The file envelope goes first, then the index entry, then the
    /// metadata rewrite; the metadata envelope is never left half
    /// written (the store's put is atomic).
    pub fn delete(&self, id: ItemId) -> VaultResult<()> {
        let mut inner = self.inner.lock();
        let session = unlocked_session(&mut inner)?;

        if !session.index().contains(id) {
            return Err(VaultError::NotFound(id.to_string()));
        }

        self.store.delete(&id.object_name())?;

        let (pos, removed) = session
            .index_mut()
            .remove(id)
            .ok_or_else(|| VaultError::NotFound(id.to_string()))?;

        if let Err(e) = self.persist_index(session) {
            // Disk still holds the old index; put the entry back so the
            // in-memory view matches what the next unlock will load.
            session.index_mut().insert_at(pos, removed);
            return Err(e);
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // DECOY IDENTITY
    // ═══════════════════════════════════════════════════════════════════════

    /// Install a decoy credential under the shared salt.
    ///
    /// The decoy data key exists only long enough to seal the empty
    /// decoy metadata envelope; the real session key stays the only
    /// resident key afterwards.
    pub fn set_decoy(&self, decoy_secret: &str) -> VaultResult<()> {
        let mut inner = self.inner.lock();
        require_real(&inner)?;
        validate_decoy_secret(decoy_secret)?;

        let salt = self.registry.salt()?;
        let (decoy_key, decoy_verifier) = self.kdf.derive_pair(decoy_secret.as_bytes(), &salt)?;

        let empty = MetadataIndex::empty().encode()?;
        self.store.put(META_DECOY, &seal(&decoy_key, &empty)?)?;

        if let Err(e) = self.registry.set_decoy(&decoy_verifier) {
            let _ = self.store.delete(META_DECOY);
            return Err(e);
        }
        Ok(())
    }

    /// Remove the decoy credential, its metadata envelope, and every file
    /// envelope the real index does not reference.
    pub fn remove_decoy(&self) -> VaultResult<()> {
        let mut inner = self.inner.lock();
        require_real(&inner)?;

        self.registry.clear_decoy()?;
        self.store.delete(META_DECOY)?;

        let session = unlocked_session(&mut inner)?;
        let keep: HashSet<String> = session
            .index()
            .ids()
            .into_iter()
            .map(|id| id.object_name())
            .collect();
        rotation::sweep_unreferenced(self.store.as_ref(), &keep)?;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // ROTATION / RESET
    // ═══════════════════════════════════════════════════════════════════════

    /// Rotate the master secret, re-encrypting the entire corpus.
    ///
    /// Only a real session may rotate. The registry is not touched until
    /// every file has been re-encrypted into staging, so an abort (error
    /// or cancellation) leaves the vault opening under the old secret.
    /// Success ends in the locked state; the decoy identity does not
    /// survive (the salt changed, so its credential is unreachable).
    pub fn rotate(
        &self,
        old_secret: &str,
        new_secret: &str,
        new_type: LockType,
        ctl: &OpControl<'_>,
    ) -> VaultResult<()> {
        let ids = {
            let mut inner = self.inner.lock();
            match inner.state {
                VaultState::UnlockedReal => {}
                VaultState::UnlockedDecoy => return Err(VaultError::DecoyForbidden),
                VaultState::Uninitialized => return Err(VaultError::NotInitialized),
                _ => return Err(VaultError::Locked),
            }
            validate_secret(new_secret, new_type)?;
            let session = unlocked_session(&mut inner)?;
            let ids = session.index().ids();
            inner.state = VaultState::Rotating;
            ids
        };

        // Bulk work runs without the state lock; progress callbacks fire
        // from the worker pool.
        match self.rotate_inner(old_secret, new_secret, new_type, ids, ctl) {
            Ok(()) => {
                let mut inner = self.inner.lock();
                inner.session = None;
                inner.state = VaultState::Locked;
                log::info!("credential rotation complete");
                Ok(())
            }
            Err(RotateFailure::Aborted(e)) => {
                let mut inner = self.inner.lock();
                inner.state = VaultState::UnlockedReal;
                Err(e)
            }
            Err(RotateFailure::AfterCommit(e)) => {
                // The new credential is live; the journal finishes the
                // publish on the next unlock.
                let mut inner = self.inner.lock();
                inner.session = None;
                inner.state = VaultState::Locked;
                log::warn!("rotation publish interrupted; recovery will finish at next unlock");
                Err(e)
            }
        }
    }

    fn rotate_inner(
        &self,
        old_secret: &str,
        new_secret: &str,
        new_type: LockType,
        ids: Vec<ItemId>,
        ctl: &OpControl<'_>,
    ) -> Result<(), RotateFailure> {
        let store = self.store.as_ref();

        // Re-verify the old secret through the normal identify path
        let salt = self.registry.salt().map_err(RotateFailure::Aborted)?;
        let (old_key, old_verifier) = self
            .kdf
            .derive_pair(old_secret.as_bytes(), &salt)
            .map_err(RotateFailure::Aborted)?;
        match self.registry.identify(&old_verifier) {
            Ok(Some(Identity::Real)) => {}
            Ok(_) => return Err(RotateFailure::Aborted(VaultError::InvalidCredential)),
            Err(e) => return Err(RotateFailure::Aborted(e)),
        }

        let new_salt = generate_salt();
        let (new_key, new_verifier) = self
            .kdf
            .derive_pair(new_secret.as_bytes(), &new_salt)
            .map_err(RotateFailure::Aborted)?;

        let journal = RotationJournal::new(&new_salt, ids.clone());
        let staged = (|| {
            journal.write(store)?;
            rotation::stage_files(store, &old_key, &new_key, &ids, ctl)?;

            // Stage the metadata envelope under the new key
            let envelope = self.store.get(META_REAL)?;
            let plaintext = open(&old_key, &envelope)?;
            let index = MetadataIndex::decode(&plaintext, self.config.max_index_bytes)?;
            self.store
                .put(rotation::STAGED_META_NAME, &seal(&new_key, &index.encode()?)?)?;

            if ctl.cancelled() {
                return Err(VaultError::Cancelled);
            }
            Ok(())
        })();
        if let Err(e) = staged {
            let _ = rotation::discard_staging(store);
            return Err(RotateFailure::Aborted(e));
        }

        // Commit point: one atomic registry rewrite. This also clears the
        // decoy credential.
        if let Err(e) = self.registry.rotate(new_salt, &new_verifier, new_type) {
            let _ = rotation::discard_staging(store);
            return Err(RotateFailure::Aborted(e));
        }

        rotation::publish(store, &journal).map_err(RotateFailure::AfterCommit)
    }

    /// Destroy the vault: object tree and credential registry.
    ///
    /// Requires the real secret. Ends uninitialized.
    pub fn reset(&self, secret: &str) -> VaultResult<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            VaultState::Uninitialized => return Err(VaultError::NotInitialized),
            VaultState::UnlockedDecoy => return Err(VaultError::DecoyForbidden),
            VaultState::Rotating | VaultState::Wiped => return Err(VaultError::Locked),
            VaultState::Locked | VaultState::UnlockedReal => {}
        }

        let salt = self.registry.salt()?;
        let verifier = self.kdf.derive_verifier(secret.as_bytes(), &salt)?;
        match self.registry.identify(&verifier)? {
            Some(Identity::Real) => {}
            Some(Identity::Decoy) => return Err(VaultError::DecoyForbidden),
            None => return Err(VaultError::InvalidCredential),
        }

        inner.session = None;
        inner.state = VaultState::Wiped;

        self.store.wipe_tree()?;
        self.registry.wipe()?;

        inner.state = VaultState::Uninitialized;
        log::warn!("vault reset: object tree and credentials wiped");
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // COLLABORATOR PASS-THROUGHS
    // ═══════════════════════════════════════════════════════════════════════

    pub fn biometric_enabled(&self) -> bool {
        self.registry.biometric_enabled()
    }

    pub fn set_biometric_enabled(&self, enabled: bool) -> VaultResult<()> {
        self.registry.set_biometric_enabled(enabled)
    }

    /// Opaque settings blob for the intruder-capture collaborator
    pub fn intruder_settings(&self) -> Option<Vec<u8>> {
        self.registry.intruder_settings()
    }

    pub fn set_intruder_settings(&self, settings: Option<Vec<u8>>) -> VaultResult<()> {
        self.registry.set_intruder_settings(settings)
    }

    /// Debug hook: the resident session key bytes, if any.
    ///
    /// Exists so tests can assert the key buffer is gone after `lock()`;
    /// not part of the public contract.
    #[doc(hidden)]
    pub fn debug_key_material(&self) -> Option<[u8; KEY_LEN]> {
        self.inner
            .lock()
            .session
            .as_ref()
            .map(|s| *s.key().expose())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // INTERNALS
    // ═══════════════════════════════════════════════════════════════════════

    fn import_into(
        &self,
        session: &mut Session,
        bytes: &[u8],
        name: &str,
        mime: Option<&str>,
    ) -> VaultResult<VaultItem> {
        let id = ItemId::generate();
        let envelope = seal(session.key(), bytes)?;
        self.store.put(&id.object_name(), &envelope)?;

        let item = VaultItem {
            id,
            original_name: name.to_string(),
            mime_type: mime.unwrap_or_else(|| detect_mime(bytes)).to_string(),
            size: bytes.len() as u64,
            imported_at: Utc::now(),
        };
        session.index_mut().prepend(item.clone());

        if let Err(e) = self.persist_index(session) {
            // Undo both sides; the item was never reachable
            session.index_mut().remove(id);
            let _ = self.store.delete(&id.object_name());
            return Err(e);
        }
        Ok(item)
    }

    /// Re-seal and persist the session's metadata envelope
    fn persist_index(&self, session: &Session) -> VaultResult<()> {
        let plaintext = session.index().encode()?;
        if plaintext.len() > self.config.max_index_bytes {
            return Err(VaultError::ConstraintViolated(format!(
                "metadata index would exceed the {} byte bound",
                self.config.max_index_bytes
            )));
        }
        let envelope = seal(session.key(), &plaintext)?;
        self.store.put(meta_name(session.identity()), &envelope)
    }

    /// Import staged capture payloads through the normal path.
    ///
    /// Runs on real unlock only; intake failures are logged, never fatal
    /// for the unlock that triggered them.
    fn drain_captures(&self, inner: &mut Inner) {
        let Some(dir) = self.config.capture_dir.as_deref() else {
            return;
        };
        let intake = CaptureIntake::new(dir);
        let pending = match intake.pending() {
            Ok(pending) => pending,
            Err(e) => {
                log::warn!("capture intake scan failed: {e}");
                return;
            }
        };

        let Some(session) = inner.session.as_mut() else {
            return;
        };
        for capture in pending {
            let name = capture
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "capture".to_string());

            match self.import_into(session, &capture.bytes, &name, None) {
                Ok(_) => {
                    if let Err(e) = intake.consume(&capture) {
                        log::warn!("imported capture left in staging: {e}");
                    }
                }
                Err(e) => log::warn!("capture import failed: {e}"),
            }
        }
    }
}

enum RotateFailure {
    /// Nothing committed; the old secret still opens the vault
    Aborted(VaultError),
    /// Registry committed but publish did not finish; recovery completes
    /// it at the next unlock
    AfterCommit(VaultError),
}

/// The session, if the vault is in an unlocked state
fn unlocked_session(inner: &mut Inner) -> VaultResult<&mut Session> {
    match inner.state {
        VaultState::UnlockedReal | VaultState::UnlockedDecoy => {
            inner.session.as_mut().ok_or(VaultError::Locked)
        }
        VaultState::Uninitialized => Err(VaultError::NotInitialized),
        _ => Err(VaultError::Locked),
    }
}

/// Real-session gate for privileged operations
fn require_real(inner: &Inner) -> VaultResult<()> {
    match inner.state {
        VaultState::UnlockedReal => Ok(()),
        VaultState::UnlockedDecoy => Err(VaultError::DecoyForbidden),
        VaultState::Uninitialized => Err(VaultError::NotInitialized),
        _ => Err(VaultError::Locked),
    }
}

/// The real secret must match the declared lock type
fn validate_secret(secret: &str, lock_type: LockType) -> VaultResult<()> {
    match lock_type {
        LockType::Pin => {
            if secret.len() != 6 || !secret.bytes().all(|b| b.is_ascii_digit()) {
                return Err(VaultError::ConstraintViolated(
                    "PIN must be exactly 6 decimal digits".into(),
                ));
            }
        }
        LockType::Password => {
            if secret.len() < 8 {
                return Err(VaultError::ConstraintViolated(
                    "password must be at least 8 bytes".into(),
                ));
            }
        }
    }
    Ok(())
}

/// A decoy secret may take either shape, independent of the vault's
/// declared lock type
fn validate_decoy_secret(secret: &str) -> VaultResult<()> {
    if validate_secret(secret, LockType::Pin).is_ok()
        || validate_secret(secret, LockType::Password).is_ok()
    {
        Ok(())
    } else {
        Err(VaultError::ConstraintViolated(
            "decoy secret must be a 6-digit PIN or a password of at least 8 bytes".into(),
        ))
    }
}
