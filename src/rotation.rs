//! SecureVault Core - Credential Rotation
//!
//! Rotating the master secret re-encrypts the entire corpus, and a crash
//! anywhere in the middle must never strand files under two keys. The
//! protocol is a two-phase commit against the object store:
//!
//! 1. A journal (`rotate/journal`) records the new salt and the item set
//!    before anything else is written.
//! 2. Every file envelope is re-encrypted into a staging name
//!    (`rotate/<id>`); the originals stay untouched and the vault still
//!    opens with the old secret.
//! 3. The metadata envelope is staged the same way (`rotate/meta`).
//! 4. The registry rewrite (one atomic file) is the commit point.
//! 5. Staged envelopes are published over the originals, the decoy
//!    remnants are swept, and the journal is deleted.
//!
//! A crash before step 4 is recovered by discarding the staging area; a
//! crash after it is recovered by re-running step 5 from the journal.
//! Either way exactly one secret opens the vault afterwards.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::crypto::keys::{DataKey, SALT_LEN};
use crate::crypto::{open, seal};
use crate::error::{VaultError, VaultResult};
use crate::item::ItemId;
use crate::store::ObjectStore;

/// Object name of the rotation journal
pub(crate) const JOURNAL_NAME: &str = "rotate/journal";

/// Object name of the staged metadata envelope
pub(crate) const STAGED_META_NAME: &str = "rotate/meta";

/// Per-file retry limit inside the bulk pass
const FILE_RETRIES: usize = 3;

fn staged_name(id: ItemId) -> String {
    format!("rotate/{id}")
}

// ---------------------------------------------------------------------------
// Cancellation and progress
// ---------------------------------------------------------------------------

/// Cooperative cancellation flag for long-running operations
#[derive(Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; observed at item granularity
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Progress and cancellation hooks for long-running operations.
///
/// The progress callback fires at item granularity with `(done, total)`,
/// and the manager never holds its own lock across the call.
#[derive(Default)]
pub struct OpControl<'a> {
    pub progress: Option<&'a (dyn Fn(usize, usize) + Sync)>,
    pub cancel: Option<&'a CancelFlag>,
}

impl<'a> OpControl<'a> {
    pub fn cancelled(&self) -> bool {
        self.cancel.map(CancelFlag::is_cancelled).unwrap_or(false)
    }

    pub fn report(&self, done: usize, total: usize) {
        if let Some(progress) = self.progress {
            progress(done, total);
        }
    }
}

// ---------------------------------------------------------------------------
// Journal
// ---------------------------------------------------------------------------

/// Persisted record of an in-flight rotation
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct RotationJournal {
    /// Base64 of the new salt; compared against the registry to decide
    /// whether the commit point was reached
    pub new_salt: String,
    /// Items being migrated
    pub ids: Vec<ItemId>,
}

impl RotationJournal {
    pub fn new(new_salt: &[u8; SALT_LEN], ids: Vec<ItemId>) -> Self {
        Self {
            new_salt: BASE64.encode(new_salt),
            ids,
        }
    }

    pub fn write(&self, store: &dyn ObjectStore) -> VaultResult<()> {
        let data = serde_json::to_vec(self).map_err(|_| VaultError::Crypto)?;
        store.put(JOURNAL_NAME, &data)
    }

    pub fn load(store: &dyn ObjectStore) -> VaultResult<Option<Self>> {
        match store.get(JOURNAL_NAME) {
            Ok(data) => {
                let journal = serde_json::from_slice(&data).map_err(|_| VaultError::Crypto)?;
                Ok(Some(journal))
            }
            Err(VaultError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn salt_matches(&self, registry_salt: &[u8; SALT_LEN]) -> bool {
        self.new_salt == BASE64.encode(registry_salt)
    }
}

// ---------------------------------------------------------------------------
// Bulk re-encryption (prepare phase)
// ---------------------------------------------------------------------------

/// Re-encrypt every item into the staging area on a worker pool bounded
/// by CPU count. The originals are not touched.
pub(crate) fn stage_files(
    store: &dyn ObjectStore,
    old_key: &DataKey,
    new_key: &DataKey,
    ids: &[ItemId],
    ctl: &OpControl<'_>,
) -> VaultResult<()> {
    let total = ids.len();
    let next = AtomicUsize::new(0);
    let done = AtomicUsize::new(0);
    let failure: Mutex<Option<VaultError>> = Mutex::new(None);

    let workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(total.max(1));

    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                if failure.lock().is_some() {
                    return;
                }
                if ctl.cancelled() {
                    failure.lock().get_or_insert(VaultError::Cancelled);
                    return;
                }

                let i = next.fetch_add(1, Ordering::SeqCst);
                if i >= total {
                    return;
                }

                match stage_one(store, old_key, new_key, ids[i]) {
                    Ok(()) => {
                        let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
                        ctl.report(finished, total);
                    }
                    Err(e) => {
                        failure.lock().get_or_insert(e);
                        return;
                    }
                }
            });
        }
    });

    match failure.into_inner() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Migrate one envelope into staging, with bounded IO retries.
///
/// A dangling index entry (envelope already gone) is skipped: it was
/// unreachable before the rotation and stays unreachable after.
fn stage_one(
    store: &dyn ObjectStore,
    old_key: &DataKey,
    new_key: &DataKey,
    id: ItemId,
) -> VaultResult<()> {
    let mut last_err = None;

    for _ in 0..FILE_RETRIES {
        let result = (|| {
            let envelope = match store.get(&id.object_name()) {
                Ok(envelope) => envelope,
                Err(VaultError::NotFound(_)) => {
                    log::warn!("rotation: index references missing envelope {id}");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            let plaintext = open(old_key, &envelope)?;
            let staged = seal(new_key, &plaintext)?;
            store.put(&staged_name(id), &staged)
        })();

        match result {
            Ok(()) => return Ok(()),
            // A bad tag will not heal on retry
            Err(VaultError::Crypto) => return Err(VaultError::Crypto),
            Err(e) => last_err = Some(e),
        }
    }

    Err(last_err.unwrap_or(VaultError::Crypto))
}

// ---------------------------------------------------------------------------
// Publish / recovery
// ---------------------------------------------------------------------------

/// Move staged envelopes over the originals, replace the real metadata
/// envelope, drop the decoy remnants, and clear the journal.
///
/// Idempotent: recovery after a mid-publish crash re-runs it, and staged
/// objects that already made it across are simply absent.
pub(crate) fn publish(store: &dyn ObjectStore, journal: &RotationJournal) -> VaultResult<()> {
    for &id in &journal.ids {
        match store.get(&staged_name(id)) {
            Ok(bytes) => {
                store.put(&id.object_name(), &bytes)?;
                store.delete(&staged_name(id))?;
            }
            // Already published on a previous pass
            Err(VaultError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
    }

    match store.get(STAGED_META_NAME) {
        Ok(bytes) => {
            store.put("meta/real", &bytes)?;
            store.delete(STAGED_META_NAME)?;
        }
        Err(VaultError::NotFound(_)) => {
            // The metadata envelope must have been published already
            store.get("meta/real")?;
        }
        Err(e) => return Err(e),
    }

    // The registry rewrite already invalidated the decoy credential; its
    // metadata envelope and any files only it referenced are garbage now.
    store.delete("meta/decoy")?;
    let keep: HashSet<String> = journal.ids.iter().map(|id| id.object_name()).collect();
    sweep_unreferenced(store, &keep)?;

    store.delete(JOURNAL_NAME)
}

/// Delete every `file/*` envelope whose name is not in `keep`.
///
/// Used after rotation and after decoy removal: the decoy's index is
/// sealed under a key the real session does not hold, so its files are
/// found by subtraction rather than enumeration.
pub(crate) fn sweep_unreferenced(
    store: &dyn ObjectStore,
    keep: &HashSet<String>,
) -> VaultResult<usize> {
    let mut swept = 0;
    for name in store.list("file/")? {
        if !keep.contains(&name) {
            store.delete(&name)?;
            swept += 1;
        }
    }
    if swept > 0 {
        log::info!("swept {swept} unreferenced file envelope(s)");
    }
    Ok(swept)
}

/// Discard an uncommitted staging area
pub(crate) fn discard_staging(store: &dyn ObjectStore) -> VaultResult<()> {
    for name in store.list("rotate/")? {
        store.delete(&name)?;
    }
    Ok(())
}

/// Finish or abandon an interrupted rotation, called before any metadata
/// load at unlock time.
///
/// The registry salt tells the two cases apart: if it equals the salt in
/// the journal the commit point was reached and the publish phase is
/// re-run; otherwise the staging area is discarded and the original tree
/// (still under the old key) remains authoritative.
pub(crate) fn recover(store: &dyn ObjectStore, registry_salt: &[u8; SALT_LEN]) -> VaultResult<()> {
    let Some(journal) = RotationJournal::load(store)? else {
        return Ok(());
    };

    if journal.salt_matches(registry_salt) {
        log::warn!(
            "finishing interrupted credential rotation ({} item(s))",
            journal.ids.len()
        );
        publish(store, &journal)
    } else {
        log::warn!("discarding aborted credential rotation staging");
        discard_staging(store)
    }
}
