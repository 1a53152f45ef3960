//! SecureVault Core - Session State
//!
//! The unlocked state is an explicit value with a clear lifecycle: built
//! by a successful unlock, mutated only by the vault manager, and dropped
//! (zeroizing the key) on lock, reset, rotation, and fatal errors. It is
//! never stored in a global.

use crate::crypto::keys::DataKey;
use crate::item::MetadataIndex;
use crate::registry::Identity;

/// An unlocked session: exactly one identity's key and index
pub struct Session {
    identity: Identity,
    key: DataKey,
    index: MetadataIndex,
}

impl Session {
    pub fn new(identity: Identity, key: DataKey, index: MetadataIndex) -> Self {
        Self {
            identity,
            key,
            index,
        }
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn key(&self) -> &DataKey {
        &self.key
    }

    pub fn index(&self) -> &MetadataIndex {
        &self.index
    }

    pub fn index_mut(&mut self) -> &mut MetadataIndex {
        &mut self.index
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("items", &self.index.len())
            .finish_non_exhaustive()
    }
}
