//! SecureVault Core - Configuration

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::crypto::kdf::KdfParams;

/// Default upper bound for a decoded metadata index (4 MiB)
pub const DEFAULT_MAX_INDEX_BYTES: usize = 4 * 1024 * 1024;

/// Vault configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Key-derivation cost parameters
    pub kdf: KdfParams,
    /// Reject metadata envelopes whose decoded plaintext exceeds this
    pub max_index_bytes: usize,
    /// Staging directory for externally produced capture payloads.
    /// Drained through the normal import path on the next real unlock.
    pub capture_dir: Option<PathBuf>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            kdf: KdfParams::default(),
            max_index_bytes: DEFAULT_MAX_INDEX_BYTES,
            capture_dir: None,
        }
    }
}
