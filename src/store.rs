//! SecureVault Core - Object Store
//!
//! A path-keyed byte store scoped to a private directory. The store never
//! sees plaintext; it moves opaque envelopes by logical name. Writes are
//! atomic (temp-write-then-rename) so a failed put leaves the prior
//! version intact.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::{VaultError, VaultResult};

/// Byte store keyed by logical name ("meta/real", "file/<id>", ...).
///
/// The vault manager takes this by injected handle: the filesystem store
/// in production, the in-memory store in tests.
pub trait ObjectStore: Send + Sync {
    /// Persist bytes under a logical name, atomically replacing any prior
    /// version.
    fn put(&self, name: &str, bytes: &[u8]) -> VaultResult<()>;

    /// Retrieve the bytes stored under a logical name.
    fn get(&self, name: &str) -> VaultResult<Vec<u8>>;

    /// Delete an object. Idempotent: deleting a missing name is not an
    /// error.
    fn delete(&self, name: &str) -> VaultResult<()>;

    /// List logical names under a prefix, in stable order.
    fn list(&self, prefix: &str) -> VaultResult<Vec<String>>;

    /// Recursively delete everything under the store root.
    fn wipe_tree(&self) -> VaultResult<()>;
}

/// Logical names are forward-slash paths of short safe segments; anything
/// else (traversal, empty segments, odd characters) is rejected before it
/// can touch the filesystem.
fn validate_name(name: &str) -> VaultResult<()> {
    let valid = !name.is_empty()
        && !name.starts_with('/')
        && !name.ends_with('/')
        && !name.ends_with(".tmp")
        && name.split('/').all(|seg| {
            !seg.is_empty()
                && seg != "."
                && seg != ".."
                && seg
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b == b'.')
        });

    if valid {
        Ok(())
    } else {
        Err(VaultError::ConstraintViolated(format!(
            "invalid object name: {name:?}"
        )))
    }
}

// ---------------------------------------------------------------------------
// Filesystem store
// ---------------------------------------------------------------------------

/// Object store rooted at a private application directory
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Open (creating if needed) a store rooted at `root`
    pub fn open(root: &Path) -> VaultResult<Self> {
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn full_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn collect_names(&self, dir: &Path, rel: &str, out: &mut Vec<String>) -> VaultResult<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let child_rel = if rel.is_empty() {
                name.to_string()
            } else {
                format!("{rel}/{name}")
            };

            if entry.path().is_dir() {
                self.collect_names(&entry.path(), &child_rel, out)?;
            } else if !name.ends_with(".tmp") {
                out.push(child_rel);
            }
        }
        Ok(())
    }
}

impl ObjectStore for FsStore {
    fn put(&self, name: &str, bytes: &[u8]) -> VaultResult<()> {
        validate_name(name)?;
        let path = self.full_path(name);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write to a temp sibling first, then rename over the target
        let temp_path = path.with_extension("tmp");
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;

        fs::rename(&temp_path, &path)?;
        Ok(())
    }

    fn get(&self, name: &str) -> VaultResult<Vec<u8>> {
        validate_name(name)?;
        let path = self.full_path(name);

        if !path.exists() {
            return Err(VaultError::NotFound(name.to_string()));
        }

        let mut file = File::open(&path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Ok(data)
    }

    fn delete(&self, name: &str) -> VaultResult<()> {
        validate_name(name)?;
        let path = self.full_path(name);

        if path.exists() {
            // Best-effort zero overwrite before unlinking
            if let Ok(metadata) = fs::metadata(&path) {
                let size = metadata.len() as usize;
                if size > 0 {
                    if let Ok(mut file) = OpenOptions::new().write(true).open(&path) {
                        let zeros = vec![0u8; size.min(1024 * 1024)];
                        let mut remaining = size;
                        while remaining > 0 {
                            let to_write = remaining.min(zeros.len());
                            if file.write_all(&zeros[..to_write]).is_err() {
                                break;
                            }
                            remaining -= to_write;
                        }
                        let _ = file.sync_all();
                    }
                }
            }

            fs::remove_file(&path)?;
        }

        Ok(())
    }

    fn list(&self, prefix: &str) -> VaultResult<Vec<String>> {
        let mut names = Vec::new();
        if self.root.exists() {
            self.collect_names(&self.root, "", &mut names)?;
        }
        names.retain(|n| n.starts_with(prefix));
        names.sort();
        Ok(names)
    }

    fn wipe_tree(&self) -> VaultResult<()> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root)?;
        }
        fs::create_dir_all(&self.root)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory store (tests)
// ---------------------------------------------------------------------------

/// In-memory object store for unit tests
#[derive(Default)]
pub struct MemStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ObjectStore for MemStore {
    fn put(&self, name: &str, bytes: &[u8]) -> VaultResult<()> {
        validate_name(name)?;
        self.objects
            .lock()
            .insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    fn get(&self, name: &str) -> VaultResult<Vec<u8>> {
        validate_name(name)?;
        self.objects
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| VaultError::NotFound(name.to_string()))
    }

    fn delete(&self, name: &str) -> VaultResult<()> {
        validate_name(name)?;
        self.objects.lock().remove(name);
        Ok(())
    }

    fn list(&self, prefix: &str) -> VaultResult<Vec<String>> {
        Ok(self
            .objects
            .lock()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn wipe_tree(&self) -> VaultResult<()> {
        self.objects.lock().clear();
        Ok(())
    }
}
