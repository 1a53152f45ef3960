//! SecureVault Core - Capture Intake
//!
//! The intruder-capture collaborator drops image payloads into an
//! unencrypted staging directory; the manager drains them through the
//! normal import path on the next real unlock. The window during which
//! staged captures sit in plaintext on disk is intrinsic to that design
//! and outside the core's control - intake only makes it as short as the
//! next unlock.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::VaultResult;

/// A staged capture payload awaiting import
pub struct PendingCapture {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
}

/// Scans the staging directory for capture payloads
pub struct CaptureIntake {
    dir: PathBuf,
}

impl CaptureIntake {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    /// Read every staged payload, oldest first.
    ///
    /// Unreadable entries are skipped rather than failing the unlock that
    /// triggered the drain.
    pub fn pending(&self) -> VaultResult<Vec<PendingCapture>> {
        let mut captures = Vec::new();

        if !self.dir.exists() {
            return Ok(captures);
        }

        let mut paths: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        paths.sort();

        for path in paths {
            match fs::read(&path) {
                Ok(bytes) => captures.push(PendingCapture { path, bytes }),
                Err(e) => log::warn!("skipping unreadable capture {}: {e}", path.display()),
            }
        }

        Ok(captures)
    }

    /// Remove a staged payload once it has been imported
    pub fn consume(&self, capture: &PendingCapture) -> VaultResult<()> {
        if capture.path.exists() {
            fs::remove_file(&capture.path)?;
        }
        Ok(())
    }
}
