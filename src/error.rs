//! SecureVault Core - Error Types

use thiserror::Error;

/// Result type for vault operations
pub type VaultResult<T> = Result<T, VaultError>;

/// Vault error types
///
/// A closed taxonomy: every failure the core can surface is one of these
/// variants. `Crypto` deliberately carries no detail - callers must never
/// see (or log) ciphertext or partial plaintext from a failed decryption.
#[derive(Error, Debug)]
pub enum VaultError {
    // ═══════════════════════════════════════════════════════════════
    // CREDENTIAL / LIFECYCLE ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("vault is not initialized")]
    NotInitialized,

    #[error("vault is already initialized")]
    AlreadyInitialized,

    #[error("invalid credential")]
    InvalidCredential,

    #[error("vault is locked")]
    Locked,

    #[error("operation is not permitted from a decoy session")]
    DecoyForbidden,

    // ═══════════════════════════════════════════════════════════════
    // DATA ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("constraint violated: {0}")]
    ConstraintViolated(String),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("authentication failed - wrong key or corrupted envelope")]
    Crypto,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ═══════════════════════════════════════════════════════════════
    // CONTROL ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("operation cancelled")]
    Cancelled,
}
