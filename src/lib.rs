//! # SecureVault Core
//!
//! Cryptographic core of an on-device encrypted file locker: files go in
//! under a master secret and come back out only for someone who has it.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    SECUREVAULT CORE                      │
//! │  ┌────────────┐  ┌─────────────┐  ┌──────────────────┐   │
//! │  │    KDF     │  │ AEAD CODEC  │  │  OBJECT STORE    │   │
//! │  │  Argon2id  │  │ AES-256-GCM │  │  atomic writes   │   │
//! │  └─────┬──────┘  └──────┬──────┘  └────────┬─────────┘   │
//! │        │                │                  │             │
//! │  ┌─────┴────────────────┴──────────────────┴──────────┐  │
//! │  │                   VAULT MANAGER                    │  │
//! │  │   session lifecycle · import/export · rotation     │  │
//! │  └────────────────────────┬───────────────────────────┘  │
//! │                           │                              │
//! │                ┌──────────┴───────────┐                  │
//! │                │ CREDENTIAL REGISTRY  │                  │
//! │                │ salt + verifiers     │                  │
//! │                │ (real and decoy)     │                  │
//! │                └──────────────────────┘                  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Model
//!
//! - Every payload and the per-identity metadata index are sealed in
//!   versioned AES-256-GCM envelopes; zero plaintext under the store root
//! - Data keys derive from the secret via Argon2id and exist only inside
//!   an unlocked session; buffers are zeroized on lock
//! - Credential verifiers are domain-separated from the data keys and
//!   compared in constant time
//! - An optional decoy secret opens an independent, separate corpus
//! - Secret rotation is a two-phase re-encryption of the whole corpus,
//!   recoverable from a crash at any point

pub mod biometric;
pub mod capture;
pub mod config;
pub mod crypto;
pub mod error;
pub mod item;
pub mod manager;
pub mod preview;
pub mod registry;
pub mod rotation;
pub mod session;
pub mod store;

pub use biometric::BiometricBroker;
pub use config::VaultConfig;
pub use crypto::{Kdf, KdfParams};
pub use error::{VaultError, VaultResult};
pub use item::{ItemId, VaultItem};
pub use manager::{ImportRequest, VaultManager, VaultState};
pub use preview::{NoPrivacy, PreviewGuard, ScreenPrivacy};
pub use registry::{Identity, LockType};
pub use rotation::{CancelFlag, OpControl};
pub use store::{FsStore, MemStore, ObjectStore};

/// SecureVault Core version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
