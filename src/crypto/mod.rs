//! SecureVault Core - Cryptographic Primitives
//!
//! Key derivation, key material types, and the envelope codec.

pub mod aead;
pub mod kdf;
pub mod keys;

pub use aead::{open, seal, OVERHEAD};
pub use kdf::{Kdf, KdfParams};
pub use keys::{generate_salt, DataKey, VerifierHash, KEY_LEN, NONCE_LEN, SALT_LEN, VERIFIER_LEN};
