//! SecureVault Core - Envelope Codec
//!
//! On-disk envelope format:
//! ```text
//! [VERSION 1B][0x01]
//! [NONCE 12B][random]
//! [CIPHERTEXT variable][AES-256-GCM encrypted]
//! [TAG 16B][GCM auth tag]
//! ```
//!
//! The version byte doubles as the associated data, so a future format
//! bump invalidates old tags instead of being silently misparsed.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use zeroize::Zeroizing;

use crate::crypto::keys::{generate_nonce, DataKey, NONCE_LEN, TAG_LEN};
use crate::error::{VaultError, VaultResult};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Current envelope format version
const VERSION: u8 = 0x01;

/// Fixed envelope overhead: version + nonce + tag
pub const OVERHEAD: usize = 1 + NONCE_LEN + TAG_LEN;

/// Minimum valid envelope size (empty plaintext)
const MIN_ENVELOPE: usize = OVERHEAD;

// ---------------------------------------------------------------------------
// Seal / open
// ---------------------------------------------------------------------------

/// Encrypt a payload into a self-contained envelope.
///
/// Draws a fresh 96-bit nonce from the CSPRNG on every call and allocates
/// a new output buffer (plaintext length + [`OVERHEAD`]).
pub fn seal(key: &DataKey, plaintext: &[u8]) -> VaultResult<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key.expose()).map_err(|_| VaultError::Crypto)?;

    let nonce_bytes = generate_nonce();
    let nonce = Nonce::from_slice(&nonce_bytes);

    // AAD = the single version byte
    let payload = Payload {
        msg: plaintext,
        aad: &[VERSION],
    };

    // aes-gcm appends the tag, which lands it at the envelope tail
    let ciphertext = cipher
        .encrypt(nonce, payload)
        .map_err(|_| VaultError::Crypto)?;

    let mut envelope = Vec::with_capacity(plaintext.len() + OVERHEAD);
    envelope.push(VERSION);
    envelope.extend_from_slice(&nonce_bytes);
    envelope.extend_from_slice(&ciphertext);

    Ok(envelope)
}

/// Decrypt an envelope produced by [`seal`].
///
/// Any truncation, unknown version, or tag mismatch is the same
/// detail-free [`VaultError::Crypto`] - the signal for "wrong key or
/// corrupted envelope". The plaintext buffer zeroizes on drop.
pub fn open(key: &DataKey, envelope: &[u8]) -> VaultResult<Zeroizing<Vec<u8>>> {
    if envelope.len() < MIN_ENVELOPE {
        return Err(VaultError::Crypto);
    }

    let version = envelope[0];
    if version != VERSION {
        return Err(VaultError::Crypto);
    }

    let nonce = Nonce::from_slice(&envelope[1..1 + NONCE_LEN]);
    let ciphertext = &envelope[1 + NONCE_LEN..];

    let cipher = Aes256Gcm::new_from_slice(key.expose()).map_err(|_| VaultError::Crypto)?;

    let payload = Payload {
        msg: ciphertext,
        aad: &[version],
    };

    let plaintext = cipher
        .decrypt(nonce, payload)
        .map_err(|_| VaultError::Crypto)?;

    Ok(Zeroizing::new(plaintext))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> DataKey {
        DataKey::new([byte; 32])
    }

    #[test]
    fn roundtrip() {
        let k = key(0x42);
        let plaintext = b"deposited file payload";

        let envelope = seal(&k, plaintext).unwrap();
        assert_eq!(envelope.len(), plaintext.len() + OVERHEAD);
        assert_eq!(envelope[0], 0x01);

        let decrypted = open(&k, &envelope).unwrap();
        assert_eq!(&decrypted[..], plaintext);
    }

    #[test]
    fn empty_plaintext_roundtrip() {
        let k = key(0x42);
        let envelope = seal(&k, b"").unwrap();
        assert_eq!(envelope.len(), OVERHEAD);
        assert!(open(&k, &envelope).unwrap().is_empty());
    }

    #[test]
    fn nonces_never_repeat_across_seals() {
        let k = key(0x42);
        let a = seal(&k, b"same input").unwrap();
        let b = seal(&k, b"same input").unwrap();
        assert_ne!(a, b);
        assert_ne!(a[1..13], b[1..13]);
    }

    #[test]
    fn wrong_key_fails() {
        let envelope = seal(&key(0x01), b"secret").unwrap();
        assert!(matches!(
            open(&key(0x02), &envelope),
            Err(VaultError::Crypto)
        ));
    }

    #[test]
    fn every_flipped_bit_is_detected() {
        let k = key(0x42);
        let envelope = seal(&k, b"tamper target").unwrap();

        for i in 0..envelope.len() {
            let mut mangled = envelope.clone();
            mangled[i] ^= 0x01;
            assert!(
                matches!(open(&k, &mangled), Err(VaultError::Crypto)),
                "flip at offset {i} went undetected"
            );
        }
    }

    #[test]
    fn truncated_envelope_rejected() {
        let k = key(0x42);
        let envelope = seal(&k, b"short").unwrap();
        assert!(matches!(
            open(&k, &envelope[..OVERHEAD - 1]),
            Err(VaultError::Crypto)
        ));
        assert!(matches!(open(&k, b""), Err(VaultError::Crypto)));
    }

    #[test]
    fn unknown_version_rejected() {
        let k = key(0x42);
        let mut envelope = seal(&k, b"versioned").unwrap();
        envelope[0] = 0x02;
        assert!(matches!(open(&k, &envelope), Err(VaultError::Crypto)));
    }
}
