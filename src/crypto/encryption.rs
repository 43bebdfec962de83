//! # Segment Encryption
//!
//! AES-256-GCM over one stream segment. Nonces are deterministic
//! (prefix, counter, final flag) rather than random: a segment moved,
//! replayed or re-flagged decrypts under the wrong nonce and fails.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce as AesNonce,
};

use super::kdf::NONCE_PREFIX_SIZE;
use super::keys::SegmentKey;
use crate::error::{Error, Result};

/// Size of the AES-GCM nonce in bytes (96 bits)
pub const NONCE_SIZE: usize = 12;

/// Size of the AES-GCM authentication tag in bytes (128 bits)
pub const TAG_SIZE: usize = 16;

/// Nonce for one segment: `prefix(7) ‖ counter(4, BE) ‖ final(1)`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegmentNonce(pub [u8; NONCE_SIZE]);

impl SegmentNonce {
    /// Build the nonce for segment `counter`.
    pub fn new(prefix: &[u8; NONCE_PREFIX_SIZE], counter: u32, is_final: bool) -> Self {
        let mut bytes = [0u8; NONCE_SIZE];
        bytes[..NONCE_PREFIX_SIZE].copy_from_slice(prefix);
        bytes[NONCE_PREFIX_SIZE..NONCE_PREFIX_SIZE + 4].copy_from_slice(&counter.to_be_bytes());
        bytes[NONCE_SIZE - 1] = u8::from(is_final);
        Self(bytes)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }
}

/// Encrypt one segment; returns ciphertext with the tag appended.
pub fn seal_segment(
    key: &SegmentKey,
    nonce: &SegmentNonce,
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| Error::EncryptionFailed(format!("Invalid key: {}", e)))?;

    let payload = Payload {
        msg: plaintext,
        aad,
    };

    cipher
        .encrypt(AesNonce::from_slice(nonce.as_bytes()), payload)
        .map_err(|e| Error::EncryptionFailed(format!("Segment encryption failed: {}", e)))
}

/// Decrypt and authenticate one segment.
pub fn open_segment(
    key: &SegmentKey,
    nonce: &SegmentNonce,
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    if ciphertext.len() < TAG_SIZE {
        return Err(Error::DecryptionFailed("Segment shorter than tag".into()));
    }

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| Error::DecryptionFailed(format!("Invalid key: {}", e)))?;

    let payload = Payload {
        msg: ciphertext,
        aad,
    };

    cipher
        .decrypt(AesNonce::from_slice(nonce.as_bytes()), payload)
        .map_err(|_| Error::DecryptionFailed("Segment authentication failed".into()))
}
