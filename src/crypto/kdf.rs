//! # Stream Key Derivation
//!
//! HKDF-SHA256 expansion of the caller's [`BackupKey`] into the per-file
//! segment key and nonce prefix.

use hkdf::Hkdf;
use sha2::Sha256;

use super::keys::{BackupKey, SegmentKey};
use super::KEY_SIZE;
use crate::error::{Error, Result};

/// Bytes of the segment nonce that come from the key schedule.
pub const NONCE_PREFIX_SIZE: usize = 7;

/// Domain separation strings for HKDF
pub mod domain {
    /// Domain for the segment cipher key
    pub const STREAM_CIPHER: &[u8] = b"umbra-backup-stream-cipher-v1";

    /// Domain for the segment nonce prefix
    pub const STREAM_NONCE: &[u8] = b"umbra-backup-stream-nonce-v1";
}

/// Keys for one encrypted backup file
pub struct StreamKeys {
    /// AES-256-GCM key for every segment
    pub cipher_key: SegmentKey,
    /// Fixed leading bytes of every segment nonce
    pub nonce_prefix: [u8; NONCE_PREFIX_SIZE],
}

/// Derive the keys for one file
///
/// ```text
/// BackupKey ──HKDF(salt)──┬──► "umbra-backup-stream-cipher-v1" → cipher key
///                         └──► "umbra-backup-stream-nonce-v1"  → nonce prefix
/// ```
pub fn derive_stream_keys(backup_key: &BackupKey, salt: &[u8]) -> Result<StreamKeys> {
    let hkdf = Hkdf::<Sha256>::new(Some(salt), backup_key.as_bytes());

    let mut cipher_key = [0u8; KEY_SIZE];
    hkdf.expand(domain::STREAM_CIPHER, &mut cipher_key)
        .map_err(|_| Error::KeyDerivationFailed("Failed to derive stream cipher key".into()))?;

    let mut nonce_prefix = [0u8; NONCE_PREFIX_SIZE];
    hkdf.expand(domain::STREAM_NONCE, &mut nonce_prefix)
        .map_err(|_| Error::KeyDerivationFailed("Failed to derive nonce prefix".into()))?;

    Ok(StreamKeys {
        cipher_key: SegmentKey::from_bytes(cipher_key),
        nonce_prefix,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derivation_is_deterministic() {
        let key = BackupKey::from_bytes([1u8; 32]);
        let a = derive_stream_keys(&key, b"salt").unwrap();
        let b = derive_stream_keys(&key, b"salt").unwrap();
        assert_eq!(a.cipher_key.as_bytes(), b.cipher_key.as_bytes());
        assert_eq!(a.nonce_prefix, b.nonce_prefix);
    }

    #[test]
    fn test_salt_changes_keys() {
        let key = BackupKey::from_bytes([1u8; 32]);
        let a = derive_stream_keys(&key, b"salt-a").unwrap();
        let b = derive_stream_keys(&key, b"salt-b").unwrap();
        assert_ne!(a.cipher_key.as_bytes(), b.cipher_key.as_bytes());
    }

    #[test]
    fn test_cipher_key_and_prefix_are_independent() {
        let key = BackupKey::from_bytes([9u8; 32]);
        let keys = derive_stream_keys(&key, b"salt").unwrap();
        assert_ne!(&keys.cipher_key.as_bytes()[..NONCE_PREFIX_SIZE], &keys.nonce_prefix[..]);
    }
}
