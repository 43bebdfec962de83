//! Key material types.

use rand::RngCore;
use zeroize::ZeroizeOnDrop;

use super::KEY_SIZE;
use crate::error::{Error, Result};

/// Length of the media root key carried in the backup header.
pub const MEDIA_ROOT_KEY_SIZE: usize = 32;

/// Caller-supplied capability that unlocks an encrypted backup.
///
/// Zeroized when dropped. How the bytes are derived from account secrets
/// is up to the caller.
#[derive(ZeroizeOnDrop)]
pub struct BackupKey([u8; KEY_SIZE]);

impl BackupKey {
    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create from a slice, checking the length
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            Error::InvalidKey(format!(
                "Backup key must be {} bytes, got {}",
                KEY_SIZE,
                bytes.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    /// Generate a random backup key
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for BackupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BackupKey(..)")
    }
}

/// AES-256-GCM key for stream segments, derived per file.
#[derive(ZeroizeOnDrop)]
pub struct SegmentKey([u8; KEY_SIZE]);

impl SegmentKey {
    pub(crate) fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

/// Generate a fresh random media root key
pub fn generate_media_root_key() -> [u8; MEDIA_ROOT_KEY_SIZE] {
    let mut key = [0u8; MEDIA_ROOT_KEY_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}
