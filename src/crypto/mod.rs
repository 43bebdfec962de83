//! # Cryptographic Module
//!
//! Primitives behind the encrypted backup stream.
//!
//! ## Key Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         BACKUP KEY HIERARCHY                            │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  BackupKey (32 bytes, opaque, supplied by the caller)                  │
//! │       │                                                                 │
//! │       │   salt = random 32 bytes, stored in the stream prelude          │
//! │       │                                                                 │
//! │       ├──► HKDF(info="umbra-backup-stream-cipher-v1") → SegmentKey     │
//! │       │                                                  (AES-256-GCM) │
//! │       └──► HKDF(info="umbra-backup-stream-nonce-v1")  → nonce prefix   │
//! │                                                          (7 bytes)     │
//! │                                                                         │
//! │  Segment nonce = prefix(7) ‖ counter(4, BE) ‖ final flag(1)            │
//! │                                                                         │
//! │  MediaRootKey (32 bytes, random) travels inside the backup header.     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A fresh salt per file means a fresh key per file, so the counter nonce
//! never repeats under one key.

mod encryption;
mod kdf;
mod keys;

pub use encryption::{open_segment, seal_segment, SegmentNonce, NONCE_SIZE, TAG_SIZE};
pub use kdf::{derive_stream_keys, StreamKeys, NONCE_PREFIX_SIZE};
pub use keys::{generate_media_root_key, BackupKey, SegmentKey, MEDIA_ROOT_KEY_SIZE};

/// Size of the symmetric keys in bytes (256 bits)
pub const KEY_SIZE: usize = 32;

/// Size of the random per-file salt
pub const SALT_SIZE: usize = 32;
