//! # Frame Stream
//!
//! Reads and writes the backup byte stream.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            STREAM LAYERS                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │   Header / Frame                                                        │
//! │        │  codec: tag + bincode, u32 BE length prefix                    │
//! │        ▼                                                                │
//! │   Unit bytes                                                            │
//! │        │  encrypted (optional): AES-256-GCM segments + digest trailer   │
//! │        ▼                                                                │
//! │   Buffered I/O                                                          │
//! │        │  counting: byte totals and SHA-256 of the raw file             │
//! │        ▼                                                                │
//! │   File                                                                  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod codec;
pub mod counting;
pub mod encrypted;
mod input;
mod output;

pub use input::{BackupInputStream, ReadFrame, ReadHeader};
pub use output::{BackupOutputStream, FrameSink, StreamSummary};

use crate::crypto::BackupKey;

/// How the stream bytes are protected
#[derive(Debug, Clone, Copy)]
pub enum StreamMode<'k> {
    /// Units written as-is
    Plaintext,
    /// Units wrapped in authenticated encryption under this key
    Encrypted(&'k BackupKey),
}
