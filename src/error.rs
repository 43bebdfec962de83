//! # Error Handling
//!
//! Pass-level error types for the backup engine.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (pass-fatal, propagated with `?`)                               │
//! │  │                                                                      │
//! │  ├── Stream Errors (100-199)                                           │
//! │  │   ├── InvalidByteLengthDelimiter - Corrupt or truncated unit        │
//! │  │   ├── FrameTooLarge             - Unit above the size limit         │
//! │  │   ├── MacValidationFailed       - Tampered or unclosed file         │
//! │  │   ├── UnsupportedBackupVersion  - Header version not supported      │
//! │  │   └── InvalidMediaRootKey       - Header key has the wrong length   │
//! │  │                                                                      │
//! │  ├── Crypto Errors (200-299)                                           │
//! │  ├── Storage Errors (300-399)                                          │
//! │  │                                                                      │
//! │  ├── Index Errors (400-499)                                            │
//! │  │   ├── IndexDropFailed           - Pass-fatal                        │
//! │  │   └── IndexRebuildFailed        - Integrity at risk                 │
//! │  │                                                                      │
//! │  └── Pass Errors (500-599)                                             │
//! │      ├── AlreadyRestored           - Import guard tripped              │
//! │      ├── Cancelled                 - Cancelled between frames          │
//! │      └── FatalRecordFailure        - Always-fatal family failed        │
//! │                                                                         │
//! │  RecordError (archive::errors) is NOT part of this hierarchy: it is    │
//! │  accumulated per record, collapsed, and never propagated.              │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::proto::RecordFamily;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for backup passes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // ========================================================================
    // STREAM ERRORS
    // ========================================================================
    /// A length delimiter was truncated or declared more bytes than remain
    #[error("Invalid byte length delimiter")]
    InvalidByteLengthDelimiter,

    /// A unit declared a length above the configured maximum
    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Declared unit size
        size: usize,
        /// Configured maximum
        max: usize,
    },

    /// Authentication of the encrypted stream failed
    #[error("MAC validation failed: {0}")]
    MacValidationFailed(String),

    /// The encrypted prelude (magic, format, salt) is malformed
    #[error("Invalid encrypted stream prelude: {0}")]
    InvalidEncryptedPrelude(String),

    /// Header version is not in the supported set
    #[error("Unsupported backup version: {0}")]
    UnsupportedBackupVersion(u64),

    /// Header media root key has the wrong length
    #[error("Invalid media root key length: {0}")]
    InvalidMediaRootKey(usize),

    /// The stream ended, or held an empty unit, where the header belongs
    #[error("Backup stream has no header")]
    MissingHeader,

    /// The writer was already closed
    #[error("Backup stream already closed")]
    StreamClosed,

    /// Failed to encode a header or frame
    #[error("Frame serialization failed: {0}")]
    FrameSerialization(String),

    /// Failed to decode a header or frame
    #[error("Frame deserialization failed: {0}")]
    FrameDeserialization(String),

    // ========================================================================
    // CRYPTO ERRORS
    // ========================================================================
    /// Encryption operation failed
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption operation failed
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// Failed to derive stream keys
    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    /// Invalid key format or length
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    // ========================================================================
    // STORAGE ERRORS
    // ========================================================================
    /// Database error
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// No account row to export
    #[error("Account data not found")]
    AccountDataNotFound,

    // ========================================================================
    // INDEX ERRORS
    // ========================================================================
    /// Dropping a secondary index failed; the pass aborts
    #[error("Failed to drop index {index}: {reason}")]
    IndexDropFailed {
        /// Index name
        index: String,
        /// Underlying failure
        reason: String,
    },

    /// Rebuilding a dropped index failed; query correctness is at risk
    #[error("Failed to rebuild index {index}: {reason}")]
    IndexRebuildFailed {
        /// Index name
        index: String,
        /// Underlying failure
        reason: String,
    },

    // ========================================================================
    // PASS ERRORS
    // ========================================================================
    /// A backup has already been imported on this installation
    #[error("A backup has already been restored")]
    AlreadyRestored,

    /// The pass was cancelled between frames
    #[error("Backup pass cancelled")]
    Cancelled,

    /// A record in an always-fatal family failed
    #[error("Fatal failure in {family}: {reason}")]
    FatalRecordFailure {
        /// Family whose record failed
        family: RecordFamily,
        /// Description of the failure
        reason: String,
    },

    /// I/O on the backup file failed
    #[error("I/O error: {0}")]
    Io(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Internal error (bug)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get the error code for this error
    pub fn code(&self) -> i32 {
        match self {
            // Stream (100-199)
            Error::InvalidByteLengthDelimiter => 100,
            Error::FrameTooLarge { .. } => 101,
            Error::MacValidationFailed(_) => 102,
            Error::InvalidEncryptedPrelude(_) => 103,
            Error::UnsupportedBackupVersion(_) => 104,
            Error::InvalidMediaRootKey(_) => 105,
            Error::MissingHeader => 106,
            Error::StreamClosed => 107,
            Error::FrameSerialization(_) => 108,
            Error::FrameDeserialization(_) => 109,

            // Crypto (200-299)
            Error::EncryptionFailed(_) => 200,
            Error::DecryptionFailed(_) => 201,
            Error::KeyDerivationFailed(_) => 202,
            Error::InvalidKey(_) => 203,

            // Storage (300-399)
            Error::DatabaseError(_) => 300,
            Error::AccountDataNotFound => 301,

            // Index (400-499)
            Error::IndexDropFailed { .. } => 400,
            Error::IndexRebuildFailed { .. } => 401,

            // Pass (500-599)
            Error::AlreadyRestored => 500,
            Error::Cancelled => 501,
            Error::FatalRecordFailure { .. } => 502,
            Error::Io(_) => 503,
            Error::InvalidConfig(_) => 598,
            Error::Internal(_) => 599,
        }
    }

    /// Errors raised by the frame stream itself
    pub fn is_stream_error(&self) -> bool {
        (100..200).contains(&self.code()) || matches!(self, Error::Io(_))
    }

    /// Index rebuild failure: distinct from every record-level error
    pub fn is_integrity_at_risk(&self) -> bool {
        matches!(self, Error::IndexRebuildFailed { .. })
    }

    /// Check if the same pass may succeed when simply retried
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Cancelled | Error::Io(_))
    }
}

// ============================================================================
// CONVERSIONS
// ============================================================================

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::FrameSerialization(err.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::FrameDeserialization(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

// ============================================================================
// TESTS
// ============================================================================
