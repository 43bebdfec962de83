//! # Umbra Backup
//!
//! Export and import of the Umbra message database as a single framed,
//! optionally encrypted backup file.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        UMBRA BACKUP MODULES                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │                    ┌──────────────────────────┐                         │
//! │                    │  archive                 │                         │
//! │                    │  BackupArchiveManager    │                         │
//! │                    │  - one pass, one txn     │                         │
//! │                    │  - archivers per family  │                         │
//! │                    │  - errors, progress,     │                         │
//! │                    │    bench, indexes        │                         │
//! │                    └─────┬──────────────┬─────┘                         │
//! │                          │              │                               │
//! │             frames       │              │   rows                        │
//! │                          ▼              ▼                               │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐  ┌──────────────┐   │
//! │  │   proto     │◄─│   stream    │  │   storage   │  │    config    │   │
//! │  │             │  │             │  │             │  │              │   │
//! │  │ - Header    │  │ - Units     │  │ - SQLite    │  │ - Limits     │   │
//! │  │ - Frames    │  │ - Reader    │  │ - Schema    │  │ - Versions   │   │
//! │  │ - Records   │  │ - Writer    │  │ - Store     │  │ - UMBRA_*    │   │
//! │  └─────────────┘  └──────┬──────┘  └─────────────┘  └──────────────┘   │
//! │                          │                                              │
//! │                   ┌──────▼──────┐                                       │
//! │                   │   crypto    │                                       │
//! │                   │ - BackupKey │                                       │
//! │                   │ - HKDF      │                                       │
//! │                   │ - AES-GCM   │                                       │
//! │                   └─────────────┘                                       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error types for the entire library
//! - [`config`] - Pass configuration and environment overrides
//! - [`time`] - Wall and monotonic clocks
//! - [`crypto`] - Backup key, stream key derivation, segment encryption
//! - [`proto`] - Header, frame and record payload types
//! - [`stream`] - Length-delimited frame reader and writer
//! - [`storage`] - The SQLite database being backed up
//! - [`archive`] - Archivers and the pass orchestrator
//!
//! ## File Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           BACKUP FILE                                   │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Plaintext:  [len][header] [len][frame] [len][frame] ...                │
//! │                                                                         │
//! │  Encrypted:  UMBK │ format │ salt │ seg₀ │ seg₁ │ ... │ final segment   │
//! │              ─────────────────────  each segment AES-256-GCM sealed     │
//! │                                     final segment = SHA-256 of all      │
//! │                                     preceding ciphertext                │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod archive;
pub mod config;
pub mod crypto;
pub mod error;
pub mod proto;
pub mod storage;
pub mod stream;
/// Wall-clock and monotonic time utilities.
pub mod time;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use archive::{
    BackupArchiveManager, BackupPurpose, BackupRestoreState, CancellationToken, ExportedBackup,
    ImportSummary, LocalIdentifiers, MessagePipelineSupervisor, ProgressSink, ValidationResult,
};
pub use config::BackupConfig;
pub use crypto::BackupKey;
pub use error::{Error, Result};
pub use storage::Database;
pub use stream::StreamMode;

// ============================================================================
// VERSION INFO
// ============================================================================

/// Returns the version of Umbra Backup
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

// ============================================================================
// TEST SUPPORT
// ============================================================================


// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{seed_dataset, MemoryDb};

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }

    #[test]
    fn test_seed_dataset_row_counts() {
        let db = MemoryDb::new();
        let seeded = seed_dataset(&db.store());
        let store = db.store();
        assert_ne!(seeded.dm, seeded.team);
        assert!(store.contact(seeded.grace).unwrap().is_some());
        assert_eq!(
            store.thread(seeded.team).unwrap().unwrap().peer,
            storage::ThreadPeer::Group(seeded.group)
        );
        assert_eq!(store.count_rows("contacts").unwrap(), 1);
        assert_eq!(store.count_rows("threads").unwrap(), 2);
        assert_eq!(store.count_rows("interactions").unwrap(), 3);
        assert_eq!(store.count_rows("reactions").unwrap(), 1);
    }
}
