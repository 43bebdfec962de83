//! # Archive Engine
//!
//! Export and import passes over the local database.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              EXPORT PASS                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  BackupArchiveManager ── write_pass ──► Store (one transaction)         │
//! │        │                                   │                            │
//! │        │ header                            │ rows, one at a time        │
//! │        ▼                                   ▼                            │
//! │  BackupOutputStream ◄── frames ── RecordArchiver (per family, in order) │
//! │                                            │                            │
//! │                            ArchiveResult ──┴──► ErrorCollapser          │
//! │                                                                         │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                              IMPORT PASS                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  drop indexes ─► read header ─► frame loop ─► rebuild ─► deferred ─► ✓  │
//! │                                    │                                    │
//! │                     ArchiverRegistry::for_family(frame.family())        │
//! │                                    │                                    │
//! │                 RestoreFrameResult ┴──► ErrorCollapser                  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Record problems are values ([`RestoreFrameResult`], [`ArchiveResult`]);
//! stream, storage and always-fatal failures are [`crate::Error`]s that roll
//! the whole pass back.

pub mod archivers;
pub mod bench;
pub mod collapser;
pub mod context;
pub mod errors;
pub mod indexes;
mod manager;
pub mod progress;
pub mod results;

pub use archivers::{ArchiverRegistry, RecordArchiver};
pub use bench::{BenchBucket, Bencher};
pub use collapser::{
    BackupErrorPresenter, CollapsedErrorLog, CollapsedErrors, ErrorCollapser,
    LoggingErrorPresenter, StoredErrorPresenter, StoredErrorReport,
};
pub use context::{
    ArchivingContext, BackupPurpose, CancellationToken, DeferredAction, LocalIdentifiers,
    RestoringContext,
};
pub use errors::{LogLevel, LoggableErrorAndProto, RecordError, RecordErrorKind};
pub use indexes::IndexSnapshot;
pub use manager::{
    BackupArchiveManager, BackupRestoreState, ExportedBackup, ImportSummary,
    MessagePipelineSupervisor, NoopPipelineSupervisor, PassKind, PassReport, PassState,
    SuspensionGuard, ValidationResult,
};
pub use progress::{ExportProgress, ImportPhase, ImportProgress, ProgressSink};
pub use results::{ArchiveResult, FamilyStats, RestoreFrameResult};
