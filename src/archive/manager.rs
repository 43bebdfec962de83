//! # Backup Archive Manager
//!
//! Sequences one export or one import as a single database transaction.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          PASS STATE MACHINE                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Export:                                                                │
//! │  Idle ─► WritingHeader ─► ArchivingFamily(f₁) ─► … ─► Closing ─┐        │
//! │                                                                │        │
//! │  Import:                                                       ├─► Committed
//! │  Idle ─► ReadingHeader ─► RestoringFrame(1..n)                 │        │
//! │       ─► RebuildingIndexes ─► RunningDeferredActions ──────────┘        │
//! │                                                                         │
//! │  Any Err, from any state ──────────────────────────────────► RolledBack │
//! │                                                                         │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  SuspensionGuard   message pipeline paused for the whole pass           │
//! │  write_pass        BEGIN IMMEDIATE … COMMIT | ROLLBACK                  │
//! │  ErrorCollapser    every record error; presented once, after the pass   │
//! │  Bencher           per-bucket timing; logged once, after the pass       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Cancellation is checked between frames only. A cancelled pass rolls back
//! like any other failure.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::Connection;
use tempfile::NamedTempFile;

use super::archivers::ArchiverRegistry;
use super::bench::{BenchBucket, Bencher};
use super::collapser::{
    log_collapsed, present, BackupErrorPresenter, CollapsedErrorLog, CollapsedErrors,
    ErrorCollapser,
};
use super::context::{
    ArchivingContext, BackupPurpose, CancellationToken, LocalIdentifiers, RestoringContext,
};
use super::errors::{LoggableErrorAndProto, RecordError, RecordErrorKind};
use super::indexes;
use super::progress::{ExportProgress, ImportPhase, ImportProgress, ProgressSink};
use super::results::{ArchiveResult, RestoreFrameResult};
use crate::config::{BackupConfig, BACKUP_FORMAT_VERSION};
use crate::crypto::{generate_media_root_key, BackupKey, MEDIA_ROOT_KEY_SIZE};
use crate::error::{Error, Result};
use crate::proto::{BackupHeader, Frame, FrameItem, RecordFamily};
use crate::storage::{AccountRecord, Database, Store};
use crate::stream::{BackupInputStream, BackupOutputStream, StreamMode};
use crate::time::{now_timestamp_millis, SystemClock};

/// `key_value` collection for restore bookkeeping
const RESTORE_COLLECTION: &str = "backup_restore";

// ============================================================================
// MESSAGE PIPELINE
// ============================================================================

/// The part of the app that ingests incoming messages.
pub trait MessagePipelineSupervisor: Send + Sync {
    /// Stop writing to the database
    fn suspend(&self);
    /// Start writing again
    fn resume(&self);
}

/// Supervisor for hosts without a message pipeline.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPipelineSupervisor;

impl MessagePipelineSupervisor for NoopPipelineSupervisor {
    fn suspend(&self) {}
    fn resume(&self) {}
}

/// Keeps the pipeline suspended until dropped, on every exit path.
pub struct SuspensionGuard {
    supervisor: Arc<dyn MessagePipelineSupervisor>,
}

impl SuspensionGuard {
    /// Suspend `supervisor` now
    pub fn new(supervisor: Arc<dyn MessagePipelineSupervisor>) -> Self {
        tracing::debug!("Suspending message pipeline");
        supervisor.suspend();
        Self { supervisor }
    }
}

impl Drop for SuspensionGuard {
    fn drop(&mut self) {
        self.supervisor.resume();
        tracing::debug!("Resumed message pipeline");
    }
}

// ============================================================================
// PASS STATE
// ============================================================================

/// Where a pass is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassState {
    /// Not started
    Idle,
    /// Export: writing the header unit
    WritingHeader,
    /// Export: running one family's archiver
    ArchivingFamily(RecordFamily),
    /// Export: finishing the stream
    Closing,
    /// Import: reading and checking the header unit
    ReadingHeader,
    /// Import: restoring the n-th frame, 1-based
    RestoringFrame(u64),
    /// Import: replaying dropped index DDL
    RebuildingIndexes,
    /// Import: draining deferred actions
    RunningDeferredActions,
    /// The transaction committed
    Committed,
    /// The transaction rolled back
    RolledBack,
}

impl PassState {
    /// Whether the pass is over
    pub fn is_terminal(self) -> bool {
        matches!(self, PassState::Committed | PassState::RolledBack)
    }
}

/// Which operation a pass performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    /// `export_backup`
    Export,
    /// `import_backup`
    Import,
    /// `validate_backup`
    Validate,
}

struct PassTracker {
    kind: PassKind,
    state: PassState,
}

impl PassTracker {
    fn transition(&mut self, next: PassState) {
        let per_frame = matches!(
            (self.state, next),
            (PassState::RestoringFrame(_), PassState::RestoringFrame(_))
        );
        if !per_frame {
            tracing::debug!("{:?} pass: {:?} -> {:?}", self.kind, self.state, next);
        }
        self.state = next;
    }
}

/// Everything one pass accumulates. Fields are borrowed independently so an
/// archiving context can hold the bencher while errors are collected.
struct PassScope {
    tracker: PassTracker,
    collapser: ErrorCollapser,
    bencher: Bencher,
    started_at_ms: i64,
    frames_read: u64,
}

impl PassScope {
    fn new(kind: PassKind, config: &BackupConfig) -> Self {
        Self {
            tracker: PassTracker {
                kind,
                state: PassState::Idle,
            },
            collapser: ErrorCollapser::new(config.error_sample_limit),
            bencher: Bencher::new(
                Box::new(SystemClock::new()),
                Duration::from_millis(config.bench_warning_threshold_ms),
            ),
            started_at_ms: now_timestamp_millis(),
            frames_read: 0,
        }
    }
}

// ============================================================================
// PUBLIC RESULTS
// ============================================================================

/// Outcome of the most recent pass.
#[derive(Debug, Clone)]
pub struct PassReport {
    /// Which operation ran
    pub kind: PassKind,
    /// Whether it committed (or, for validation, would have)
    pub succeeded: bool,
    /// Terminal state
    pub final_state: PassState,
    /// Collapsed record errors
    pub errors: CollapsedErrors,
}

/// Whether this installation has already been restored from a backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupRestoreState {
    /// Never restored
    None,
    /// Restored; the app has not yet acknowledged it
    Unfinalized,
    /// Restored and acknowledged
    Finalized,
}

impl BackupRestoreState {
    const KEY: &'static str = "state";

    fn as_str(self) -> &'static str {
        match self {
            BackupRestoreState::None => "none",
            BackupRestoreState::Unfinalized => "unfinalized",
            BackupRestoreState::Finalized => "finalized",
        }
    }

    fn load(store: &Store<'_>) -> Result<Self> {
        match store.kv_get(RESTORE_COLLECTION, Self::KEY)?.as_deref() {
            None | Some("none") => Ok(BackupRestoreState::None),
            Some("unfinalized") => Ok(BackupRestoreState::Unfinalized),
            Some("finalized") => Ok(BackupRestoreState::Finalized),
            Some(other) => Err(Error::DatabaseError(format!(
                "Unknown restore state: {}",
                other
            ))),
        }
    }

    fn save(self, store: &Store<'_>) -> Result<()> {
        store.kv_set(RESTORE_COLLECTION, Self::KEY, self.as_str())
    }
}

/// A finished export, staged in a scratch file.
#[derive(Debug)]
pub struct ExportedBackup {
    /// The staged file; deleted when dropped unless persisted
    pub file: NamedTempFile,
    /// Bytes in the file
    pub byte_length: u64,
    /// Frames written, excluding the header
    pub frame_count: u64,
    /// SHA-256 of the file
    pub sha256: [u8; 32],
}

impl ExportedBackup {
    /// Location of the staged file
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Outcome of a committed import.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportSummary {
    /// Frame units read, including dropped ones
    pub frames_read: u64,
    /// Frames dropped by failures or as unrecognized
    pub frames_dropped: u64,
    /// Source bytes consumed, equal to the file size
    pub bytes_read: u64,
    /// Collapsed record errors
    pub errors: Vec<CollapsedErrorLog>,
}

/// Outcome of a dry-run import.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    /// Frame units read before the pass ended
    pub frames_read: u64,
    /// Whether an import of this file would commit
    pub succeeded: bool,
    /// Collapsed record errors
    pub errors: Vec<CollapsedErrorLog>,
    /// Purpose the file was validated for
    pub purpose: BackupPurpose,
}

// ============================================================================
// MANAGER
// ============================================================================

/// Runs export, import and validation passes against one database.
pub struct BackupArchiveManager {
    db: Database,
    config: BackupConfig,
    registry: ArchiverRegistry,
    supervisor: Arc<dyn MessagePipelineSupervisor>,
    presenter: Arc<dyn BackupErrorPresenter>,
    last_report: Mutex<Option<PassReport>>,
}

impl BackupArchiveManager {
    /// Create a manager; fails on an invalid config
    pub fn new(
        db: Database,
        config: BackupConfig,
        supervisor: Arc<dyn MessagePipelineSupervisor>,
        presenter: Arc<dyn BackupErrorPresenter>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            db,
            config,
            registry: ArchiverRegistry::new()?,
            supervisor,
            presenter,
            last_report: Mutex::new(None),
        })
    }

    /// The active configuration
    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    /// The report of the most recent pass, if any ran
    pub fn last_pass_report(&self) -> Option<PassReport> {
        self.last_report.lock().clone()
    }

    /// Current restore guard state
    pub fn restore_state(&self) -> Result<BackupRestoreState> {
        self.db.with_store(|store| BackupRestoreState::load(store))
    }

    /// Acknowledge a committed import.
    pub fn finalize_backup_import(&self) -> Result<()> {
        self.db.write_pass(|tx| {
            let store = Store::new(tx);
            match BackupRestoreState::load(&store)? {
                BackupRestoreState::Unfinalized => {
                    BackupRestoreState::Finalized.save(&store)?;
                    tracing::info!("Backup import finalized");
                    Ok(())
                }
                BackupRestoreState::Finalized => Ok(()),
                BackupRestoreState::None => {
                    Err(Error::Internal("No backup import to finalize".into()))
                }
            }
        })
    }

    // ------------------------------------------------------------------------
    // Export
    // ------------------------------------------------------------------------

    /// Export the database into a scratch file.
    pub fn export_backup(
        &self,
        identity: &LocalIdentifiers,
        mode: StreamMode<'_>,
        purpose: BackupPurpose,
        progress: Option<Arc<dyn ProgressSink>>,
        cancel: &CancellationToken,
    ) -> Result<ExportedBackup> {
        let _guard = SuspensionGuard::new(self.supervisor.clone());
        let mut scope = PassScope::new(PassKind::Export, &self.config);
        let mut export_progress = ExportProgress::disabled();
        tracing::info!("Starting {:?} export", purpose);

        let result = self.db.write_pass(|tx| {
            self.run_export(
                Store::new(tx),
                identity,
                mode,
                purpose,
                progress,
                cancel,
                &mut export_progress,
                &mut scope,
            )
        });
        if result.is_ok() {
            export_progress.complete();
        }

        let (exported, _) = self.finish_pass(scope, result, true)?;
        tracing::info!(
            "Export committed: {} frames, {} bytes",
            exported.frame_count,
            exported.byte_length
        );
        Ok(exported)
    }

    #[allow(clippy::too_many_arguments)]
    fn run_export(
        &self,
        store: Store<'_>,
        identity: &LocalIdentifiers,
        mode: StreamMode<'_>,
        purpose: BackupPurpose,
        progress_sink: Option<Arc<dyn ProgressSink>>,
        cancel: &CancellationToken,
        progress: &mut ExportProgress,
        scope: &mut PassScope,
    ) -> Result<ExportedBackup> {
        *progress = ExportProgress::start(&store, progress_sink)?;

        scope.tracker.transition(PassState::WritingHeader);
        let media_root_key = export_media_root_key(&store)?;
        let file = match &self.config.scratch_dir {
            Some(dir) => NamedTempFile::new_in(dir)?,
            None => NamedTempFile::new()?,
        };
        let mut output = BackupOutputStream::open(
            file,
            mode,
            self.config.max_unit_size,
            self.config.segment_size,
        )?;
        output.write_header(&BackupHeader {
            version: BACKUP_FORMAT_VERSION,
            created_at_ms: scope.started_at_ms.max(0) as u64,
            writer_app_version: self.config.current_app_version.clone(),
            first_ever_app_version: self.config.first_app_version.clone(),
            media_root_key,
        })?;
        progress.did_process_unit();

        {
            let mut ctx = ArchivingContext::new(
                store,
                &mut output,
                &mut scope.bencher,
                progress,
                purpose,
                identity,
                &self.config,
                scope.started_at_ms,
                cancel,
            );

            for archiver in self.registry.iter() {
                let family = archiver.family();
                scope.tracker.transition(PassState::ArchivingFamily(family));
                ctx.check_cancelled()?;

                match archiver.archive_all(&mut ctx)? {
                    ArchiveResult::Success(stats) => {
                        tracing::debug!("Archived {}: {:?}", family, stats);
                    }
                    ArchiveResult::PartialSuccess(stats, errors) => {
                        tracing::debug!(
                            "Archived {} with {} errors: {:?}",
                            family,
                            errors.len(),
                            stats
                        );
                        let any_dropped = errors.iter().any(|e| e.was_frame_dropped);
                        for entry in errors {
                            scope.collapser.push(entry);
                        }
                        if any_dropped && self.config.fail_on_any_frame_error {
                            return Err(Error::FatalRecordFailure {
                                family,
                                reason: "record dropped during export".into(),
                            });
                        }
                    }
                    ArchiveResult::CompleteFailure(entry) => {
                        let reason = entry.error.to_string();
                        scope.collapser.push(entry);
                        return Err(Error::FatalRecordFailure { family, reason });
                    }
                }
            }
        }

        scope.tracker.transition(PassState::Closing);
        let summary = output.close()?;
        summary.inner.as_file().sync_all()?;

        Ok(ExportedBackup {
            file: summary.inner,
            byte_length: summary.byte_length,
            frame_count: summary.frame_count,
            sha256: summary.sha256,
        })
    }

    // ------------------------------------------------------------------------
    // Import
    // ------------------------------------------------------------------------

    /// Restore the backup at `path` into the database.
    ///
    /// Either every accepted frame commits or nothing does. Fails with
    /// [`Error::AlreadyRestored`] if an earlier import committed.
    pub fn import_backup(
        &self,
        path: &Path,
        identity: &LocalIdentifiers,
        mode: StreamMode<'_>,
        progress: Option<Arc<dyn ProgressSink>>,
        cancel: &CancellationToken,
    ) -> Result<ImportSummary> {
        let _guard = SuspensionGuard::new(self.supervisor.clone());
        let mut scope = PassScope::new(PassKind::Import, &self.config);
        let mut import_progress: Option<ImportProgress> = None;
        tracing::info!("Starting import from {}", path.display());

        let result = self.db.write_pass(|tx| {
            let store = Store::new(tx);
            if BackupRestoreState::load(&store)? != BackupRestoreState::None {
                return Err(Error::AlreadyRestored);
            }

            let file = File::open(path)?;
            let total_bytes = file.metadata()?.len();
            let progress = import_progress.insert(ImportProgress::new(total_bytes, progress));
            let bytes_read =
                self.restore_stream(tx, file, identity, mode, cancel, progress, &mut scope)?;

            BackupRestoreState::Unfinalized.save(&store)?;
            Ok(bytes_read)
        });
        if result.is_ok() {
            if let Some(progress) = import_progress.as_mut() {
                progress.complete();
            }
        }

        let frames_read = scope.frames_read;
        let (bytes_read, errors) = self.finish_pass(scope, result, true)?;
        tracing::info!(
            "Import committed: {} frames, {} dropped",
            frames_read,
            errors.frames_dropped
        );
        Ok(ImportSummary {
            frames_read,
            frames_dropped: errors.frames_dropped,
            bytes_read,
            errors: errors.groups,
        })
    }

    /// Dry-run an import against a scratch database of the same schema.
    ///
    /// Stream failures are `Err`. A file that would be rejected for its
    /// records is `Ok` with `succeeded == false`.
    pub fn validate_backup(
        &self,
        path: &Path,
        identity: &LocalIdentifiers,
        mode: StreamMode<'_>,
        purpose: BackupPurpose,
    ) -> Result<ValidationResult> {
        let mut scope = PassScope::new(PassKind::Validate, &self.config);
        tracing::info!("Validating {} for {:?}", path.display(), purpose);

        let scratch = Database::open_blocking(None)?;
        let result = scratch.with_connection(|conn| {
            let tx = conn.unchecked_transaction()?;
            let file = File::open(path)?;
            let mut progress = ImportProgress::new(file.metadata()?.len(), None);
            let cancel = CancellationToken::new();
            self.restore_stream(&tx, file, identity, mode, &cancel, &mut progress, &mut scope)
        });

        let frames_read = scope.frames_read;
        match self.finish_pass(scope, result, false) {
            Ok((_, errors)) => Ok(ValidationResult {
                frames_read,
                succeeded: true,
                errors: errors.groups,
                purpose,
            }),
            Err(Error::FatalRecordFailure { .. }) => Ok(ValidationResult {
                frames_read,
                succeeded: false,
                errors: self
                    .last_pass_report()
                    .map(|report| report.errors.groups)
                    .unwrap_or_default(),
                purpose,
            }),
            Err(e) => Err(e),
        }
    }

    /// The import pipeline, shared by import and validation.
    #[allow(clippy::too_many_arguments)]
    fn restore_stream(
        &self,
        conn: &Connection,
        file: File,
        identity: &LocalIdentifiers,
        mode: StreamMode<'_>,
        cancel: &CancellationToken,
        progress: &mut ImportProgress,
        scope: &mut PassScope,
    ) -> Result<u64> {
        let store = Store::new(conn);

        scope.tracker.transition(PassState::ReadingHeader);
        let mut input = BackupInputStream::open(file, mode, self.config.max_unit_size)?;
        let read = input.read_header()?;
        progress.did_read_bytes(read.bytes_consumed);
        let header = read.header;
        check_header(&self.config, &header)?;

        let mut snapshots = Vec::new();
        for table in &self.config.restore_index_tables {
            let dropped = scope.bencher.bench_action("drop_indexes", || {
                indexes::drop_all_secondary_indexes(conn, table)
            })?;
            snapshots.extend(dropped);
        }

        let mut ctx = RestoringContext::new(store, identity, scope.started_at_ms);
        let mut more_data_available = read.more_data_available;
        while more_data_available {
            cancel.check()?;

            let read = match input.read_frame() {
                Ok(read) => read,
                Err(Error::FrameDeserialization(reason)) => {
                    scope.frames_read += 1;
                    let error = RecordError::new(
                        RecordErrorKind::UndecodableFrame(reason),
                        RecordFamily::Unknown,
                        format!("frame:{}", scope.frames_read),
                    );
                    self.record_dropped_frame(scope, vec![error], None)?;
                    continue;
                }
                Err(e) => return Err(e),
            };
            progress.did_read_bytes(read.bytes_consumed);
            more_data_available = read.more_data_available;

            let Some(frame) = read.frame else {
                break;
            };
            scope.frames_read += 1;
            scope
                .tracker
                .transition(PassState::RestoringFrame(scope.frames_read));
            self.restore_frame(&mut ctx, frame, scope)?;
        }
        progress.did_read_bytes(input.drain()?);

        scope.tracker.transition(PassState::RebuildingIndexes);
        progress.enter_phase(ImportPhase::RebuildingIndexes);
        if let Err(e) = scope
            .bencher
            .bench_action("rebuild_indexes", || indexes::recreate_indexes(conn, &snapshots))
        {
            scope
                .collapser
                .push(LoggableErrorAndProto::integrity_at_risk(RecordError::new(
                    RecordErrorKind::IntegrityAtRisk(e.to_string()),
                    RecordFamily::Unknown,
                    "indexes",
                )));
            return Err(e);
        }

        scope.tracker.transition(PassState::RunningDeferredActions);
        progress.enter_phase(ImportPhase::DeferredActions);
        let now_ms = now_timestamp_millis();
        let actions = ctx.deferred.drain();
        tracing::debug!("Running {} deferred actions", actions.len());
        for action in actions {
            let outcome = scope
                .bencher
                .bench_action(action.name(), || action.run(&store, now_ms));
            if let Err(e) = outcome {
                scope
                    .collapser
                    .push(LoggableErrorAndProto::deferred(RecordError::new(
                        RecordErrorKind::DeferredActionFailed {
                            action: action.name(),
                            reason: e.to_string(),
                        },
                        action.family(),
                        action.id_log_string(),
                    )));
            }
        }

        if store.account()?.is_some() {
            store.set_media_root_key(&header.media_root_key)?;
        }
        store.kv_set(
            RESTORE_COLLECTION,
            "writer_app_version",
            &header.writer_app_version,
        )?;
        store.kv_set(
            RESTORE_COLLECTION,
            "first_ever_app_version",
            &header.first_ever_app_version,
        )?;

        Ok(input.bytes_consumed_total())
    }

    fn restore_frame(
        &self,
        ctx: &mut RestoringContext<'_>,
        frame: Frame,
        scope: &mut PassScope,
    ) -> Result<()> {
        let family = frame.family();
        let dispatch = frame
            .item
            .as_ref()
            .and_then(|item| Some((item, self.registry.for_family(family)?)));
        let Some((item, archiver)) = dispatch else {
            let id = frame
                .item
                .as_ref()
                .map(FrameItem::id_log_string)
                .unwrap_or_else(|| format!("frame:{}", scope.frames_read));
            scope.collapser.push(LoggableErrorAndProto::unrecognized(
                RecordError::new(RecordErrorKind::UnrecognizedFrame, family, id),
                Some(frame),
            ));
            return Ok(());
        };

        let subtype = archiver.bench_subtype(item);
        let timer = scope.bencher.start();
        let result = archiver.restore(item, ctx);
        scope.bencher.record_frame(BenchBucket { family, subtype }, timer);

        match result {
            RestoreFrameResult::Success(()) => Ok(()),
            RestoreFrameResult::PartialRestore((), errors) => {
                let mut offending = Some(frame);
                for error in errors {
                    scope
                        .collapser
                        .push(LoggableErrorAndProto::partial(error, offending.take()));
                }
                Ok(())
            }
            RestoreFrameResult::UnrecognizedEnum(error) => {
                scope
                    .collapser
                    .push(LoggableErrorAndProto::unrecognized(error, Some(frame)));
                Ok(())
            }
            RestoreFrameResult::Failure(errors) => {
                self.record_dropped_frame(scope, errors, Some(frame))
            }
        }
    }

    /// Collect a dropped frame. The first error carries the drop; the rest
    /// share its level without counting the frame again.
    fn record_dropped_frame(
        &self,
        scope: &mut PassScope,
        errors: Vec<RecordError>,
        frame: Option<Frame>,
    ) -> Result<()> {
        let mut errors = errors.into_iter();
        let Some(first) = errors.next() else {
            return Ok(());
        };
        let family = first.family;
        let reason = first.to_string();
        let entry = LoggableErrorAndProto::dropped(first, frame);
        let level = entry.level;
        scope.collapser.push(entry);
        for error in errors {
            scope.collapser.push(LoggableErrorAndProto {
                error,
                level,
                was_frame_dropped: false,
                offending_frame: None,
            });
        }

        if family.is_always_fatal() || self.config.fail_on_any_frame_error {
            return Err(Error::FatalRecordFailure { family, reason });
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Pass bookkeeping
    // ------------------------------------------------------------------------

    fn finish_pass<T>(
        &self,
        mut scope: PassScope,
        result: Result<T>,
        present_errors: bool,
    ) -> Result<(T, CollapsedErrors)> {
        match &result {
            Ok(_) => scope.tracker.transition(PassState::Committed),
            Err(e) => {
                scope.collapser.mark_failed();
                tracing::error!(
                    "{:?} pass rolled back in {:?}: {}",
                    scope.tracker.kind,
                    scope.tracker.state,
                    e
                );
                scope.tracker.transition(PassState::RolledBack);
            }
        }

        let verbose = cfg!(feature = "verbose-logging") || self.config.detailed_bench_logging;
        if verbose || scope.bencher.slow_buckets() > 0 {
            scope.bencher.log_results();
        }

        let PassTracker { kind, state } = scope.tracker;
        let errors = scope.collapser.finish();
        if present_errors {
            present(self.presenter.as_ref(), &errors);
        } else {
            log_collapsed(&errors);
        }

        *self.last_report.lock() = Some(PassReport {
            kind,
            succeeded: result.is_ok(),
            final_state: state,
            errors: errors.clone(),
        });
        result.map(|value| (value, errors))
    }

    // ------------------------------------------------------------------------
    // Async entry points
    // ------------------------------------------------------------------------

    /// [`export_backup`](Self::export_backup) on the blocking pool
    pub async fn export_backup_async(
        self: Arc<Self>,
        identity: LocalIdentifiers,
        key: Option<BackupKey>,
        purpose: BackupPurpose,
        progress: Option<Arc<dyn ProgressSink>>,
        cancel: CancellationToken,
    ) -> Result<ExportedBackup> {
        run_blocking(move || {
            self.export_backup(&identity, stream_mode(key.as_ref()), purpose, progress, &cancel)
        })
        .await
    }

    /// [`import_backup`](Self::import_backup) on the blocking pool
    pub async fn import_backup_async(
        self: Arc<Self>,
        path: PathBuf,
        identity: LocalIdentifiers,
        key: Option<BackupKey>,
        progress: Option<Arc<dyn ProgressSink>>,
        cancel: CancellationToken,
    ) -> Result<ImportSummary> {
        run_blocking(move || {
            self.import_backup(&path, &identity, stream_mode(key.as_ref()), progress, &cancel)
        })
        .await
    }

    /// [`validate_backup`](Self::validate_backup) on the blocking pool
    pub async fn validate_backup_async(
        self: Arc<Self>,
        path: PathBuf,
        identity: LocalIdentifiers,
        key: Option<BackupKey>,
        purpose: BackupPurpose,
    ) -> Result<ValidationResult> {
        run_blocking(move || {
            self.validate_backup(&path, &identity, stream_mode(key.as_ref()), purpose)
        })
        .await
    }
}

fn stream_mode(key: Option<&BackupKey>) -> StreamMode<'_> {
    key.map_or(StreamMode::Plaintext, StreamMode::Encrypted)
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Internal(format!("Backup task failed: {}", e)))?
}

/// Version first, then the media root key.
fn check_header(config: &BackupConfig, header: &BackupHeader) -> Result<()> {
    if !config.supports_version(header.version) {
        return Err(Error::UnsupportedBackupVersion(header.version));
    }
    if header.media_root_key.len() != MEDIA_ROOT_KEY_SIZE {
        return Err(Error::InvalidMediaRootKey(header.media_root_key.len()));
    }
    tracing::info!(
        "Backup version {} written by {}",
        header.version,
        header.writer_app_version
    );
    Ok(())
}

/// The account's media root key, minted and stored on first export.
fn export_media_root_key(store: &Store<'_>) -> Result<Vec<u8>> {
    match store.account()? {
        Some(AccountRecord {
            media_root_key: Some(key),
            ..
        }) if key.len() == MEDIA_ROOT_KEY_SIZE => Ok(key),
        Some(_) => {
            let key = generate_media_root_key().to_vec();
            store.set_media_root_key(&key)?;
            tracing::info!("Generated media root key");
            Ok(key)
        }
        None => Ok(generate_media_root_key().to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::errors::LogLevel;
    use crate::archive::StoredErrorPresenter;
    use crate::proto::{
        ChatItemDirection, ChatItemKind, ChatItemProto, ChatProto, ContactProto, GroupProto,
        IncomingDetails, RecipientDestination, RecipientProto, StandardMessageProto,
    };
    use crate::storage::{AuthorRef, InteractionRecord};
    use crate::stream::{codec, FrameSink};
    use crate::test_support::{identity, init_test_logging, message, seed_dataset};
    use std::io::{Read, Write};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const MAX: usize = 1024 * 1024;
    const SEG: usize = 4096;

    #[derive(Default)]
    struct CountingSupervisor {
        suspended: AtomicUsize,
        resumed: AtomicUsize,
    }

    impl MessagePipelineSupervisor for CountingSupervisor {
        fn suspend(&self) {
            self.suspended.fetch_add(1, Ordering::SeqCst);
        }
        fn resume(&self) {
            self.resumed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct RecordingPresenter {
        reports: Mutex<Vec<(Vec<CollapsedErrorLog>, bool)>>,
    }

    impl BackupErrorPresenter for RecordingPresenter {
        fn persist_errors(&self, errors: &[CollapsedErrorLog], did_fail: bool) -> Result<()> {
            self.reports.lock().push((errors.to_vec(), did_fail));
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        seen: Mutex<Vec<f64>>,
    }

    impl ProgressSink for RecordingSink {
        fn update(&self, fraction: f64) {
            self.seen.lock().push(fraction);
        }
    }

    struct Harness {
        db: Database,
        manager: BackupArchiveManager,
        presenter: Arc<RecordingPresenter>,
        supervisor: Arc<CountingSupervisor>,
    }

    fn harness_with(config: BackupConfig) -> Harness {
        init_test_logging();
        let db = Database::open_blocking(None).unwrap();
        let presenter = Arc::new(RecordingPresenter::default());
        let supervisor = Arc::new(CountingSupervisor::default());
        let manager =
            BackupArchiveManager::new(db.clone(), config, supervisor.clone(), presenter.clone())
                .unwrap();
        Harness {
            db,
            manager,
            presenter,
            supervisor,
        }
    }

    fn harness() -> Harness {
        harness_with(BackupConfig::default())
    }

    fn seeded() -> Harness {
        seeded_with(BackupConfig::default())
    }

    fn seeded_with(config: BackupConfig) -> Harness {
        let h = harness_with(config);
        h.db.with_store(|store| {
            seed_dataset(store);
            Ok(())
        })
        .unwrap();
        h
    }

    fn count(db: &Database, table: &str) -> u64 {
        db.with_store(|store| store.count_rows(table)).unwrap()
    }

    fn header() -> BackupHeader {
        BackupHeader {
            version: BACKUP_FORMAT_VERSION,
            created_at_ms: 1_700_000_000_000,
            writer_app_version: "9.9.9".into(),
            first_ever_app_version: "1.0.0".into(),
            media_root_key: vec![6; MEDIA_ROOT_KEY_SIZE],
        }
    }

    fn write_backup(header: &BackupHeader, frames: &[Frame]) -> NamedTempFile {
        let file = NamedTempFile::new().unwrap();
        let mut output = BackupOutputStream::open(file, StreamMode::Plaintext, MAX, SEG).unwrap();
        output.write_header(header).unwrap();
        for frame in frames {
            output.write_frame(frame).unwrap();
        }
        output.close().unwrap().inner
    }

    fn write_units(units: &[Vec<u8>]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for unit in units {
            codec::write_unit(&mut file, unit, MAX).unwrap();
        }
        file.flush().unwrap();
        file
    }

    fn import(h: &Harness, path: &Path) -> Result<ImportSummary> {
        h.manager.import_backup(
            path,
            &identity(),
            StreamMode::Plaintext,
            None,
            &CancellationToken::new(),
        )
    }

    fn export(h: &Harness, purpose: BackupPurpose) -> ExportedBackup {
        h.manager
            .export_backup(
                &identity(),
                StreamMode::Plaintext,
                purpose,
                None,
                &CancellationToken::new(),
            )
            .unwrap()
    }

    fn self_recipient(id: u64) -> Frame {
        Frame::new(FrameItem::Recipient(RecipientProto {
            id,
            destination: RecipientDestination::SelfRecipient.code(),
            ..Default::default()
        }))
    }

    fn contact_recipient(id: u64, contact: ContactProto) -> Frame {
        Frame::new(FrameItem::Recipient(RecipientProto {
            id,
            destination: RecipientDestination::Contact.code(),
            contact: Some(contact),
            ..Default::default()
        }))
    }

    fn group_recipient(id: u64) -> Frame {
        Frame::new(FrameItem::Recipient(RecipientProto {
            id,
            destination: RecipientDestination::Group.code(),
            group: Some(GroupProto {
                master_key: vec![4; 32],
                title: "Team".into(),
                ..Default::default()
            }),
            ..Default::default()
        }))
    }

    fn chat(id: u64, recipient_id: u64) -> Frame {
        Frame::new(FrameItem::Chat(ChatProto {
            id,
            recipient_id,
            ..Default::default()
        }))
    }

    fn outgoing(chat_id: u64, author_id: u64, sent: u64) -> Frame {
        Frame::new(FrameItem::ChatItem(ChatItemProto {
            chat_id,
            author_id,
            date_sent_ms: sent,
            direction: ChatItemDirection::Outgoing.code(),
            item: ChatItemKind::Standard.code(),
            standard: Some(StandardMessageProto {
                body: Some(format!("message {}", sent)),
                ..Default::default()
            }),
            ..Default::default()
        }))
    }

    fn incoming(chat_id: u64, author_id: u64, sent: u64) -> Frame {
        Frame::new(FrameItem::ChatItem(ChatItemProto {
            chat_id,
            author_id,
            date_sent_ms: sent,
            direction: ChatItemDirection::Incoming.code(),
            incoming: Some(IncomingDetails {
                date_received_ms: sent + 10,
                read: false,
            }),
            item: ChatItemKind::Standard.code(),
            standard: Some(StandardMessageProto {
                body: Some(format!("message {}", sent)),
                ..Default::default()
            }),
            ..Default::default()
        }))
    }

    fn grace() -> ContactProto {
        ContactProto {
            e164: Some(15550001),
            given_name: Some("Grace".into()),
            ..Default::default()
        }
    }

    /// Three recipients, two chats, five items; one item has an unknown author.
    fn mixed_frames() -> Vec<Frame> {
        vec![
            self_recipient(1),
            contact_recipient(2, grace()),
            group_recipient(3),
            chat(10, 2),
            chat(11, 3),
            outgoing(10, 1, 1_000),
            incoming(10, 2, 2_000),
            outgoing(10, 1, 3_000),
            outgoing(11, 1, 4_000),
            outgoing(11, 999, 5_000),
        ]
    }

    #[test]
    fn test_import_collects_unknown_author_and_commits() {
        let h = harness();
        let file = write_backup(&header(), &mixed_frames());

        let summary = import(&h, file.path()).unwrap();
        assert_eq!(summary.frames_read, 10);
        assert_eq!(summary.frames_dropped, 1);
        assert_eq!(summary.bytes_read, file.as_file().metadata().unwrap().len());
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].family, RecordFamily::ChatItem);
        assert_eq!(summary.errors[0].kind, "unknown_recipient");
        assert_eq!(summary.errors[0].count, 1);

        assert_eq!(count(&h.db, "contacts"), 1);
        assert_eq!(count(&h.db, "chat_groups"), 1);
        assert_eq!(count(&h.db, "threads"), 2);
        assert_eq!(count(&h.db, "interactions"), 4);

        let report = h.manager.last_pass_report().unwrap();
        assert!(report.succeeded);
        assert!(!report.errors.did_fail);
        assert_eq!(report.final_state, PassState::Committed);
        assert_eq!(h.manager.restore_state().unwrap(), BackupRestoreState::Unfinalized);

        let presented = h.presenter.reports.lock();
        assert_eq!(presented.len(), 1);
        assert!(!presented[0].1);
    }

    #[test]
    fn test_import_runs_deferred_thread_recompute() {
        let h = harness();
        let file = write_backup(&header(), &mixed_frames());
        import(&h, file.path()).unwrap();

        let unread: i64 = h
            .db
            .with_connection(|conn| {
                Ok(conn.query_row(
                    "SELECT unread_count FROM threads WHERE contact_id IS NOT NULL",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(unread, 1);
    }

    #[test]
    fn test_failed_deferred_action_does_not_skip_the_rest() {
        let h = harness();
        h.db.with_connection(|conn| {
            conn.execute_batch(
                "CREATE TRIGGER contact_threads_locked BEFORE UPDATE ON threads
                 WHEN OLD.contact_id IS NOT NULL
                 BEGIN SELECT RAISE(ABORT, 'thread locked'); END;",
            )?;
            Ok(())
        })
        .unwrap();
        let file = write_backup(&header(), &mixed_frames());

        let summary = import(&h, file.path()).unwrap();
        let failed: Vec<_> = summary
            .errors
            .iter()
            .filter(|e| e.kind == "deferred_action_failed")
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].family, RecordFamily::Chat);
        assert_eq!(failed[0].max_level, LogLevel::Error);
        assert_eq!(failed[0].count, 1);
        assert!(!failed[0].was_frame_dropped);

        // The contact thread is queued first; the group thread still ran.
        let group_last: Option<i64> = h
            .db
            .with_connection(|conn| {
                Ok(conn.query_row(
                    "SELECT last_interaction_id FROM threads WHERE group_id IS NOT NULL",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert!(group_last.is_some());
        assert_eq!(h.manager.last_pass_report().unwrap().final_state, PassState::Committed);
    }

    #[test]
    fn test_failed_index_rebuild_rolls_back_and_presents_fault() {
        let h = harness();
        h.db.with_connection(|conn| {
            conn.execute_batch(
                "CREATE UNIQUE INDEX idx_interactions_sent_once
                 ON interactions (thread_id, sent_at_ms);",
            )?;
            Ok(())
        })
        .unwrap();
        let file = write_backup(
            &header(),
            &[
                self_recipient(1),
                contact_recipient(2, grace()),
                chat(10, 2),
                outgoing(10, 1, 1_000),
                outgoing(10, 1, 1_000),
            ],
        );

        let result = import(&h, file.path());
        assert!(matches!(result, Err(Error::IndexRebuildFailed { ref index, .. })
            if index == "idx_interactions_sent_once"));
        assert_eq!(count(&h.db, "interactions"), 0);
        assert_eq!(count(&h.db, "contacts"), 0);
        assert_eq!(h.manager.restore_state().unwrap(), BackupRestoreState::None);
        let indexes = h
            .db
            .with_connection(|conn| indexes::list_indexes(conn, "interactions"))
            .unwrap();
        assert!(indexes.iter().any(|i| i.index_name == "idx_interactions_sent_once"));

        let report = h.manager.last_pass_report().unwrap();
        assert_eq!(report.final_state, PassState::RolledBack);
        let presented = h.presenter.reports.lock();
        assert_eq!(presented.len(), 1);
        let (groups, did_fail) = &presented[0];
        assert!(*did_fail);
        let alert = groups
            .iter()
            .find(|g| g.kind == "integrity_at_risk")
            .unwrap();
        assert_eq!(alert.max_level, LogLevel::Fault);
        assert_eq!(alert.family, RecordFamily::Unknown);
    }

    #[test]
    fn test_import_restores_indexes_and_records_provenance() {
        let h = harness();
        let before = h
            .db
            .with_connection(|conn| indexes::list_indexes(conn, "interactions"))
            .unwrap();
        let file = write_backup(&header(), &mixed_frames());
        import(&h, file.path()).unwrap();

        let after = h
            .db
            .with_connection(|conn| indexes::list_indexes(conn, "interactions"))
            .unwrap();
        assert_eq!(before, after);
        assert_eq!(
            h.db.with_store(|s| s.kv_get(RESTORE_COLLECTION, "writer_app_version"))
                .unwrap()
                .as_deref(),
            Some("9.9.9")
        );
    }

    #[test]
    fn test_second_import_is_refused() {
        let h = harness();
        let file = write_backup(&header(), &mixed_frames());
        import(&h, file.path()).unwrap();

        assert_eq!(import(&h, file.path()), Err(Error::AlreadyRestored));
        assert_eq!(count(&h.db, "interactions"), 4);

        h.manager.finalize_backup_import().unwrap();
        assert_eq!(h.manager.restore_state().unwrap(), BackupRestoreState::Finalized);
        assert_eq!(import(&h, file.path()), Err(Error::AlreadyRestored));
    }

    #[test]
    fn test_finalize_without_import_fails() {
        let h = harness();
        assert!(matches!(
            h.manager.finalize_backup_import(),
            Err(Error::Internal(_))
        ));
    }

    #[test]
    fn test_always_fatal_account_failure_rolls_back() {
        let h = harness();
        let bad_account = Frame::new(FrameItem::Account(crate::proto::AccountDataProto {
            profile_key: vec![1; 5],
            given_name: "Ada".into(),
            ..Default::default()
        }));
        let file = write_backup(
            &header(),
            &[self_recipient(1), contact_recipient(2, grace()), bad_account],
        );

        let result = import(&h, file.path());
        assert!(matches!(
            result,
            Err(Error::FatalRecordFailure {
                family: RecordFamily::AccountData,
                ..
            })
        ));
        assert_eq!(count(&h.db, "contacts"), 0);
        assert_eq!(h.manager.restore_state().unwrap(), BackupRestoreState::None);

        let report = h.manager.last_pass_report().unwrap();
        assert!(!report.succeeded);
        assert_eq!(report.final_state, PassState::RolledBack);
        let presented = h.presenter.reports.lock();
        assert!(presented[0].1);
        assert_eq!(presented[0].0[0].max_level, LogLevel::Fault);
    }

    #[test]
    fn test_stored_presenter_survives_rollback() {
        let db = Database::open_blocking(None).unwrap();
        let presenter = Arc::new(StoredErrorPresenter::new(db.clone()));
        let manager = BackupArchiveManager::new(
            db.clone(),
            BackupConfig::default(),
            Arc::new(NoopPipelineSupervisor),
            presenter.clone(),
        )
        .unwrap();
        let bad_account = Frame::new(FrameItem::Account(crate::proto::AccountDataProto {
            profile_key: vec![1; 5],
            ..Default::default()
        }));
        let file = write_backup(&header(), &[bad_account]);

        assert!(manager
            .import_backup(
                file.path(),
                &identity(),
                StreamMode::Plaintext,
                None,
                &CancellationToken::new()
            )
            .is_err());
        let stored = presenter.load().unwrap().unwrap();
        assert!(stored.did_fail);
        assert_eq!(stored.groups[0].family, RecordFamily::AccountData);
    }

    #[test]
    fn test_partial_contact_is_not_presented() {
        let h = harness();
        let contact = ContactProto {
            aci: Some(vec![9; 3]),
            ..grace()
        };
        let file = write_backup(&header(), &[contact_recipient(2, contact)]);

        let summary = import(&h, file.path()).unwrap();
        assert_eq!(summary.frames_dropped, 0);
        assert_eq!(summary.errors[0].kind, "invalid_field_length");
        assert_eq!(summary.errors[0].max_level, LogLevel::Warning);
        assert_eq!(count(&h.db, "contacts"), 1);
        assert!(h.presenter.reports.lock().is_empty());
    }

    #[test]
    fn test_dropped_contact_counts_under_missing_identifier() {
        let h = harness();
        let contact = ContactProto {
            aci: Some(vec![9; 3]),
            e164: None,
            ..grace()
        };
        let file = write_backup(&header(), &[contact_recipient(2, contact)]);

        let summary = import(&h, file.path()).unwrap();
        assert_eq!(summary.frames_dropped, 1);
        let group = |kind: &str| summary.errors.iter().find(|e| e.kind == kind).unwrap();
        assert!(group("missing_required_field").was_frame_dropped);
        assert!(!group("invalid_field_length").was_frame_dropped);
        assert_eq!(group("invalid_field_length").max_level, LogLevel::Error);
        assert_eq!(count(&h.db, "contacts"), 0);
    }

    #[test]
    fn test_fail_on_any_frame_error_aborts() {
        let h = harness_with(BackupConfig {
            fail_on_any_frame_error: true,
            ..BackupConfig::default()
        });
        let file = write_backup(&header(), &mixed_frames());

        assert!(matches!(
            import(&h, file.path()),
            Err(Error::FatalRecordFailure {
                family: RecordFamily::ChatItem,
                ..
            })
        ));
        assert_eq!(count(&h.db, "interactions"), 0);
    }

    #[test]
    fn test_unknown_tag_is_skipped() {
        let h = harness();
        let file = write_units(&[
            codec::encode_header(&header()).unwrap(),
            vec![99, 1, 2, 3],
            codec::encode_frame(&self_recipient(1)).unwrap(),
        ]);

        let summary = import(&h, file.path()).unwrap();
        assert_eq!(summary.frames_read, 2);
        assert_eq!(summary.frames_dropped, 1);
        assert_eq!(summary.errors[0].kind, "unrecognized_frame");
        assert_eq!(summary.errors[0].max_level, LogLevel::Warning);
        assert!(h.presenter.reports.lock().is_empty());
    }

    #[test]
    fn test_undecodable_body_is_dropped() {
        let h = harness();
        let file = write_units(&[
            codec::encode_header(&header()).unwrap(),
            vec![crate::proto::tag::CHAT, 0xff],
            codec::encode_frame(&self_recipient(1)).unwrap(),
        ]);

        let summary = import(&h, file.path()).unwrap();
        assert_eq!(summary.frames_read, 2);
        assert_eq!(summary.errors[0].kind, "undecodable_frame");
        assert_eq!(summary.errors[0].family, RecordFamily::Unknown);
        assert_eq!(summary.bytes_read, file.as_file().metadata().unwrap().len());
    }

    #[test]
    fn test_unsupported_version_is_rejected_before_frames() {
        let h = harness();
        let file = write_backup(
            &BackupHeader {
                version: 99,
                ..header()
            },
            &mixed_frames(),
        );
        assert_eq!(
            import(&h, file.path()),
            Err(Error::UnsupportedBackupVersion(99))
        );
        assert_eq!(count(&h.db, "contacts"), 0);
    }

    #[test]
    fn test_short_media_root_key_is_rejected() {
        let h = harness();
        let file = write_backup(
            &BackupHeader {
                media_root_key: vec![1; 5],
                ..header()
            },
            &[],
        );
        assert_eq!(import(&h, file.path()), Err(Error::InvalidMediaRootKey(5)));
    }

    #[test]
    fn test_cancelled_import_rolls_back() {
        let h = harness();
        let file = write_backup(&header(), &mixed_frames());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = h.manager.import_backup(
            file.path(),
            &identity(),
            StreamMode::Plaintext,
            None,
            &cancel,
        );
        assert_eq!(result, Err(Error::Cancelled));
        assert_eq!(count(&h.db, "contacts"), 0);
        assert_eq!(h.manager.restore_state().unwrap(), BackupRestoreState::None);
        assert_eq!(h.supervisor.suspended.load(Ordering::SeqCst), 1);
        assert_eq!(h.supervisor.resumed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancelled_export_keeps_no_media_root_key() {
        let h = seeded();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = h.manager.export_backup(
            &identity(),
            StreamMode::Plaintext,
            BackupPurpose::RemoteBackup,
            None,
            &cancel,
        );
        assert!(matches!(result, Err(Error::Cancelled)));
        let account = h.db.with_store(|s| s.account()).unwrap().unwrap();
        assert_eq!(account.media_root_key, None);
        assert_eq!(h.supervisor.resumed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_export_without_account_fails() {
        let h = harness();
        let result = h.manager.export_backup(
            &identity(),
            StreamMode::Plaintext,
            BackupPurpose::RemoteBackup,
            None,
            &CancellationToken::new(),
        );
        assert!(matches!(
            result,
            Err(Error::FatalRecordFailure {
                family: RecordFamily::AccountData,
                ..
            })
        ));
    }

    #[test]
    fn test_round_trip_preserves_dataset() {
        let source = seeded();
        let exported = export(&source, BackupPurpose::DeviceTransfer);
        // account, self, contact, group, 2 chats, 3 items, sticker pack, call
        assert_eq!(exported.frame_count, 11);

        let target = harness();
        let summary = import(&target, exported.path()).unwrap();
        assert!(summary.errors.is_empty());
        assert_eq!(summary.bytes_read, exported.byte_length);

        for table in [
            "contacts",
            "chat_groups",
            "threads",
            "interactions",
            "reactions",
            "sticker_packs",
            "call_records",
        ] {
            assert_eq!(count(&source.db, table), count(&target.db, table), "{}", table);
        }

        let bodies = |db: &Database| {
            let mut bodies = Vec::new();
            db.with_store(|s| {
                s.for_each_interaction(|i| {
                    bodies.push((i.sent_at_ms, i.body, i.author == AuthorRef::Local));
                    Ok(())
                })
            })
            .unwrap();
            bodies
        };
        assert_eq!(bodies(&source.db), bodies(&target.db));

        let source_account = source.db.with_store(|s| s.account()).unwrap().unwrap();
        let target_account = target.db.with_store(|s| s.account()).unwrap().unwrap();
        assert_eq!(source_account.given_name, target_account.given_name);
        assert_eq!(source_account.media_root_key, target_account.media_root_key);
        assert!(target_account.media_root_key.is_some());
        assert_eq!(count(&target.db, "sticker_download_queue"), 1);
    }

    #[test]
    fn test_round_trip_honours_purpose_filter() {
        let source = harness();
        let now = now_timestamp_millis();
        source
            .db
            .with_store(|s| {
                let dm = seed_dataset(s).dm;
                let expired = InteractionRecord {
                    expires_in_ms: 1_000,
                    expire_started_at_ms: 1_000,
                    ..message(dm, AuthorRef::Local, ChatItemDirection::Outgoing, 5_000, "gone")
                };
                let soon = InteractionRecord {
                    expires_in_ms: 60_000,
                    expire_started_at_ms: now,
                    ..message(dm, AuthorRef::Local, ChatItemDirection::Outgoing, 6_000, "soon")
                };
                s.insert_interaction(&expired)?;
                s.insert_interaction(&soon)?;
                Ok(())
            })
            .unwrap();

        let transfer = export(&source, BackupPurpose::DeviceTransfer);
        let remote = export(&source, BackupPurpose::RemoteBackup);

        let transfer_target = harness();
        import(&transfer_target, transfer.path()).unwrap();
        assert_eq!(count(&transfer_target.db, "interactions"), 4);

        let remote_target = harness();
        import(&remote_target, remote.path()).unwrap();
        assert_eq!(count(&remote_target.db, "interactions"), 3);
    }

    #[test]
    fn test_export_reuses_stored_media_root_key() {
        let h = seeded();
        let first = export(&h, BackupPurpose::RemoteBackup);
        let key = h.db.with_store(|s| s.account()).unwrap().unwrap().media_root_key;
        let second = export(&h, BackupPurpose::RemoteBackup);
        assert_eq!(
            h.db.with_store(|s| s.account()).unwrap().unwrap().media_root_key,
            key
        );

        let read_key = |exported: &ExportedBackup| {
            let file = File::open(exported.path()).unwrap();
            let mut input = BackupInputStream::open(file, StreamMode::Plaintext, MAX).unwrap();
            input.read_header().unwrap().header.media_root_key
        };
        assert_eq!(read_key(&first), read_key(&second));
        assert_eq!(Some(read_key(&first)), key);
    }

    #[test]
    fn test_encrypted_import_uses_writer_segment_size() {
        let source = seeded_with(BackupConfig {
            segment_size: 128 * 1024,
            ..BackupConfig::default()
        });
        let key = BackupKey::from_bytes([3; 32]);
        let exported = source
            .manager
            .export_backup(
                &identity(),
                StreamMode::Encrypted(&key),
                BackupPurpose::DeviceTransfer,
                None,
                &CancellationToken::new(),
            )
            .unwrap();

        let target = harness();
        assert_ne!(target.manager.config().segment_size, 128 * 1024);
        let summary = target
            .manager
            .import_backup(
                exported.path(),
                &identity(),
                StreamMode::Encrypted(&key),
                None,
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(summary.bytes_read, exported.byte_length);
        assert_eq!(count(&target.db, "interactions"), 3);
    }

    #[test]
    fn test_smallest_valid_segment_size_is_readable() {
        let source = seeded_with(BackupConfig {
            segment_size: crate::stream::encrypted::MIN_SEGMENT_SIZE,
            ..BackupConfig::default()
        });
        let key = BackupKey::from_bytes([3; 32]);
        let exported = source
            .manager
            .export_backup(
                &identity(),
                StreamMode::Encrypted(&key),
                BackupPurpose::DeviceTransfer,
                None,
                &CancellationToken::new(),
            )
            .unwrap();

        let result = source
            .manager
            .validate_backup(
                exported.path(),
                &identity(),
                StreamMode::Encrypted(&key),
                BackupPurpose::DeviceTransfer,
            )
            .unwrap();
        assert!(result.succeeded);
        assert_eq!(result.frames_read, exported.frame_count);
    }

    #[test]
    fn test_encrypted_round_trip_and_tamper() {
        let source = seeded();
        let key = BackupKey::from_bytes([3; 32]);
        let exported = source
            .manager
            .export_backup(
                &identity(),
                StreamMode::Encrypted(&key),
                BackupPurpose::RemoteBackup,
                None,
                &CancellationToken::new(),
            )
            .unwrap();

        let mut bytes = Vec::new();
        File::open(exported.path())
            .unwrap()
            .read_to_end(&mut bytes)
            .unwrap();
        let len = bytes.len();
        for byte in &mut bytes[len - 4..] {
            *byte ^= 0xff;
        }
        let mut tampered = NamedTempFile::new().unwrap();
        tampered.write_all(&bytes).unwrap();
        tampered.flush().unwrap();

        let target = harness();
        let result = target.manager.import_backup(
            tampered.path(),
            &identity(),
            StreamMode::Encrypted(&key),
            None,
            &CancellationToken::new(),
        );
        assert!(matches!(result, Err(Error::MacValidationFailed(_))));
        assert_eq!(count(&target.db, "contacts"), 0);
        assert_eq!(target.manager.restore_state().unwrap(), BackupRestoreState::None);

        let summary = target
            .manager
            .import_backup(
                exported.path(),
                &identity(),
                StreamMode::Encrypted(&key),
                None,
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(summary.frames_read, 11);
        assert_eq!(count(&target.db, "contacts"), 1);
    }

    #[test]
    fn test_progress_is_monotonic_and_completes() {
        let source = seeded();
        let sink = Arc::new(RecordingSink::default());
        let exported = source
            .manager
            .export_backup(
                &identity(),
                StreamMode::Plaintext,
                BackupPurpose::DeviceTransfer,
                Some(sink.clone()),
                &CancellationToken::new(),
            )
            .unwrap();

        let import_sink = Arc::new(RecordingSink::default());
        let target = harness();
        target
            .manager
            .import_backup(
                exported.path(),
                &identity(),
                StreamMode::Plaintext,
                Some(import_sink.clone()),
                &CancellationToken::new(),
            )
            .unwrap();

        for seen in [sink.seen.lock().clone(), import_sink.seen.lock().clone()] {
            assert!(!seen.is_empty());
            assert!(seen.windows(2).all(|w| w[0] <= w[1]));
            assert!(seen.iter().all(|f| (0.0..=1.0).contains(f)));
            assert_eq!(seen.last().copied(), Some(1.0));
        }
    }

    #[test]
    fn test_failed_export_never_reports_completion() {
        let h = harness_with(BackupConfig {
            fail_on_any_frame_error: true,
            ..BackupConfig::default()
        });
        h.db.with_store(|store| {
            seed_dataset(store);
            Ok(())
        })
        .unwrap();
        h.db.with_connection(|conn| {
            conn.execute(
                "INSERT INTO call_records (call_id, group_id, state, call_timestamp_ms)
                 VALUES (88, 4242, 1, 5000)",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        let sink = Arc::new(RecordingSink::default());
        let result = h.manager.export_backup(
            &identity(),
            StreamMode::Plaintext,
            BackupPurpose::DeviceTransfer,
            Some(sink.clone()),
            &CancellationToken::new(),
        );

        assert!(matches!(
            result,
            Err(Error::FatalRecordFailure {
                family: RecordFamily::AdHocCall,
                ..
            })
        ));
        let seen = sink.seen.lock().clone();
        assert!(!seen.is_empty());
        assert!(seen.iter().all(|f| *f < 1.0), "{:?}", seen);
    }

    #[test]
    fn test_validate_leaves_database_untouched() {
        let h = harness();
        let file = write_backup(&header(), &mixed_frames());

        let result = h
            .manager
            .validate_backup(
                file.path(),
                &identity(),
                StreamMode::Plaintext,
                BackupPurpose::RemoteBackup,
            )
            .unwrap();
        assert!(result.succeeded);
        assert_eq!(result.frames_read, 10);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(count(&h.db, "contacts"), 0);
        assert_eq!(h.manager.restore_state().unwrap(), BackupRestoreState::None);
        assert!(h.presenter.reports.lock().is_empty());
        assert_eq!(h.supervisor.suspended.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_validate_reports_fatal_records() {
        let h = harness();
        let bad_account = Frame::new(FrameItem::Account(crate::proto::AccountDataProto {
            profile_key: vec![],
            ..Default::default()
        }));
        let file = write_backup(&header(), &[bad_account]);

        let result = h
            .manager
            .validate_backup(
                file.path(),
                &identity(),
                StreamMode::Plaintext,
                BackupPurpose::DeviceTransfer,
            )
            .unwrap();
        assert!(!result.succeeded);
        assert_eq!(result.errors[0].family, RecordFamily::AccountData);
    }

    #[test]
    fn test_validate_propagates_stream_errors() {
        let h = harness();
        let file = write_units(&[vec![1, 2, 3]]);
        let result = h.manager.validate_backup(
            file.path(),
            &identity(),
            StreamMode::Plaintext,
            BackupPurpose::RemoteBackup,
        );
        assert!(result.map_err(|e| e.is_stream_error()).unwrap_err());
    }

    #[test]
    fn test_pass_state_terminals() {
        assert!(PassState::Committed.is_terminal());
        assert!(PassState::RolledBack.is_terminal());
        assert!(!PassState::RestoringFrame(3).is_terminal());
        assert!(!PassState::ArchivingFamily(RecordFamily::Chat).is_terminal());
    }

    #[test]
    fn test_async_validate_on_blocking_pool() {
        let h = harness();
        let file = write_backup(&header(), &mixed_frames());
        let manager = Arc::new(h.manager);
        let result = tokio_test::block_on(manager.validate_backup_async(
            file.path().to_path_buf(),
            identity(),
            None,
            BackupPurpose::DeviceTransfer,
        ))
        .unwrap();
        assert!(result.succeeded);
        assert_eq!(result.purpose, BackupPurpose::DeviceTransfer);
    }

    #[tokio::test]
    async fn test_async_export_then_import() {
        let source = seeded();
        let manager = Arc::new(source.manager);
        let exported = manager
            .clone()
            .export_backup_async(
                identity(),
                Some(BackupKey::from_bytes([8; 32])),
                BackupPurpose::DeviceTransfer,
                None,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let target = harness();
        let target_db = target.db.clone();
        let summary = Arc::new(target.manager)
            .import_backup_async(
                exported.path().to_path_buf(),
                identity(),
                Some(BackupKey::from_bytes([8; 32])),
                None,
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(summary.frames_read, 11);
        assert_eq!(count(&target_db, "threads"), 2);
    }
}
