//! # Error Collapser
//!
//! Folds per-record errors into a bounded summary.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          ERROR PIPELINE                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  archiver ──► LoggableErrorAndProto ──► push() ──┐                      │
//! │                                                  ▼                      │
//! │                        group by (kind name, family)                     │
//! │                        count, max level, first K samples                │
//! │                                                  │                      │
//! │                                       finish()   ▼                      │
//! │                        CollapsedErrors { groups, did_fail }             │
//! │                                                  │                      │
//! │              always ──► log_collapsed()          │                      │
//! │      above Warning ──► BackupErrorPresenter ◄────┘                      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Memory is O(groups × K) however many errors are pushed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::errors::{LogLevel, LoggableErrorAndProto};
use crate::error::Result;
use crate::proto::{Frame, RecordFamily};
use crate::storage::Database;

/// One group of identical errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollapsedErrorLog {
    /// Error kind name
    pub kind: String,
    /// Record family
    pub family: RecordFamily,
    /// Errors in the group
    pub count: u64,
    /// Most severe member
    pub max_level: LogLevel,
    /// Whether any member dropped its frame
    pub was_frame_dropped: bool,
    /// Message of the first member
    pub example_message: String,
    /// Callsite of the first member
    pub example_callsite: String,
    /// Ids of the first K members
    pub sample_ids: Vec<String>,
    /// Frames of the first K members that had one; never persisted
    #[serde(skip)]
    pub sample_frames: Vec<Frame>,
}

/// The collapsed result of one pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollapsedErrors {
    /// Groups, ordered by family then kind
    pub groups: Vec<CollapsedErrorLog>,
    /// Whether a fatal failure occurred
    pub did_fail: bool,
    /// Total frames dropped
    pub frames_dropped: u64,
}

impl CollapsedErrors {
    /// Whether the summary should reach the user
    pub fn should_present(&self) -> bool {
        self.groups.iter().any(|g| g.max_level > LogLevel::Warning)
    }

    /// Whether any error was recorded at all
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Streaming collapser.
#[derive(Debug)]
pub struct ErrorCollapser {
    sample_limit: usize,
    groups: BTreeMap<(RecordFamily, &'static str), CollapsedErrorLog>,
    did_fail: bool,
    frames_dropped: u64,
}

impl ErrorCollapser {
    /// A collapser keeping at most `sample_limit` samples per group
    pub fn new(sample_limit: usize) -> Self {
        Self {
            sample_limit,
            groups: BTreeMap::new(),
            did_fail: false,
            frames_dropped: 0,
        }
    }

    /// Collapse a finished list in one go
    pub fn collapse(
        entries: impl IntoIterator<Item = LoggableErrorAndProto>,
        sample_limit: usize,
    ) -> Vec<CollapsedErrorLog> {
        let mut collapser = Self::new(sample_limit);
        for entry in entries {
            collapser.push(entry);
        }
        collapser.finish().groups
    }

    /// Fold one entry
    pub fn push(&mut self, entry: LoggableErrorAndProto) {
        let LoggableErrorAndProto {
            error,
            level,
            was_frame_dropped,
            offending_frame,
        } = entry;

        if was_frame_dropped {
            self.frames_dropped += 1;
        }

        let key = (error.family, error.kind.name());
        let sample_limit = self.sample_limit;
        let group = self.groups.entry(key).or_insert_with(|| CollapsedErrorLog {
            kind: key.1.to_string(),
            family: error.family,
            count: 0,
            max_level: level,
            was_frame_dropped: false,
            example_message: error.to_string(),
            example_callsite: error.callsite_string(),
            sample_ids: Vec::new(),
            sample_frames: Vec::new(),
        });

        group.count += 1;
        group.max_level = group.max_level.max(level);
        group.was_frame_dropped |= was_frame_dropped;
        if group.sample_ids.len() < sample_limit {
            group.sample_ids.push(error.id);
        }
        if let Some(frame) = offending_frame {
            if group.sample_frames.len() < sample_limit {
                group.sample_frames.push(frame);
            }
        }
    }

    /// Mark the pass as failed. Independent of any group.
    pub fn mark_failed(&mut self) {
        self.did_fail = true;
    }

    /// Whether the pass has been marked failed
    pub fn did_fail(&self) -> bool {
        self.did_fail
    }

    /// Errors folded so far
    pub fn total(&self) -> u64 {
        self.groups.values().map(|g| g.count).sum()
    }

    /// Close the collapser
    pub fn finish(self) -> CollapsedErrors {
        CollapsedErrors {
            groups: self.groups.into_values().collect(),
            did_fail: self.did_fail,
            frames_dropped: self.frames_dropped,
        }
    }
}

/// Log every group at the level of its most severe member.
pub fn log_collapsed(errors: &CollapsedErrors) {
    for group in &errors.groups {
        match group.max_level {
            LogLevel::Info => tracing::info!(
                "[{}] {} x{}: {} ({})",
                group.family,
                group.kind,
                group.count,
                group.example_message,
                group.example_callsite
            ),
            LogLevel::Warning => tracing::warn!(
                "[{}] {} x{}: {} ({})",
                group.family,
                group.kind,
                group.count,
                group.example_message,
                group.example_callsite
            ),
            LogLevel::Error | LogLevel::Fault => tracing::error!(
                "[{}] {} x{}: {} ({}) samples={:?}",
                group.family,
                group.kind,
                group.count,
                group.example_message,
                group.example_callsite,
                group.sample_ids
            ),
        }
    }
    if errors.frames_dropped > 0 {
        tracing::error!("Dropped {} frames", errors.frames_dropped);
    }
}

// ============================================================================
// PRESENTERS
// ============================================================================

/// Receives the collapsed summary of a pass worth surfacing.
pub trait BackupErrorPresenter: Send + Sync {
    /// Persist or display the summary
    fn persist_errors(&self, errors: &[CollapsedErrorLog], did_fail: bool) -> Result<()>;
}

/// Presenter that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingErrorPresenter;

impl BackupErrorPresenter for LoggingErrorPresenter {
    fn persist_errors(&self, errors: &[CollapsedErrorLog], did_fail: bool) -> Result<()> {
        tracing::warn!(
            "Backup pass {} with {} error groups",
            if did_fail { "failed" } else { "completed" },
            errors.len()
        );
        Ok(())
    }
}

/// A persisted error summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredErrorReport {
    /// When it was written, Unix millis
    pub recorded_at_ms: i64,
    /// Whether the pass failed
    pub did_fail: bool,
    /// The groups
    pub groups: Vec<CollapsedErrorLog>,
}

/// Presenter that stores the summary as JSON in `key_value`.
///
/// Writes in its own statement after the pass, so the report survives a
/// rolled-back pass.
#[derive(Clone)]
pub struct StoredErrorPresenter {
    db: Database,
}

impl StoredErrorPresenter {
    const COLLECTION: &'static str = "backup_errors";
    const KEY: &'static str = "last_report";

    /// Store reports in `db`
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// The most recent report, if any
    pub fn load(&self) -> Result<Option<StoredErrorReport>> {
        let raw = self
            .db
            .with_store(|store| store.kv_get(Self::COLLECTION, Self::KEY))?;
        raw.map(|json| serde_json::from_str(&json).map_err(Into::into))
            .transpose()
    }
}

impl BackupErrorPresenter for StoredErrorPresenter {
    fn persist_errors(&self, errors: &[CollapsedErrorLog], did_fail: bool) -> Result<()> {
        let report = StoredErrorReport {
            recorded_at_ms: crate::time::now_timestamp_millis(),
            did_fail,
            groups: errors.to_vec(),
        };
        let json = serde_json::to_string(&report)?;
        self.db
            .with_store(|store| store.kv_set(Self::COLLECTION, Self::KEY, &json))
    }
}

/// Log the summary and hand it to the presenter if it crosses the threshold.
pub fn present(presenter: &dyn BackupErrorPresenter, errors: &CollapsedErrors) {
    log_collapsed(errors);
    if !errors.should_present() {
        return;
    }
    if let Err(e) = presenter.persist_errors(&errors.groups, errors.did_fail) {
        tracing::error!("Failed to persist backup errors: {}", e);
    }
}
