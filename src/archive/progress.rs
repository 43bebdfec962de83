//! # Progress Estimation
//!
//! Maps work done onto a single fraction in `[0, 1]`.
//!
//! ```text
//! Export:  0.99 × processed units / (row counts + 3)     saturates at 0.99
//!
//! Import:  ├──────── frames (bytes) ────────┼─ indexes ─┼ deferred ┤
//!          0.0                             0.80        0.95       1.0
//! ```
//!
//! Reports never go backwards. The final 1.0 is only reported by
//! `complete()`, which the manager calls once the pass has committed.

use std::sync::Arc;

use crate::error::Result;
use crate::storage::schema::ENUMERABLE_TABLES;
use crate::storage::Store;

/// Header, account data and the local recipient.
const NON_ENUMERABLE_UNITS: u64 = 3;

/// Ceiling of an export before it commits.
const EXPORT_UNITS_CEILING: f64 = 0.99;

/// Smallest change worth reporting.
const REPORT_STEP: f64 = 0.001;

/// Receives progress updates.
pub trait ProgressSink: Send + Sync {
    /// Called with a non-decreasing fraction in `[0, 1]`
    fn update(&self, fraction: f64);
}

#[derive(Default)]
struct Reporter {
    sink: Option<Arc<dyn ProgressSink>>,
    reported: f64,
}

impl Reporter {
    fn new(sink: Option<Arc<dyn ProgressSink>>) -> Self {
        Self {
            sink,
            reported: 0.0,
        }
    }

    fn report(&mut self, fraction: f64) {
        let Some(sink) = &self.sink else {
            return;
        };
        let fraction = fraction.clamp(0.0, 1.0);
        let reached_end = fraction >= 1.0 && self.reported < 1.0;
        if reached_end || fraction - self.reported >= REPORT_STEP {
            self.reported = fraction;
            sink.update(fraction);
        }
    }
}

// ============================================================================
// EXPORT
// ============================================================================

/// Unit-count progress for an export.
#[derive(Default)]
pub struct ExportProgress {
    reporter: Reporter,
    estimated_total: u64,
    processed: u64,
}

impl ExportProgress {
    /// Progress that reports nowhere
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Estimate the total from row counts. Skips the counts with no sink.
    pub fn start(store: &Store<'_>, sink: Option<Arc<dyn ProgressSink>>) -> Result<Self> {
        if sink.is_none() {
            return Ok(Self::disabled());
        }
        let mut estimated_total = NON_ENUMERABLE_UNITS;
        for table in ENUMERABLE_TABLES {
            estimated_total += store.count_rows(table)?;
        }
        tracing::debug!("Export progress estimate: {} units", estimated_total);

        let mut progress = Self {
            reporter: Reporter::new(sink),
            estimated_total,
            processed: 0,
        };
        progress.reporter.report(0.0);
        Ok(progress)
    }

    /// Estimated total units
    pub fn estimated_total(&self) -> u64 {
        self.estimated_total
    }

    /// One unit written or skipped
    pub fn did_process_unit(&mut self) {
        self.processed = self.processed.saturating_add(1);
        let fraction = self.fraction();
        self.reporter.report(fraction);
    }

    /// Current fraction; below 1.0 until `complete()`
    pub fn fraction(&self) -> f64 {
        if self.estimated_total == 0 {
            return 0.0;
        }
        let processed = self.processed.min(self.estimated_total) as f64;
        EXPORT_UNITS_CEILING * processed / self.estimated_total as f64
    }

    /// Report exactly 1.0
    pub fn complete(&mut self) {
        self.processed = self.processed.max(self.estimated_total);
        self.reporter.report(1.0);
    }
}

// ============================================================================
// IMPORT
// ============================================================================

/// Phases of an import after the frame loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ImportPhase {
    /// Reading frames
    Frames,
    /// Rebuilding dropped indexes
    RebuildingIndexes,
    /// Running deferred actions and finalizing
    DeferredActions,
}

impl ImportPhase {
    fn floor(self) -> f64 {
        match self {
            ImportPhase::Frames => 0.0,
            ImportPhase::RebuildingIndexes => 0.80,
            ImportPhase::DeferredActions => 0.95,
        }
    }
}

/// Byte-weighted progress for an import.
pub struct ImportProgress {
    reporter: Reporter,
    total_bytes: u64,
    consumed_bytes: u64,
    phase: ImportPhase,
}

impl ImportProgress {
    /// Progress over a file of `total_bytes`
    pub fn new(total_bytes: u64, sink: Option<Arc<dyn ProgressSink>>) -> Self {
        let mut progress = Self {
            reporter: Reporter::new(sink),
            total_bytes,
            consumed_bytes: 0,
            phase: ImportPhase::Frames,
        };
        progress.reporter.report(0.0);
        progress
    }

    /// Bytes read from the file so far
    pub fn consumed_bytes(&self) -> u64 {
        self.consumed_bytes
    }

    /// Count bytes consumed by one read
    pub fn did_read_bytes(&mut self, bytes: u64) {
        self.consumed_bytes = self.consumed_bytes.saturating_add(bytes);
        let fraction = self.fraction();
        self.reporter.report(fraction);
    }

    /// Move to a later phase. Earlier phases are ignored.
    pub fn enter_phase(&mut self, phase: ImportPhase) {
        if phase > self.phase {
            self.phase = phase;
            let fraction = self.fraction();
            self.reporter.report(fraction);
        }
    }

    /// Current fraction; below 1.0 until `complete()`
    pub fn fraction(&self) -> f64 {
        match self.phase {
            ImportPhase::Frames if self.total_bytes > 0 => {
                let read = self.consumed_bytes.min(self.total_bytes) as f64;
                0.80 * read / self.total_bytes as f64
            }
            phase => phase.floor(),
        }
    }

    /// Report exactly 1.0
    pub fn complete(&mut self) {
        self.phase = ImportPhase::DeferredActions;
        self.reporter.report(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<f64>>);

    impl ProgressSink for Recorder {
        fn update(&self, fraction: f64) {
            self.0.lock().push(fraction);
        }
    }

    fn assert_monotonic_to_one(values: &[f64]) {
        assert!(values.windows(2).all(|w| w[0] <= w[1]), "{:?}", values);
        assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
        assert_eq!(values.last().copied(), Some(1.0));
    }

    #[test]
    fn test_export_progress_saturates() {
        let recorder = Arc::new(Recorder::default());
        let mut progress = ExportProgress {
            reporter: Reporter::new(Some(recorder.clone())),
            estimated_total: 4,
            processed: 0,
        };
        for _ in 0..10 {
            progress.did_process_unit();
            assert!(progress.fraction() < 1.0);
        }
        assert!(recorder.0.lock().iter().all(|v| *v < 1.0));
        progress.complete();
        let values = recorder.0.lock().clone();
        assert_monotonic_to_one(&values);
        assert_eq!(values.iter().filter(|v| **v == 1.0).count(), 1);
    }

    #[test]
    fn test_export_progress_counts_rows() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch(crate::storage::schema::CREATE_TABLES).unwrap();
        let store = Store::new(&conn);
        store
            .insert_contact(&crate::storage::ContactRecord::default())
            .unwrap();

        let recorder: Arc<dyn ProgressSink> = Arc::new(Recorder::default());
        let progress = ExportProgress::start(&store, Some(recorder)).unwrap();
        assert_eq!(progress.estimated_total(), 4);
        assert_eq!(ExportProgress::start(&store, None).unwrap().estimated_total(), 0);
    }

    #[test]
    fn test_import_progress_phases() {
        let recorder = Arc::new(Recorder::default());
        let mut progress = ImportProgress::new(1000, Some(recorder.clone()));
        for _ in 0..10 {
            progress.did_read_bytes(100);
        }
        assert!((progress.fraction() - 0.80).abs() < 1e-9);
        progress.enter_phase(ImportPhase::RebuildingIndexes);
        progress.enter_phase(ImportPhase::DeferredActions);
        progress.enter_phase(ImportPhase::Frames);
        assert!((progress.fraction() - 0.95).abs() < 1e-9);
        assert!(recorder.0.lock().iter().all(|v| *v < 1.0));

        progress.complete();
        assert_monotonic_to_one(&recorder.0.lock());
    }

    #[test]
    fn test_import_progress_empty_file() {
        let recorder = Arc::new(Recorder::default());
        let mut progress = ImportProgress::new(0, Some(recorder.clone()));
        progress.did_read_bytes(0);
        assert_eq!(progress.fraction(), 0.0);
        progress.complete();
        assert_monotonic_to_one(&recorder.0.lock());
    }

    #[test]
    fn test_no_sink_is_a_noop() {
        let mut progress = ImportProgress::new(10, None);
        progress.did_read_bytes(5);
        progress.complete();
        let mut export = ExportProgress::disabled();
        export.did_process_unit();
        export.complete();
    }
}
