//! Wall-clock timing per record family.
//!
//! A disabled bencher does nothing; an enabled one never changes control
//! flow. Enumeration (pulling the next row) and processing (building or
//! restoring a frame) are timed separately.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::proto::RecordFamily;
use crate::time::MonotonicClock;

/// Where a processed frame is counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BenchBucket {
    /// Record family
    pub family: RecordFamily,
    /// Finer split within the family
    pub subtype: &'static str,
}

impl BenchBucket {
    /// Bucket with the default subtype
    pub fn family(family: RecordFamily) -> Self {
        Self {
            family,
            subtype: "default",
        }
    }
}

/// A started measurement.
#[derive(Debug, Clone, Copy)]
pub struct FrameTimer(Option<Duration>);

/// Accumulated timings for one bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BucketStats {
    /// Units measured
    pub count: u64,
    /// Total time
    pub total: Duration,
    /// Slowest unit
    pub max: Duration,
    /// Units over the warning threshold
    pub slow_units: u64,
}

impl BucketStats {
    fn add(&mut self, elapsed: Duration, threshold: Duration) {
        self.count += 1;
        self.total += elapsed;
        self.max = self.max.max(elapsed);
        if elapsed > threshold {
            self.slow_units += 1;
        }
    }

    /// Mean time per unit
    pub fn mean(&self) -> Duration {
        if self.count == 0 {
            return Duration::ZERO;
        }
        self.total / self.count.min(u32::MAX as u64) as u32
    }
}

struct BenchState {
    clock: Box<dyn MonotonicClock>,
    threshold: Duration,
    frames: BTreeMap<BenchBucket, BucketStats>,
    enumeration: BTreeMap<RecordFamily, BucketStats>,
    actions: BTreeMap<&'static str, BucketStats>,
}

impl BenchState {
    fn elapsed(&self, timer: FrameTimer) -> Option<Duration> {
        timer.0.map(|started| self.clock.now().saturating_sub(started))
    }
}

/// Per-pass timing collector.
pub struct Bencher {
    state: Option<BenchState>,
}

impl Bencher {
    /// A bencher that records nothing
    pub fn disabled() -> Self {
        Self { state: None }
    }

    /// A recording bencher
    pub fn new(clock: Box<dyn MonotonicClock>, warning_threshold: Duration) -> Self {
        Self {
            state: Some(BenchState {
                clock,
                threshold: warning_threshold,
                frames: BTreeMap::new(),
                enumeration: BTreeMap::new(),
                actions: BTreeMap::new(),
            }),
        }
    }

    /// Whether anything is recorded
    pub fn is_enabled(&self) -> bool {
        self.state.is_some()
    }

    /// Start a measurement
    pub fn start(&self) -> FrameTimer {
        FrameTimer(self.state.as_ref().map(|s| s.clock.now()))
    }

    /// Close a processing measurement
    pub fn record_frame(&mut self, bucket: BenchBucket, timer: FrameTimer) {
        if let Some(state) = self.state.as_mut() {
            if let Some(elapsed) = state.elapsed(timer) {
                let threshold = state.threshold;
                state.frames.entry(bucket).or_default().add(elapsed, threshold);
            }
        }
    }

    /// Close an enumeration measurement
    pub fn record_enumeration(&mut self, family: RecordFamily, timer: FrameTimer) {
        if let Some(state) = self.state.as_mut() {
            if let Some(elapsed) = state.elapsed(timer) {
                let threshold = state.threshold;
                state.enumeration.entry(family).or_default().add(elapsed, threshold);
            }
        }
    }

    /// Time a named one-off action
    pub fn bench_action<T>(&mut self, name: &'static str, f: impl FnOnce() -> T) -> T {
        let timer = self.start();
        let value = f();
        if let Some(state) = self.state.as_mut() {
            if let Some(elapsed) = state.elapsed(timer) {
                state
                    .actions
                    .entry(name)
                    .or_default()
                    // Actions are expected to be slow; only frames are flagged.
                    .add(elapsed, Duration::MAX);
            }
        }
        value
    }

    /// Processing stats for a bucket
    pub fn frame_stats(&self, bucket: BenchBucket) -> Option<BucketStats> {
        self.state.as_ref()?.frames.get(&bucket).copied()
    }

    /// Enumeration stats for a family
    pub fn enumeration_stats(&self, family: RecordFamily) -> Option<BucketStats> {
        self.state.as_ref()?.enumeration.get(&family).copied()
    }

    /// Stats for a named action
    pub fn action_stats(&self, name: &str) -> Option<BucketStats> {
        self.state.as_ref()?.actions.get(name).copied()
    }

    /// Buckets with at least one unit over the warning threshold
    pub fn slow_buckets(&self) -> usize {
        self.state.as_ref().map_or(0, |state| {
            state.frames.values().filter(|s| s.slow_units > 0).count()
                + state.enumeration.values().filter(|s| s.slow_units > 0).count()
        })
    }

    /// Log everything recorded
    pub fn log_results(&self) {
        let Some(state) = self.state.as_ref() else {
            return;
        };

        for (family, stats) in &state.enumeration {
            tracing::info!(
                "Bench enumerate {}: count={} total={:?} max={:?}",
                family,
                stats.count,
                stats.total,
                stats.max
            );
        }
        for (bucket, stats) in &state.frames {
            tracing::info!(
                "Bench {}/{}: count={} total={:?} mean={:?} max={:?}",
                bucket.family,
                bucket.subtype,
                stats.count,
                stats.total,
                stats.mean(),
                stats.max
            );
            if stats.slow_units > 0 {
                tracing::warn!(
                    "Bench {}/{}: {} units over {:?}",
                    bucket.family,
                    bucket.subtype,
                    stats.slow_units,
                    state.threshold
                );
            }
        }
        for (name, stats) in &state.actions {
            tracing::info!("Bench action {}: count={} total={:?}", name, stats.count, stats.total);
        }
    }
}
