//! Backup engine configuration.
//!
//! Defaults are production values; `from_env()` lets hosts and test rigs
//! override individual knobs through `UMBRA_BACKUP_*` variables.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::stream::encrypted::MIN_SEGMENT_SIZE;

/// Current backup format version written into every header.
pub const BACKUP_FORMAT_VERSION: u64 = 1;

/// Default maximum size of a single length-delimited unit (16 MiB).
pub const DEFAULT_MAX_UNIT_SIZE: usize = 16 * 1024 * 1024;

/// Default plaintext size of one encrypted segment (64 KiB).
pub const DEFAULT_SEGMENT_SIZE: usize = 64 * 1024;

/// Default number of sample ids and frames kept per collapsed error group.
pub const DEFAULT_ERROR_SAMPLE_LIMIT: usize = 10;

/// Remote backups skip messages that expire within this window (24 hours).
pub const DEFAULT_REMOTE_EXPIRY_WINDOW_MS: u64 = 24 * 60 * 60 * 1000;

/// Configuration for export and import passes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Header versions an import accepts
    pub supported_versions: Vec<u64>,
    /// Largest unit the reader accepts and the writer emits
    pub max_unit_size: usize,
    /// Plaintext bytes per encrypted segment
    pub segment_size: usize,
    /// Samples retained per collapsed error group
    pub error_sample_limit: usize,
    /// Per-unit duration above which a bench bucket counts as slow
    pub bench_warning_threshold_ms: u64,
    /// Log every bench bucket, not just the slowest ones
    pub detailed_bench_logging: bool,
    /// Expiry window applied to remote backups
    pub remote_expiry_window_ms: u64,
    /// Tables whose secondary indexes are dropped for the restore
    pub restore_index_tables: Vec<String>,
    /// Abort on the first dropped frame instead of collecting it
    pub fail_on_any_frame_error: bool,
    /// App version recorded in exported headers
    pub current_app_version: String,
    /// First app version this installation ran
    pub first_app_version: String,
    /// Directory for staging export output (system temp dir if None)
    pub scratch_dir: Option<PathBuf>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            supported_versions: vec![BACKUP_FORMAT_VERSION],
            max_unit_size: DEFAULT_MAX_UNIT_SIZE,
            segment_size: DEFAULT_SEGMENT_SIZE,
            error_sample_limit: DEFAULT_ERROR_SAMPLE_LIMIT,
            bench_warning_threshold_ms: 25,
            detailed_bench_logging: false,
            remote_expiry_window_ms: DEFAULT_REMOTE_EXPIRY_WINDOW_MS,
            restore_index_tables: vec!["interactions".to_string(), "reactions".to_string()],
            fail_on_any_frame_error: false,
            current_app_version: env!("CARGO_PKG_VERSION").to_string(),
            first_app_version: env!("CARGO_PKG_VERSION").to_string(),
            scratch_dir: None,
        }
    }
}

impl BackupConfig {
    /// Defaults, overridden by any `UMBRA_BACKUP_*` variables that parse.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(raw) = env::var("UMBRA_BACKUP_SUPPORTED_VERSIONS") {
            let versions: Vec<u64> = raw
                .split(',')
                .filter_map(|v| v.trim().parse().ok())
                .collect();
            if !versions.is_empty() {
                config.supported_versions = versions;
            }
        }
        override_parsed(&mut config.max_unit_size, "UMBRA_BACKUP_MAX_UNIT_SIZE");
        override_parsed(&mut config.segment_size, "UMBRA_BACKUP_SEGMENT_SIZE");
        override_parsed(&mut config.error_sample_limit, "UMBRA_BACKUP_ERROR_SAMPLE_LIMIT");
        override_parsed(
            &mut config.bench_warning_threshold_ms,
            "UMBRA_BACKUP_BENCH_WARNING_MS",
        );
        override_parsed(&mut config.detailed_bench_logging, "UMBRA_BACKUP_DETAILED_BENCH");
        override_parsed(
            &mut config.remote_expiry_window_ms,
            "UMBRA_BACKUP_REMOTE_EXPIRY_WINDOW_MS",
        );
        override_parsed(
            &mut config.fail_on_any_frame_error,
            "UMBRA_BACKUP_FAIL_ON_ANY_FRAME_ERROR",
        );
        if let Ok(tables) = env::var("UMBRA_BACKUP_RESTORE_INDEX_TABLES") {
            config.restore_index_tables = tables
                .split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
        }
        if let Ok(version) = env::var("UMBRA_BACKUP_APP_VERSION") {
            config.current_app_version = version;
        }
        if let Ok(version) = env::var("UMBRA_BACKUP_FIRST_APP_VERSION") {
            config.first_app_version = version;
        }
        config.scratch_dir = env::var("UMBRA_BACKUP_SCRATCH_DIR").ok().map(PathBuf::from);

        config
    }

    /// Reject settings no pass could run with.
    pub fn validate(&self) -> Result<()> {
        if self.supported_versions.is_empty() {
            return Err(Error::InvalidConfig("no supported versions".into()));
        }
        if self.max_unit_size == 0 || self.max_unit_size > u32::MAX as usize {
            return Err(Error::InvalidConfig(format!(
                "max_unit_size out of range: {}",
                self.max_unit_size
            )));
        }
        if self.segment_size < MIN_SEGMENT_SIZE || self.segment_size > self.max_unit_size {
            return Err(Error::InvalidConfig(format!(
                "segment_size out of range: {}",
                self.segment_size
            )));
        }
        if self.error_sample_limit == 0 {
            return Err(Error::InvalidConfig("error_sample_limit must be positive".into()));
        }
        Ok(())
    }

    /// Whether `version` is accepted by import.
    pub fn supports_version(&self, version: u64) -> bool {
        self.supported_versions.contains(&version)
    }
}

fn override_parsed<T: FromStr>(slot: &mut T, var: &str) {
    if let Some(value) = env::var(var).ok().and_then(|v| v.trim().parse().ok()) {
        *slot = value;
    }
}
