//! Core data types used throughout ChronoVault
//!
//! This module contains the records shared between the engines, the
//! scheduler and the shell.
//!
//! ## Overview
//!
//! - **Walk output**: `FileRecord` - one candidate file for the current cycle
//! - **Slots**: `BackupSlot`, `SlotInfo`, `SlotMetadata` - on-disk snapshot directories
//! - **Scheduling**: `ScheduleState`, `BackupMode` - what the loop is doing
//! - **Results**: `CycleReport`, `RestoreReport`, `FileFailure` - outcomes of operations
//! - **Progress**: `ProgressInfo`, `ProgressCallback` - per-file progress for long restores

use crate::error::{ChronoError, ErrorKind};
use chrono::{DateTime, Local, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// A candidate file discovered by the walker
///
/// Transient; lives for one cycle only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Absolute path used for I/O
    pub path: PathBuf,
    /// Path relative to the source root, mirrored inside the slot
    pub relative_path: PathBuf,
    /// Last modification time
    pub modified_at: DateTime<Utc>,
    /// Size at discovery time; the file may change before it is read
    pub size_hint: u64,
}

/// How a cycle stores files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackupMode {
    /// Every matching file is copied verbatim
    Full,
    /// Only files modified since the last cycle; stored as signature + delta
    ModifiedOnly,
}

impl std::fmt::Display for BackupMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackupMode::Full => f.write_str("full"),
            BackupMode::ModifiedOnly => f.write_str("modified-only"),
        }
    }
}

/// A slot freshly created for the current cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSlot {
    /// Position in the retention ring, `1..=max_backups`
    pub index: u32,
    /// Local creation time encoded in the directory name
    pub created_at: DateTime<Local>,
    /// Slot directory
    pub path: PathBuf,
}

/// A slot discovered on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    /// Parsed ring index
    pub index: u32,
    /// Wall-clock time from the directory name, if it parsed
    pub created_at: Option<NaiveDateTime>,
    /// Directory name
    pub name: String,
    /// Slot directory
    pub path: PathBuf,
    /// Sidecar contents, if present and readable
    pub metadata: Option<SlotMetadata>,
}

impl SlotInfo {
    /// Best available creation time
    ///
    /// The sidecar's timestamp has sub-second precision; the directory name
    /// only has minutes.
    pub fn created_utc(&self) -> Option<DateTime<Utc>> {
        if let Some(meta) = &self.metadata {
            return Some(meta.created_at);
        }
        self.created_at
            .and_then(|naive| naive.and_local_timezone(Local).earliest())
            .map(|local| local.with_timezone(&Utc))
    }
}

/// Sidecar written as `.slot.json` into every committed slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotMetadata {
    /// Ring index
    pub index: u32,
    /// Commit time
    pub created_at: DateTime<Utc>,
    /// Number of files stored (full copies plus patches)
    pub file_count: usize,
    /// Bytes written into the slot, artifacts included
    pub bytes_written: u64,
    /// Mode of the cycle that produced the slot
    pub mode: BackupMode,
    /// Host that wrote the slot
    pub hostname: String,
    /// ChronoVault version that wrote the slot
    pub version: String,
}

/// Scheduler state visible to the shell
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleState {
    /// Start instant of the last non-empty cycle
    pub last_backup_at: Option<DateTime<Utc>>,
    /// When the next cycle is due
    pub next_backup_at: Option<DateTime<Utc>>,
    /// Whether the loop is paused
    pub paused: bool,
    /// Ring index the next non-empty cycle will write
    pub current_index: u32,
    /// Cycles that wrote at least one file
    pub cycles_completed: u64,
}

/// A file that could not be processed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFailure {
    /// Path relative to the source root or slot
    pub relative_path: PathBuf,
    /// Failure category
    pub kind: ErrorKind,
    /// Human-readable cause
    pub message: String,
}

impl FileFailure {
    /// Record `error` against `relative_path`
    pub fn new(relative_path: impl Into<PathBuf>, error: &ChronoError) -> Self {
        Self {
            relative_path: relative_path.into(),
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Outcome of one backup cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    /// Index written, `None` when the cycle was empty
    pub slot_index: Option<u32>,
    /// Slot directory, `None` when the cycle was empty
    pub slot_path: Option<PathBuf>,
    /// Files stored (full copies plus patches)
    pub files_written: usize,
    /// Verbatim copies
    pub full_copies: usize,
    /// Files stored as signature + delta
    pub patches_written: usize,
    /// Bytes written into the slot
    pub bytes_written: u64,
    /// Files that failed and were skipped
    pub failures: Vec<FileFailure>,
    /// Cycle start
    pub started_at: DateTime<Utc>,
    /// Cycle end
    pub finished_at: DateTime<Utc>,
}

impl CycleReport {
    /// Whether the cycle wrote nothing and its slot was discarded
    pub fn is_empty(&self) -> bool {
        self.slot_index.is_none()
    }
}

/// Outcome of a restore
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestoreReport {
    /// Slot restored from
    pub slot_path: PathBuf,
    /// Files written back into the source tree
    pub files_restored: usize,
    /// Of those, reconstructed from a delta
    pub patches_applied: usize,
    /// Of those, copied verbatim
    pub full_copies: usize,
    /// Bytes written into the source tree
    pub bytes_written: u64,
    /// Files that could not be restored
    pub skipped: Vec<FileFailure>,
    /// Time taken in milliseconds
    pub duration_ms: u64,
}

/// Progress callback for long-running operations
pub type ProgressCallback = Arc<dyn Fn(ProgressInfo) + Send + Sync>;

/// Information passed to progress callbacks
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Operation being performed
    pub operation: &'static str,
    /// Current item being processed
    pub current_item: Option<String>,
    /// Items processed so far
    pub processed: usize,
    /// Total items to process (if known)
    pub total: Option<usize>,
}

impl ProgressInfo {
    /// Get progress as a percentage (0-100)
    pub fn percentage(&self) -> Option<f32> {
        match self.total {
            Some(total) if total > 0 => Some((self.processed as f32 / total as f32) * 100.0),
            _ => None,
        }
    }
}
