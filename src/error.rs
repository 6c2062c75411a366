//! Error types for ChronoVault
//!
//! This module defines every error that can surface from the retention engine.
//! Errors carry enough context to be reported to an operator as-is, and each
//! one maps onto a coarse [`ErrorKind`] that the shell uses when rendering
//! structured failure notifications.
//!
//! ## Propagation
//!
//! - File-level failures (one unreadable source file, one corrupt `.delta`)
//!   are isolated by the engines and recorded in the cycle or restore report.
//! - Slot-level failures (creating or deleting a slot directory) abort the
//!   current cycle.
//! - Configuration failures abort startup.
//!
//! Nothing in the core retries automatically.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the ChronoVault library
pub type Result<T> = std::result::Result<T, ChronoError>;

/// Main error type for all ChronoVault operations
#[derive(Debug, Error)]
pub enum ChronoError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors during bincode serialization/deserialization
    #[error("Bincode error: {0}")]
    Bincode(String),

    /// Configuration value missing or malformed
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Restore target slot does not exist
    #[error("Backup slot not found: {0:?}")]
    SlotNotFound(PathBuf),

    /// Basis file needed to build or apply a delta is absent
    #[error("Basis missing for {path:?}")]
    BasisMissing {
        /// Relative path of the file whose basis is missing
        path: PathBuf,
    },

    /// A slot directory could not be created, replaced or removed
    #[error("Slot operation failed at {path:?}: {source}")]
    SlotIo {
        /// Slot directory involved
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// A directory or file under the source tree could not be read
    #[error("Cannot read {path:?}: {source}")]
    Unreadable {
        /// Path that failed
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// A `.sig` or `.delta` artifact could not be decoded or is inconsistent
    #[error("Corrupt artifact {path:?}: {reason}")]
    CorruptArtifact {
        /// Artifact location
        path: PathBuf,
        /// What was wrong with it
        reason: String,
    },

    /// Basis content did not match the hash recorded in a delta
    #[error("Basis hash mismatch - expected: {expected}, actual: {actual}")]
    HashMismatch {
        /// Hash recorded when the delta was built
        expected: String,
        /// Hash of the basis supplied at apply time
        actual: String,
    },

    /// A delta copy operation reached past the end of the basis
    #[error("Delta copy {offset}+{len} exceeds basis of {basis_len} bytes")]
    DeltaOutOfRange {
        /// Copy offset
        offset: u64,
        /// Copy length
        len: u64,
        /// Actual basis length
        basis_len: u64,
    },

    /// A source file's name is one the slot layout reserves for artifacts
    #[error("{path:?} collides with a backup artifact name")]
    ArtifactCollision {
        /// Relative path of the refused source file
        path: PathBuf,
    },

    /// Another operation holds the workspace lock
    #[error("Busy: {0}")]
    Busy(String),

    /// Invalid file-type pattern
    #[error("Invalid file pattern: {0}")]
    InvalidPattern(#[from] globset::Error),

    /// Walk directory error from walkdir crate
    #[error("Walk directory error")]
    WalkDir(#[from] walkdir::Error),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

// Implement conversions for bincode 2.0 error types
impl From<bincode::error::DecodeError> for ChronoError {
    fn from(err: bincode::error::DecodeError) -> Self {
        ChronoError::Bincode(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for ChronoError {
    fn from(err: bincode::error::EncodeError) -> Self {
        ChronoError::Bincode(err.to_string())
    }
}

/// Coarse failure taxonomy used in notifications and reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Configuration rejected at startup
    ConfigInvalid,
    /// Restore target missing
    SlotNotFound,
    /// Delta basis absent; the file was skipped
    BasisMissing,
    /// Copy/read/write/delete failure
    IoFailure,
    /// Slot directory name did not follow the naming convention
    ParseSkipped,
    /// Workspace lock held by a running cycle
    Busy,
    /// Source file name collides with an artifact name; the file was skipped
    NameCollision,
    /// Artifact undecodable or basis hash mismatch
    Corrupt,
    /// Anything else
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::ConfigInvalid => "config-invalid",
            ErrorKind::SlotNotFound => "slot-not-found",
            ErrorKind::BasisMissing => "basis-missing",
            ErrorKind::IoFailure => "io-failure",
            ErrorKind::ParseSkipped => "parse-skipped",
            ErrorKind::Busy => "busy",
            ErrorKind::NameCollision => "name-collision",
            ErrorKind::Corrupt => "corrupt",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

impl ChronoError {
    /// Create a configuration error with a custom message
    pub fn config(msg: impl Into<String>) -> Self {
        ChronoError::ConfigInvalid(msg.into())
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        ChronoError::Internal(msg.into())
    }

    /// Wrap an I/O failure on a source path
    pub fn unreadable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ChronoError::Unreadable {
            path: path.into(),
            source,
        }
    }

    /// Create a corrupt-artifact error
    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        ChronoError::CorruptArtifact {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Wrap an I/O failure on a slot directory
    pub fn slot_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ChronoError::SlotIo {
            path: path.into(),
            source,
        }
    }

    /// Map this error onto the notification taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChronoError::ConfigInvalid(_) | ChronoError::InvalidPattern(_) => {
                ErrorKind::ConfigInvalid
            }
            ChronoError::SlotNotFound(_) => ErrorKind::SlotNotFound,
            ChronoError::BasisMissing { .. } => ErrorKind::BasisMissing,
            ChronoError::Io(_)
            | ChronoError::SlotIo { .. }
            | ChronoError::Unreadable { .. }
            | ChronoError::WalkDir(_) => ErrorKind::IoFailure,
            ChronoError::Busy(_) => ErrorKind::Busy,
            ChronoError::ArtifactCollision { .. } => ErrorKind::NameCollision,
            ChronoError::CorruptArtifact { .. }
            | ChronoError::HashMismatch { .. }
            | ChronoError::DeltaOutOfRange { .. }
            | ChronoError::Bincode(_)
            | ChronoError::Json(_) => ErrorKind::Corrupt,
            ChronoError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the failure is confined to a single file
    ///
    /// File-scoped failures are recorded in a report and the surrounding cycle
    /// or restore carries on with the next file.
    pub fn is_file_scoped(&self) -> bool {
        matches!(
            self,
            ChronoError::Io(_)
                | ChronoError::Unreadable { .. }
                | ChronoError::WalkDir(_)
                | ChronoError::BasisMissing { .. }
                | ChronoError::ArtifactCollision { .. }
                | ChronoError::CorruptArtifact { .. }
                | ChronoError::HashMismatch { .. }
                | ChronoError::DeltaOutOfRange { .. }
                | ChronoError::Bincode(_)
        )
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            ChronoError::SlotNotFound(path) => {
                format!("Backup slot {:?} not found. Use 'chronovault list' to see available slots.", path)
            }
            ChronoError::Busy(_) => {
                "A backup cycle is in progress. Wait for it to finish, then retry the restore.".to_string()
            }
            ChronoError::ConfigInvalid(msg) => {
                format!("Configuration rejected: {}. Check the config file and try again.", msg)
            }
            ChronoError::BasisMissing { path } => {
                format!(
                    "Cannot apply patch for {:?}: the original file is no longer at the source location.",
                    path
                )
            }
            ChronoError::ArtifactCollision { path } => {
                format!(
                    "{:?} was not backed up: its name is reserved for backup artifacts. Rename it or use full backups.",
                    path
                )
            }
            _ => self.to_string(),
        }
    }
}
