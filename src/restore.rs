//! Reconstructing the source tree from a slot
//!
//! Restore walks a slot and writes every stored file back to the same
//! relative path under the source root, overwriting what is there.
//!
//! A slot whose sidecar records a full backup holds nothing but verbatim
//! copies, so every file except the sidecar is copied back as-is, whatever
//! its name. Otherwise an entry is treated according to its name and its
//! siblings:
//!
//! | entry in slot                  | action                                   |
//! |--------------------------------|------------------------------------------|
//! | `X.delta` with sibling `X.sig` | apply to `source/X`, overwrite in place  |
//! | `X.sig` next to `X` or `X.delta` | signature only, skipped                |
//! | `.slot.json` at the slot root  | sidecar, skipped                         |
//! | anything else                  | copied verbatim                          |
//!
//! A delta is a patch against whatever `source/X` holds at restore time. If
//! `source/X` is gone, a delta made only of literal bytes is still written
//! out as a full copy; any other delta is skipped with `BasisMissing`. A
//! patched file keeps the permissions of the basis it replaced; a copied
//! file takes the permissions of its slot copy.
//!
//! Restores are destructive and cannot run while a backup cycle holds the
//! workspace lock; they fail fast with [`ChronoError::Busy`] instead.

use crate::compression::ArtifactCodec;
use crate::delta;
use crate::error::{ChronoError, Result};
use crate::events::{BackupEvent, EventSink};
use crate::slot::{self, METADATA_FILE};
use crate::snapshot::{WorkspaceLock, DELTA_SUFFIX, SIGNATURE_SUFFIX};
use crate::types::{BackupMode, FileFailure, ProgressCallback, ProgressInfo, RestoreReport};
use crate::utils;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, trace, warn};
use walkdir::WalkDir;

/// How one slot entry is restored
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotEntry {
    /// Verbatim copy of `relative`
    Full {
        /// Path relative to the slot and the source root
        relative: PathBuf,
    },
    /// Delta to apply to `relative`
    Patch {
        /// Path of the reconstructed file
        relative: PathBuf,
        /// The `.delta` artifact, relative to the slot
        delta: PathBuf,
    },
    /// Not restored
    Skip,
}

/// Classify `relative` (a file inside `slot`)
///
/// `mode` is the backup mode recorded in the slot's sidecar, if any. Names
/// are only interpreted as artifacts when the slot is not a full backup.
pub fn classify(slot: &Path, relative: &Path, mode: Option<BackupMode>) -> SlotEntry {
    if relative == Path::new(METADATA_FILE) {
        return SlotEntry::Skip;
    }
    if mode == Some(BackupMode::Full) {
        return SlotEntry::Full {
            relative: relative.to_path_buf(),
        };
    }
    let name = relative.to_string_lossy();

    if let Some(base) = name.strip_suffix(DELTA_SUFFIX) {
        let base = PathBuf::from(base);
        if slot.join(utils::with_suffix(&base, SIGNATURE_SUFFIX)).is_file() {
            return SlotEntry::Patch {
                relative: base,
                delta: relative.to_path_buf(),
            };
        }
    }
    if let Some(base) = name.strip_suffix(SIGNATURE_SUFFIX) {
        let base = PathBuf::from(base);
        if slot.join(&base).is_file() || slot.join(utils::with_suffix(&base, DELTA_SUFFIX)).is_file()
        {
            return SlotEntry::Skip;
        }
    }
    SlotEntry::Full {
        relative: relative.to_path_buf(),
    }
}

enum Restored {
    Full { bytes: u64 },
    Patched { bytes: u64 },
}

/// Writes slot contents back into a source tree
pub struct RestoreEngine {
    codec: ArtifactCodec,
    verify_basis: bool,
    workspace: WorkspaceLock,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for RestoreEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestoreEngine")
            .field("codec", &self.codec)
            .field("verify_basis", &self.verify_basis)
            .finish()
    }
}

impl RestoreEngine {
    /// Create an engine sharing `workspace` with the snapshot engine
    pub fn new(
        codec: ArtifactCodec,
        verify_basis: bool,
        workspace: WorkspaceLock,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            codec,
            verify_basis,
            workspace,
            sink,
        }
    }

    /// Restore every file in `slot_path` into `source_root`
    pub fn restore(&self, slot_path: &Path, source_root: &Path) -> Result<RestoreReport> {
        self.restore_with_progress(slot_path, source_root, None)
    }

    /// [`restore`](Self::restore), reporting each file to `progress`
    #[instrument(skip(self, progress))]
    pub fn restore_with_progress(
        &self,
        slot_path: &Path,
        source_root: &Path,
        progress: Option<ProgressCallback>,
    ) -> Result<RestoreReport> {
        if !slot_path.is_dir() {
            let err = ChronoError::SlotNotFound(slot_path.to_path_buf());
            self.sink.notify(&BackupEvent::failed("restore", &err));
            return Err(err);
        }
        let Some(_guard) = self.workspace.try_lock() else {
            let err = ChronoError::Busy("a backup cycle is writing to the workspace".into());
            self.sink.notify(&BackupEvent::failed("restore", &err));
            return Err(err);
        };

        let mode = slot_mode(slot_path);
        info!(
            "Restoring {:?} into {:?} (mode: {})",
            slot_path,
            source_root,
            mode.map_or_else(|| "unknown".to_string(), |m| m.to_string())
        );
        let start = Instant::now();
        let mut report = RestoreReport {
            slot_path: slot_path.to_path_buf(),
            ..Default::default()
        };

        let mut entries = Vec::new();
        for entry in WalkDir::new(slot_path).min_depth(1).sort_by_file_name() {
            match entry {
                Ok(entry) if entry.file_type().is_file() => {
                    let relative = utils::make_relative(entry.path(), slot_path)?;
                    entries.push(relative);
                }
                Ok(_) => {}
                Err(e) => {
                    let relative = e
                        .path()
                        .and_then(|p| p.strip_prefix(slot_path).ok())
                        .map(Path::to_path_buf)
                        .unwrap_or_default();
                    let err = ChronoError::from(e);
                    warn!("Cannot read slot entry {:?}: {}", relative, err);
                    report.skipped.push(FileFailure::new(relative, &err));
                }
            }
        }

        let total = entries.len();
        for (processed, relative) in entries.iter().enumerate() {
            if let Some(callback) = &progress {
                callback(ProgressInfo {
                    operation: "restore",
                    current_item: Some(relative.to_string_lossy().into_owned()),
                    processed,
                    total: Some(total),
                });
            }

            let entry = classify(slot_path, relative, mode);
            let target_relative = match &entry {
                SlotEntry::Skip => {
                    trace!("Skipping {:?}", relative);
                    continue;
                }
                SlotEntry::Full { relative } | SlotEntry::Patch { relative, .. } => {
                    relative.clone()
                }
            };

            match self.restore_entry(slot_path, source_root, &entry) {
                Ok(Restored::Full { bytes }) => {
                    report.files_restored += 1;
                    report.full_copies += 1;
                    report.bytes_written += bytes;
                }
                Ok(Restored::Patched { bytes }) => {
                    report.files_restored += 1;
                    report.patches_applied += 1;
                    report.bytes_written += bytes;
                }
                Err(e) => {
                    warn!("Skipping {:?}: {}", target_relative, e);
                    self.sink.notify(&BackupEvent::failed(
                        &format!("restore {}", target_relative.display()),
                        &e,
                    ));
                    report.skipped.push(FileFailure::new(&target_relative, &e));
                }
            }
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Restored {} files from {:?} in {}ms ({} patched, {} skipped)",
            report.files_restored,
            slot_path,
            report.duration_ms,
            report.patches_applied,
            report.skipped.len()
        );
        self.sink.notify(&BackupEvent::RestoreCompleted {
            slot_path: slot_path.to_path_buf(),
            files_restored: report.files_restored,
            files_skipped: report.skipped.len(),
        });
        Ok(report)
    }

    /// Reconstruct a single tracked file from `slot_path`
    ///
    /// `relative` names the original file (`docs/a.txt`), not its artifacts.
    #[instrument(skip(self))]
    pub fn restore_file(
        &self,
        slot_path: &Path,
        relative: &Path,
        source_root: &Path,
    ) -> Result<RestoreReport> {
        if !slot_path.is_dir() {
            return Err(ChronoError::SlotNotFound(slot_path.to_path_buf()));
        }
        let Some(_guard) = self.workspace.try_lock() else {
            return Err(ChronoError::Busy(
                "a backup cycle is writing to the workspace".into(),
            ));
        };

        let start = Instant::now();
        let delta_rel = utils::with_suffix(relative, DELTA_SUFFIX);
        let full_backup = slot_mode(slot_path) == Some(BackupMode::Full);
        let entry = if !full_backup
            && slot_path.join(&delta_rel).is_file()
            && slot_path
                .join(utils::with_suffix(relative, SIGNATURE_SUFFIX))
                .is_file()
        {
            SlotEntry::Patch {
                relative: relative.to_path_buf(),
                delta: delta_rel,
            }
        } else if slot_path.join(relative).is_file() {
            SlotEntry::Full {
                relative: relative.to_path_buf(),
            }
        } else {
            return Err(ChronoError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} is not stored in {}", relative.display(), slot_path.display()),
            )));
        };

        let mut report = RestoreReport {
            slot_path: slot_path.to_path_buf(),
            ..Default::default()
        };
        match self.restore_entry(slot_path, source_root, &entry)? {
            Restored::Full { bytes } => {
                report.full_copies = 1;
                report.bytes_written = bytes;
            }
            Restored::Patched { bytes } => {
                report.patches_applied = 1;
                report.bytes_written = bytes;
            }
        }
        report.files_restored = 1;
        report.duration_ms = start.elapsed().as_millis() as u64;
        debug!("Restored {:?} from {:?}", relative, slot_path);
        Ok(report)
    }

    fn restore_entry(&self, slot: &Path, source_root: &Path, entry: &SlotEntry) -> Result<Restored> {
        match entry {
            SlotEntry::Full { relative } => {
                let bytes = utils::copy_file_atomic(&slot.join(relative), &source_root.join(relative))?;
                trace!("Copied {:?} back ({} bytes)", relative, bytes);
                Ok(Restored::Full { bytes })
            }
            SlotEntry::Patch { relative, delta } => {
                let patch = self.codec.read_delta(&slot.join(delta))?;
                let basis_path = source_root.join(relative);

                let (output, permissions) = match fs::read(&basis_path) {
                    Ok(basis) => {
                        let output = if self.verify_basis {
                            delta::apply_delta_verified(&basis, &patch)?
                        } else {
                            delta::apply_delta(&basis, &patch)?
                        };
                        let permissions = fs::metadata(&basis_path)
                            .map_err(|e| ChronoError::unreadable(&basis_path, e))?
                            .permissions();
                        (output, Some(permissions))
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        if !patch.is_literal_only() {
                            return Err(ChronoError::BasisMissing {
                                path: relative.clone(),
                            });
                        }
                        debug!("Basis for {:?} missing; delta is literal-only", relative);
                        (delta::apply_delta(&[], &patch)?, None)
                    }
                    Err(e) => return Err(ChronoError::unreadable(&basis_path, e)),
                };

                utils::atomic_write_with_permissions(&basis_path, &output, permissions)?;
                trace!("Patched {:?} ({} bytes)", relative, output.len());
                Ok(Restored::Patched {
                    bytes: output.len() as u64,
                })
            }
            SlotEntry::Skip => Err(ChronoError::internal("skip entries are not restorable")),
        }
    }
}

/// Backup mode recorded in the slot's sidecar
///
/// An unreadable sidecar is treated like a missing one, so the slot is
/// still restored by name.
fn slot_mode(slot_path: &Path) -> Option<BackupMode> {
    match slot::read_metadata(slot_path) {
        Ok(metadata) => metadata.map(|m| m.mode),
        Err(e) => {
            warn!("Ignoring unreadable sidecar in {:?}: {}", slot_path, e);
            None
        }
    }
}
