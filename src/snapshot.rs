//! One backup cycle
//!
//! [`SnapshotEngine::run_cycle`] turns the current state of the source tree
//! into one committed slot:
//!
//! 1. Resolve the target index (re-derived from disk on the first cycle).
//! 2. Take the workspace lock shared with restore.
//! 3. Replace whatever slot holds that index with a fresh directory.
//! 4. Walk the candidates; in modified-only mode only files modified after
//!    the previous cycle's start.
//! 5. Store each candidate, in parallel:
//!    - full mode: verbatim copy at the same relative path;
//!    - modified-only mode: `X.sig` with the signature of the current
//!      content, plus `X.delta` against the most recent earlier signature of
//!      `X`, or a verbatim copy of `X` when no earlier signature exists.
//! 6. Nothing stored: discard the slot and keep the index. Otherwise write
//!    the `.slot.json` sidecar and advance the ring.
//!
//! A file that fails is recorded in the [`CycleReport`] and skipped; slot
//! creation or deletion failures abort the cycle.
//!
//! Source files whose slot path is reserved are refused with
//! [`ChronoError::ArtifactCollision`]: `.slot.json` at the root in either
//! mode, and in modified-only mode any name ending in `.sig` or `.delta`.
//! Every `.sig`/`.delta` in a modified-only slot is therefore an artifact,
//! and no two candidates ever write the same slot path.

use crate::compression::ArtifactCodec;
use crate::delta::{self, Signature};
use crate::error::{ChronoError, Result};
use crate::events::{BackupEvent, EventSink};
use crate::ring::RetentionRing;
use crate::slot::{SlotManager, METADATA_FILE};
use crate::types::{BackupMode, BackupSlot, CycleReport, FileFailure, FileRecord, SlotMetadata};
use crate::utils;
use crate::walker::FileWalker;
use chrono::{DateTime, Local, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, trace, warn};

/// Suffix of signature artifacts
pub const SIGNATURE_SUFFIX: &str = ".sig";
/// Suffix of delta artifacts
pub const DELTA_SUFFIX: &str = ".delta";

/// Lock serialising backup cycles and restores over the same workspace
pub type WorkspaceLock = Arc<Mutex<()>>;

/// What a single file turned into
enum Stored {
    FullCopy { bytes: u64 },
    Patch { bytes: u64 },
}

/// Runs backup cycles for one source tree
pub struct SnapshotEngine {
    source: PathBuf,
    slots: SlotManager,
    patterns: Vec<String>,
    recursive: bool,
    mode: BackupMode,
    max_backups: u32,
    ring: Option<RetentionRing>,
    codec: ArtifactCodec,
    /// Latest signature written per relative path, this process only
    signatures: DashMap<PathBuf, Signature>,
    workspace: WorkspaceLock,
    pool: rayon::ThreadPool,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for SnapshotEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotEngine")
            .field("source", &self.source)
            .field("backup_root", &self.slots.root())
            .field("mode", &self.mode)
            .field("ring", &self.ring)
            .field("cached_signatures", &self.signatures.len())
            .finish()
    }
}

/// Settings for a [`SnapshotEngine`]
#[derive(Debug, Clone)]
pub struct SnapshotSettings {
    /// Source root
    pub source: PathBuf,
    /// Backup root
    pub backup_root: PathBuf,
    /// File-name patterns
    pub patterns: Vec<String>,
    /// Descend into subdirectories
    pub recursive: bool,
    /// Full or modified-only
    pub mode: BackupMode,
    /// Ring size
    pub max_backups: u32,
    /// Worker threads for per-file work
    pub parallel_workers: usize,
}

impl SnapshotEngine {
    /// Create an engine
    pub fn new(
        settings: SnapshotSettings,
        codec: ArtifactCodec,
        workspace: WorkspaceLock,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(settings.parallel_workers.max(1))
            .thread_name(|i| format!("chronovault-worker-{}", i))
            .build()
            .map_err(|e| ChronoError::internal(format!("cannot start worker pool: {}", e)))?;

        Ok(Self {
            source: settings.source,
            slots: SlotManager::new(settings.backup_root),
            patterns: settings.patterns,
            recursive: settings.recursive,
            mode: settings.mode,
            max_backups: settings.max_backups.max(1),
            ring: None,
            codec,
            signatures: DashMap::new(),
            workspace,
            pool,
            sink,
        })
    }

    /// Ring position, `None` until the first cycle resolves it
    pub fn ring(&self) -> Option<RetentionRing> {
        self.ring
    }

    /// Index the next non-empty cycle will write, resolving it from disk if needed
    pub fn current_index(&mut self) -> Result<u32> {
        Ok(self.resolve_ring()?.current())
    }

    /// Mode in use
    pub fn mode(&self) -> BackupMode {
        self.mode
    }

    fn resolve_ring(&mut self) -> Result<&mut RetentionRing> {
        if self.ring.is_none() {
            self.ring = Some(RetentionRing::resume(self.slots.root(), self.max_backups)?);
        }
        self.ring
            .as_mut()
            .ok_or_else(|| ChronoError::internal("retention ring unavailable"))
    }

    /// Run one cycle
    ///
    /// `last_backup_at` is the start of the previous non-empty cycle; it is
    /// only consulted in modified-only mode. The caller records
    /// `report.started_at` as the new value when the report is non-empty.
    ///
    /// An error aborting the cycle is also reported to the sink.
    #[instrument(skip(self), fields(source = ?self.source))]
    pub fn run_cycle(&mut self, last_backup_at: Option<DateTime<Utc>>) -> Result<CycleReport> {
        self.cycle(last_backup_at).inspect_err(|e| {
            self.sink.notify(&BackupEvent::failed("backup cycle", e));
        })
    }

    fn cycle(&mut self, last_backup_at: Option<DateTime<Utc>>) -> Result<CycleReport> {
        let started_local = Local::now();
        let started_at = started_local.with_timezone(&Utc);

        let index = self.resolve_ring()?.current();
        let workspace = Arc::clone(&self.workspace);
        let _guard = workspace.lock();

        let cutoff = match self.mode {
            BackupMode::ModifiedOnly => last_backup_at,
            BackupMode::Full => None,
        };
        let walk = FileWalker::new(self.source.clone())
            .with_patterns(self.patterns.clone())
            .with_recursive(self.recursive)
            .with_modified_after(cutoff)
            .walk()?;

        info!("Starting {} backup cycle into slot {}", self.mode, index);
        let slot = self.slots.replace_at(index, started_local)?;

        let mut failures = Vec::new();
        let mut candidates = Vec::new();
        for item in walk {
            match item {
                Ok(record) if self.is_reserved(&record.relative_path) => {
                    let e = ChronoError::ArtifactCollision {
                        path: record.relative_path.clone(),
                    };
                    warn!("Refusing {:?}: {}", record.relative_path, e);
                    failures.push(FileFailure::new(&record.relative_path, &e));
                }
                Ok(record) => candidates.push(record),
                Err(e) => {
                    warn!("Walk error: {}", e);
                    failures.push(walk_failure(&e, &self.source));
                }
            }
        }
        debug!("{} candidate files", candidates.len());

        let prior_slots = if self.mode == BackupMode::ModifiedOnly {
            self.prior_slots(&slot.path)?
        } else {
            Vec::new()
        };

        let results: Vec<(PathBuf, Result<Stored>)> = self.pool.install(|| {
            candidates
                .par_iter()
                .map(|record| {
                    let outcome = match self.mode {
                        BackupMode::Full => self.store_full(record, &slot.path),
                        BackupMode::ModifiedOnly => {
                            self.store_modified(record, &slot.path, &prior_slots)
                        }
                    };
                    (record.relative_path.clone(), outcome)
                })
                .collect()
        });

        let mut full_copies = 0;
        let mut patches_written = 0;
        let mut bytes_written = 0u64;
        for (relative_path, outcome) in results {
            match outcome {
                Ok(Stored::FullCopy { bytes }) => {
                    full_copies += 1;
                    bytes_written += bytes;
                }
                Ok(Stored::Patch { bytes }) => {
                    patches_written += 1;
                    bytes_written += bytes;
                }
                Err(e) => {
                    warn!("Failed to back up {:?}: {}", relative_path, e);
                    failures.push(FileFailure::new(&relative_path, &e));
                }
            }
        }
        for failure in &failures {
            self.sink.notify(&BackupEvent::Failed {
                kind: failure.kind,
                context: format!(
                    "backup {}: {}",
                    failure.relative_path.display(),
                    failure.message
                ),
            });
        }

        let files_written = full_copies + patches_written;
        if files_written == 0 {
            self.slots.discard(&slot.path)?;
            info!("Nothing to back up; discarded slot {}", index);
            self.sink.notify(&BackupEvent::CycleSkipped { at: started_at });
            return Ok(CycleReport {
                slot_index: None,
                slot_path: None,
                files_written: 0,
                full_copies: 0,
                patches_written: 0,
                bytes_written: 0,
                failures,
                started_at,
                finished_at: Utc::now(),
            });
        }

        bytes_written += self.commit(&slot, files_written, bytes_written)?;
        let next = self.resolve_ring()?.advance();

        info!(
            "Backup cycle wrote {} files ({} full, {} patches, {}) into slot {}; next slot {}",
            files_written,
            full_copies,
            patches_written,
            utils::format_bytes(bytes_written),
            index,
            next
        );
        self.sink.notify(&BackupEvent::CycleCompleted {
            slot_index: index,
            files_written,
            at: started_at,
        });

        Ok(CycleReport {
            slot_index: Some(index),
            slot_path: Some(slot.path),
            files_written,
            full_copies,
            patches_written,
            bytes_written,
            failures,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Write the sidecar, returning its size
    fn commit(&self, slot: &BackupSlot, file_count: usize, bytes_written: u64) -> Result<u64> {
        let metadata = SlotMetadata {
            index: slot.index,
            created_at: slot.created_at.with_timezone(&Utc),
            file_count,
            bytes_written,
            mode: self.mode,
            hostname: utils::hostname_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        };
        self.slots.write_metadata(&slot.path, &metadata)?;
        let size = fs::metadata(slot.path.join(METADATA_FILE))
            .map(|m| m.len())
            .unwrap_or(0);
        Ok(size)
    }

    /// Other slots, newest first
    fn prior_slots(&self, current: &Path) -> Result<Vec<PathBuf>> {
        let mut slots: Vec<PathBuf> = self
            .slots
            .list()?
            .into_iter()
            .map(|info| info.path)
            .filter(|path| path != current)
            .collect();
        slots.reverse();
        Ok(slots)
    }

    /// Whether `relative` would land on a slot path used for artifacts
    fn is_reserved(&self, relative: &Path) -> bool {
        if relative == Path::new(METADATA_FILE) {
            return true;
        }
        self.mode == BackupMode::ModifiedOnly
            && relative.file_name().is_some_and(|name| {
                let name = name.to_string_lossy();
                name.ends_with(SIGNATURE_SUFFIX) || name.ends_with(DELTA_SUFFIX)
            })
    }

    fn store_full(&self, record: &FileRecord, slot: &Path) -> Result<Stored> {
        let target = slot.join(&record.relative_path);
        let bytes = utils::copy_file_atomic(&record.path, &target)
            .map_err(|e| reattribute(e, &record.path))?;
        trace!("Copied {:?} ({} bytes)", record.relative_path, bytes);
        Ok(Stored::FullCopy { bytes })
    }

    fn store_modified(
        &self,
        record: &FileRecord,
        slot: &Path,
        prior_slots: &[PathBuf],
    ) -> Result<Stored> {
        let unreadable = |e: std::io::Error| ChronoError::unreadable(&record.path, e);
        let permissions = fs::metadata(&record.path).map_err(unreadable)?.permissions();
        let content = fs::read(&record.path).map_err(unreadable)?;
        let signature = delta::build_signature(&content);
        let previous = self.previous_signature(&record.relative_path, prior_slots)?;

        let target = slot.join(&record.relative_path);
        let mut bytes = self
            .codec
            .write_signature(&utils::with_suffix(&target, SIGNATURE_SUFFIX), &signature)?;

        let stored = match previous {
            Some(previous) => {
                let patch = delta::build_delta(&content, &previous);
                bytes += self
                    .codec
                    .write_delta(&utils::with_suffix(&target, DELTA_SUFFIX), &patch)?;
                trace!(
                    "Patched {:?}: {} literal bytes",
                    record.relative_path,
                    patch.literal_bytes()
                );
                Stored::Patch { bytes }
            }
            None => {
                utils::atomic_write_with_permissions(&target, &content, Some(permissions))?;
                bytes += content.len() as u64;
                trace!("First copy of {:?}", record.relative_path);
                Stored::FullCopy { bytes }
            }
        };

        self.signatures
            .insert(record.relative_path.clone(), signature);
        Ok(stored)
    }

    /// Most recent earlier signature of `relative`: cache first, then slots newest first
    fn previous_signature(
        &self,
        relative: &Path,
        prior_slots: &[PathBuf],
    ) -> Result<Option<Signature>> {
        if let Some(cached) = self.signatures.get(relative) {
            return Ok(Some(cached.value().clone()));
        }
        for slot in prior_slots {
            let candidate = utils::with_suffix(&slot.join(relative), SIGNATURE_SUFFIX);
            if candidate.is_file() {
                debug!("Using stored signature {:?}", candidate);
                return self.codec.read_signature(&candidate).map(Some);
            }
        }
        Ok(None)
    }
}

fn reattribute(error: ChronoError, path: &Path) -> ChronoError {
    match error {
        ChronoError::Io(source) if source.kind() == std::io::ErrorKind::NotFound => {
            ChronoError::unreadable(path, source)
        }
        other => other,
    }
}

fn walk_failure(error: &ChronoError, source_root: &Path) -> FileFailure {
    let path = match error {
        ChronoError::Unreadable { path, .. } => path.strip_prefix(source_root).unwrap_or(path),
        _ => source_root,
    };
    FileFailure::new(path, error)
}
