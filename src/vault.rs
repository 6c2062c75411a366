//! Main ChronoVault implementation
//!
//! [`ChronoVault`] ties the engines to one validated [`BackupConfig`]: it owns
//! the snapshot engine, the restore engine and the schedule state, and it
//! hands out a [`SchedulerHandle`] when the periodic loop is started.

use crate::compression::{ArtifactCodec, CompressionStrategy};
use crate::config::BackupConfig;
use crate::error::{ChronoError, Result};
use crate::events::{EventSink, NoOpSink};
use crate::restore::RestoreEngine;
use crate::scheduler::{self, Scheduler, SchedulerHandle, SharedEngine, SharedState};
use crate::slot::SlotManager;
use crate::snapshot::{SnapshotEngine, SnapshotSettings, WorkspaceLock};
use crate::types::{CycleReport, ProgressCallback, RestoreReport, ScheduleState, SlotInfo};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Rotating-slot backups of one source directory
///
/// # Examples
///
/// ```rust,no_run
/// use chronovault::ChronoVaultBuilder;
/// use std::time::Duration;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let vault = ChronoVaultBuilder::new("./documents", "./backups")
///     .file_types(vec!["*.txt".to_string(), "*.md".to_string()])
///     .max_backups(5)
///     .interval(Duration::from_secs(300))
///     .modified_only(true)
///     .build()?;
///
/// let report = vault.run_cycle()?;
/// println!("Wrote {} files", report.files_written);
///
/// for slot in vault.list_slots()? {
///     println!("{}", slot.name);
/// }
/// # Ok(())
/// # }
/// ```
pub struct ChronoVault {
    config: BackupConfig,
    slots: SlotManager,
    engine: SharedEngine,
    restorer: RestoreEngine,
    state: SharedState,
}

impl std::fmt::Debug for ChronoVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChronoVault")
            .field("source", &self.config.source)
            .field("backup_root", &self.config.backup_root)
            .field("mode", &self.config.mode())
            .field("state", &*self.state.read())
            .finish()
    }
}

impl ChronoVault {
    /// Open a vault from a configuration with default codec and sink
    pub fn open(config: BackupConfig) -> Result<Self> {
        ChronoVaultBuilder::from_config(config).build()
    }

    /// Configuration in use
    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    /// Current schedule state
    pub fn schedule_state(&self) -> ScheduleState {
        self.state.read().clone()
    }

    /// Run one backup cycle now
    ///
    /// Waits for a cycle already running on the scheduler.
    pub fn run_cycle(&self) -> Result<CycleReport> {
        let last_backup_at = self.state.read().last_backup_at;
        let mut engine = self.engine.lock();
        let report = engine.run_cycle(last_backup_at);
        let current = engine.ring().map(|ring| ring.current());
        drop(engine);

        scheduler::record_cycle(&self.state, report.as_ref().ok(), current);
        report
    }

    /// All slots, oldest first
    pub fn list_slots(&self) -> Result<Vec<SlotInfo>> {
        self.slots.list()
    }

    /// Directory currently holding ring index `index`
    pub fn slot_path(&self, index: u32) -> Result<PathBuf> {
        self.slots
            .find_by_index(index)?
            .ok_or_else(|| ChronoError::SlotNotFound(self.slots.root().join(format!("{}_*", index))))
    }

    /// Restore the slot at ring index `index` over the source directory
    #[instrument(skip(self))]
    pub fn restore(&self, index: u32) -> Result<RestoreReport> {
        let path = self.slot_path(index)?;
        self.restore_from(&path, None)
    }

    /// Restore the slot directory `slot_path` over the source directory
    pub fn restore_from(
        &self,
        slot_path: &Path,
        progress: Option<ProgressCallback>,
    ) -> Result<RestoreReport> {
        self.restorer
            .restore_with_progress(slot_path, &self.config.source, progress)
    }

    /// Reconstruct one file from the slot at ring index `index`
    pub fn restore_file(&self, index: u32, relative: &Path) -> Result<RestoreReport> {
        let path = self.slot_path(index)?;
        self.restorer
            .restore_file(&path, relative, &self.config.source)
    }

    /// Start the periodic loop on the current tokio runtime
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn start_scheduler(&self) -> SchedulerHandle {
        Scheduler::new(
            Arc::clone(&self.engine),
            self.config.interval(),
            Arc::clone(&self.state),
        )
        .spawn()
    }
}

/// Builder for [`ChronoVault`]
///
/// Starts from [`BackupConfig::new`] defaults; every setter overrides one
/// field. The configuration is validated in [`build`](Self::build).
#[derive(Clone)]
pub struct ChronoVaultBuilder {
    config: BackupConfig,
    compression_strategy: CompressionStrategy,
    sink: Arc<dyn EventSink>,
    start_paused: bool,
}

impl std::fmt::Debug for ChronoVaultBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChronoVaultBuilder")
            .field("config", &self.config)
            .field("compression_strategy", &self.compression_strategy)
            .field("start_paused", &self.start_paused)
            .finish()
    }
}

impl ChronoVaultBuilder {
    /// Back up `source` into `backup_root`
    pub fn new(source: impl Into<PathBuf>, backup_root: impl Into<PathBuf>) -> Self {
        Self::from_config(BackupConfig::new(source, backup_root))
    }

    /// Start from an existing configuration
    pub fn from_config(config: BackupConfig) -> Self {
        Self {
            config,
            compression_strategy: CompressionStrategy::default(),
            sink: Arc::new(NoOpSink),
            start_paused: false,
        }
    }

    /// File-name glob patterns to include
    pub fn file_types(mut self, patterns: Vec<String>) -> Self {
        self.config.file_types = patterns;
        self
    }

    /// Number of slots in the ring
    pub fn max_backups(mut self, max: u32) -> Self {
        self.config.max_backups = max;
        self
    }

    /// Interval between cycle starts, rounded down to whole seconds
    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.seconds_between_backups = interval.as_secs();
        self
    }

    /// Store only files modified since the previous cycle
    pub fn modified_only(mut self, enabled: bool) -> Self {
        self.config.backup_modified_only = enabled;
        self
    }

    /// Include every file in the first cycle
    pub fn copy_all_on_startup(mut self, enabled: bool) -> Self {
        self.config.copy_all_on_startup = enabled;
        self
    }

    /// Descend into subdirectories
    pub fn allow_subfolders(mut self, enabled: bool) -> Self {
        self.config.allow_subfolders = enabled;
        self
    }

    /// Check a delta's basis hash before applying it
    pub fn verify_basis(mut self, enabled: bool) -> Self {
        self.config.verify_basis = enabled;
        self
    }

    /// Worker threads for per-file work
    pub fn parallel_workers(mut self, count: usize) -> Self {
        self.config.parallel_workers = count;
        self
    }

    /// Compression of `.sig` and `.delta` artifacts
    pub fn compression_strategy(mut self, strategy: CompressionStrategy) -> Self {
        self.compression_strategy = strategy;
        self
    }

    /// Where notifications go
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Whether a started scheduler begins paused
    pub fn start_paused(mut self, paused: bool) -> Self {
        self.start_paused = paused;
        self
    }

    /// Validate the configuration and open the vault
    pub fn build(self) -> Result<ChronoVault> {
        let config = self.config;
        config.validate()?;

        let slots = SlotManager::new(config.backup_root.clone());
        slots.ensure_root()?;

        let codec = ArtifactCodec::new(self.compression_strategy);
        let workspace: WorkspaceLock = Arc::new(Mutex::new(()));
        let mut engine = SnapshotEngine::new(
            SnapshotSettings {
                source: config.source.clone(),
                backup_root: config.backup_root.clone(),
                patterns: config.file_types.clone(),
                recursive: config.allow_subfolders,
                mode: config.mode(),
                max_backups: config.max_backups,
                parallel_workers: config.parallel_workers,
            },
            codec,
            Arc::clone(&workspace),
            Arc::clone(&self.sink),
        )?;
        let current_index = engine.current_index()?;

        let last_backup_at = if config.copy_all_on_startup {
            None
        } else {
            let interval = chrono::Duration::from_std(config.interval())
                .map_err(|e| ChronoError::config(format!("interval out of range: {}", e)))?;
            let seeded = Utc::now()
                .checked_sub_signed(interval)
                .ok_or_else(|| ChronoError::config("interval out of range"))?;
            Some(seeded)
        };
        debug!(
            "Initial state: slot {}, last backup {:?}",
            current_index, last_backup_at
        );

        let state = ScheduleState {
            last_backup_at,
            next_backup_at: None,
            paused: self.start_paused,
            current_index,
            cycles_completed: 0,
        };
        let restorer = RestoreEngine::new(codec, config.verify_basis, workspace, self.sink);

        info!(
            "Opened vault for {:?} -> {:?} ({} mode, {} slots)",
            config.source,
            config.backup_root,
            config.mode(),
            config.max_backups
        );
        Ok(ChronoVault {
            config,
            slots,
            engine: Arc::new(Mutex::new(engine)),
            restorer,
            state: Arc::new(RwLock::new(state)),
        })
    }
}
