//! Periodic backup loop
//!
//! The scheduler owns a single tokio task that repeatedly runs a backup
//! cycle and sleeps until `cycle_start + interval`. Cycles do blocking file
//! I/O, so each one runs on the blocking pool.
//!
//! ```text
//!            pause()                      resume()
//!   Running ────────► Paused ─(blocks)──────────► Running
//!      │                 │
//!      └── shutdown() ───┴──► stopped (between cycles)
//! ```
//!
//! Pausing never interrupts a cycle; it is observed at the top of the next
//! iteration. Resuming wakes a blocked iteration at once and does nothing
//! while the loop is running.

use crate::error::{ChronoError, Result};
use crate::snapshot::SnapshotEngine;
use crate::types::{CycleReport, ScheduleState};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Snapshot engine shared between the scheduler and direct callers
pub type SharedEngine = Arc<Mutex<SnapshotEngine>>;
/// Loop state shared between the scheduler and direct callers
pub type SharedState = Arc<RwLock<ScheduleState>>;

/// Builder for the background loop
pub struct Scheduler {
    engine: SharedEngine,
    interval: Duration,
    state: SharedState,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("interval", &self.interval)
            .field("state", &*self.state.read())
            .finish()
    }
}

impl Scheduler {
    /// Loop over `engine` every `interval`, recording progress in `state`
    ///
    /// `state.paused` decides whether the loop starts paused.
    pub fn new(engine: SharedEngine, interval: Duration, state: SharedState) -> Self {
        Self {
            engine,
            interval,
            state,
        }
    }

    /// Start the loop on the current tokio runtime
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn spawn(self) -> SchedulerHandle {
        let paused = Arc::new(AtomicBool::new(self.state.read().paused));
        let resume = Arc::new(Notify::new());
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_loop(
            self.engine,
            self.interval,
            Arc::clone(&self.state),
            Arc::clone(&paused),
            Arc::clone(&resume),
            cancel.clone(),
        ));

        SchedulerHandle {
            paused,
            resume,
            cancel,
            state: self.state,
            task,
        }
    }
}

/// Control surface of a running scheduler
pub struct SchedulerHandle {
    paused: Arc<AtomicBool>,
    resume: Arc<Notify>,
    cancel: CancellationToken,
    state: SharedState,
    task: JoinHandle<()>,
}

impl std::fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("paused", &self.is_paused())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl SchedulerHandle {
    /// Stop starting new cycles; a running cycle finishes first
    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::SeqCst) {
            self.state.write().paused = true;
            info!("Backups paused");
        }
    }

    /// Let the loop continue; no-op when not paused
    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            self.state.write().paused = false;
            self.resume.notify_one();
            info!("Backups resumed");
        }
    }

    /// Flip between paused and running, returning whether it is now paused
    pub fn toggle(&self) -> bool {
        if self.is_paused() {
            self.resume();
            false
        } else {
            self.pause();
            true
        }
    }

    /// Whether the loop is paused
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Snapshot of the loop state
    pub fn state(&self) -> ScheduleState {
        self.state.read().clone()
    }

    /// Ask the loop to stop at its next wait point
    pub fn shutdown(&self) {
        debug!("Scheduler shutdown requested");
        self.cancel.cancel();
    }

    /// Wait for the loop task to end
    pub async fn join(self) -> Result<()> {
        self.task
            .await
            .map_err(|e| ChronoError::internal(format!("scheduler task failed: {}", e)))
    }
}

async fn run_loop(
    engine: SharedEngine,
    interval: Duration,
    state: SharedState,
    paused: Arc<AtomicBool>,
    resume: Arc<Notify>,
    cancel: CancellationToken,
) {
    info!("Scheduler started, interval {}", humantime::format_duration(interval));

    loop {
        if cancel.is_cancelled() {
            break;
        }
        if paused.load(Ordering::SeqCst) {
            debug!("Scheduler waiting for resume");
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = resume.notified() => continue,
            }
        }

        let cycle_start = tokio::time::Instant::now();
        let last_backup_at = state.read().last_backup_at;
        let cycle_engine = Arc::clone(&engine);
        let outcome = tokio::task::spawn_blocking(move || {
            let mut engine = cycle_engine.lock();
            let report = engine.run_cycle(last_backup_at);
            let current = engine.ring().map(|ring| ring.current());
            (report, current)
        })
        .await;

        match outcome {
            Ok((report, current)) => {
                if let Err(e) = &report {
                    error!("Backup cycle failed: {}", e);
                }
                record_cycle(&state, report.as_ref().ok(), current);
            }
            Err(e) => {
                error!("Backup cycle task died: {}", e);
                break;
            }
        }

        let Some(deadline) = cycle_start.checked_add(interval) else {
            warn!("Interval {:?} is beyond the clock range; no further cycles", interval);
            state.write().next_backup_at = None;
            cancel.cancelled().await;
            break;
        };
        state.write().next_backup_at = due_at(deadline);
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep_until(deadline) => {}
        }
    }

    state.write().next_backup_at = None;
    info!("Scheduler stopped");
}

/// Fold the outcome of one cycle into `state`
pub(crate) fn record_cycle(state: &SharedState, report: Option<&CycleReport>, current: Option<u32>) {
    let mut state = state.write();
    if let Some(current) = current {
        state.current_index = current;
    }
    if let Some(report) = report.filter(|r| !r.is_empty()) {
        state.last_backup_at = Some(report.started_at);
        state.cycles_completed += 1;
    }
}

/// Wall-clock time of a monotonic deadline, `None` past the calendar range
fn due_at(deadline: tokio::time::Instant) -> Option<DateTime<Utc>> {
    let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
    let remaining = chrono::Duration::from_std(remaining).ok()?;
    Utc::now().checked_add_signed(remaining)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::ArtifactCodec;
    use crate::events::NoOpSink;
    use crate::snapshot::{SnapshotSettings, WorkspaceLock};
    use crate::types::BackupMode;
    use std::fs;
    use tempfile::TempDir;

    fn shared_engine(temp: &TempDir) -> SharedEngine {
        engine_sharing(temp, Arc::new(Mutex::new(())))
    }

    fn engine_sharing(temp: &TempDir, workspace: WorkspaceLock) -> SharedEngine {
        let source = temp.path().join("src");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("a.txt"), "alpha").unwrap();
        let engine = SnapshotEngine::new(
            SnapshotSettings {
                source,
                backup_root: temp.path().join("backups"),
                patterns: vec!["*".to_string()],
                recursive: false,
                mode: BackupMode::Full,
                max_backups: 3,
                parallel_workers: 1,
            },
            ArtifactCodec::default(),
            workspace,
            Arc::new(NoOpSink),
        )
        .unwrap();
        Arc::new(Mutex::new(engine))
    }

    async fn wait_for_cycles(handle: &SchedulerHandle, cycles: u64) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while handle.state().cycles_completed < cycles {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("cycle did not complete in time");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_first_cycle_runs_immediately() {
        let temp = TempDir::new().unwrap();
        let handle = Scheduler::new(
            shared_engine(&temp),
            Duration::from_secs(3600),
            Arc::new(RwLock::new(ScheduleState::default())),
        )
        .spawn();

        wait_for_cycles(&handle, 1).await;
        let state = handle.state();
        assert_eq!(state.current_index, 2);
        assert!(state.last_backup_at.is_some());
        assert!(state.next_backup_at.is_some());

        handle.shutdown();
        handle.join().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_paused_start_blocks_until_resume() {
        let temp = TempDir::new().unwrap();
        let handle = Scheduler::new(
            shared_engine(&temp),
            Duration::from_secs(3600),
            Arc::new(RwLock::new(ScheduleState {
                paused: true,
                ..Default::default()
            })),
        )
        .spawn();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(handle.state().cycles_completed, 0);
        assert!(!temp.path().join("backups").exists());

        assert!(!handle.toggle());
        wait_for_cycles(&handle, 1).await;
        assert!(!handle.state().paused);

        handle.shutdown();
        handle.join().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_resume_while_running_is_noop() {
        let temp = TempDir::new().unwrap();
        let handle = Scheduler::new(
            shared_engine(&temp),
            Duration::from_millis(20),
            Arc::new(RwLock::new(ScheduleState::default())),
        )
        .spawn();

        handle.resume();
        handle.resume();
        assert!(!handle.is_paused());
        wait_for_cycles(&handle, 2).await;

        handle.pause();
        assert!(handle.state().paused);
        handle.shutdown();
        handle.join().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pause_during_cycle_lets_only_that_cycle_finish() {
        let temp = TempDir::new().unwrap();
        let workspace: WorkspaceLock = Arc::new(Mutex::new(()));
        let engine = engine_sharing(&temp, Arc::clone(&workspace));
        let held = workspace.lock();

        let handle = Scheduler::new(
            Arc::clone(&engine),
            Duration::from_millis(30),
            Arc::new(RwLock::new(ScheduleState::default())),
        )
        .spawn();

        // The cycle holds the engine and waits on the workspace lock
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if engine.try_lock().is_none() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("cycle did not start");

        handle.pause();
        assert_eq!(handle.state().cycles_completed, 0);
        drop(held);

        wait_for_cycles(&handle, 1).await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        let state = handle.state();
        assert_eq!(state.cycles_completed, 1);
        assert!(state.paused);
        assert_eq!(fs::read_dir(temp.path().join("backups")).unwrap().count(), 1);

        handle.resume();
        wait_for_cycles(&handle, 2).await;
        handle.shutdown();
        handle.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_while_paused() {
        let temp = TempDir::new().unwrap();
        let handle = Scheduler::new(
            shared_engine(&temp),
            Duration::from_secs(3600),
            Arc::new(RwLock::new(ScheduleState {
                paused: true,
                ..Default::default()
            })),
        )
        .spawn();

        handle.shutdown();
        tokio::time::timeout(Duration::from_secs(5), handle.join())
            .await
            .expect("scheduler did not stop")
            .unwrap();
    }
}
