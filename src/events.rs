//! Notifications from the core to whoever is listening
//!
//! The engines never print. Everything an operator might want to see leaves
//! the core as a [`BackupEvent`] handed to an [`EventSink`]. The shell
//! installs a sink that renders events; tests install a [`ChannelSink`] and
//! assert on what arrives.
//!
//! # Examples
//!
//! ```rust
//! use chronovault::events::{BackupEvent, EventSink};
//!
//! struct Counter(std::sync::atomic::AtomicUsize);
//!
//! impl EventSink for Counter {
//!     fn notify(&self, event: &BackupEvent) {
//!         if matches!(event, BackupEvent::CycleCompleted { .. }) {
//!             self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
//!         }
//!     }
//! }
//! ```

use crate::error::{ChronoError, ErrorKind};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{error, info};

/// Something that happened in the core
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum BackupEvent {
    /// A cycle wrote at least one file and committed its slot
    CycleCompleted {
        /// Slot index written
        slot_index: u32,
        /// Files stored
        files_written: usize,
        /// Cycle start
        at: DateTime<Utc>,
    },
    /// A cycle found nothing to store; its slot was discarded
    CycleSkipped {
        /// Cycle start
        at: DateTime<Utc>,
    },
    /// A restore finished
    RestoreCompleted {
        /// Slot restored from
        slot_path: PathBuf,
        /// Files written back
        files_restored: usize,
        /// Files that could not be restored
        files_skipped: usize,
    },
    /// An operation or a single file failed
    Failed {
        /// Failure category
        kind: ErrorKind,
        /// What was being done, and why it failed
        context: String,
    },
}

impl BackupEvent {
    /// Failure notification for `error` during `operation`
    pub fn failed(operation: &str, error: &ChronoError) -> Self {
        BackupEvent::Failed {
            kind: error.kind(),
            context: format!("{}: {}", operation, error),
        }
    }
}

/// Receiver of [`BackupEvent`]s
///
/// Called synchronously from engine threads; implementations should return
/// quickly.
pub trait EventSink: Send + Sync {
    /// Handle one event
    fn notify(&self, event: &BackupEvent);
}

impl<F> EventSink for F
where
    F: Fn(&BackupEvent) + Send + Sync,
{
    fn notify(&self, event: &BackupEvent) {
        self(event)
    }
}

/// Sink that drops every event
#[derive(Debug, Default)]
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn notify(&self, _event: &BackupEvent) {}
}

/// Sink that forwards events to `tracing`
#[derive(Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn notify(&self, event: &BackupEvent) {
        match event {
            BackupEvent::CycleCompleted {
                slot_index,
                files_written,
                at,
            } => info!(
                "Backup cycle completed: {} files into slot {} at {}",
                files_written, slot_index, at
            ),
            BackupEvent::CycleSkipped { at } => {
                info!("Backup cycle at {} found nothing to store", at)
            }
            BackupEvent::RestoreCompleted {
                slot_path,
                files_restored,
                files_skipped,
            } => info!(
                "Restore from {:?} completed: {} restored, {} skipped",
                slot_path, files_restored, files_skipped
            ),
            BackupEvent::Failed { kind, context } => error!("[{}] {}", kind, context),
        }
    }
}

/// Sink that pushes events into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<BackupEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiving end of its channel
    pub fn new() -> (Self, mpsc::UnboundedReceiver<BackupEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn notify(&self, event: &BackupEvent) {
        // Receiver gone means nobody is listening any more
        let _ = self.tx.send(event.clone());
    }
}
