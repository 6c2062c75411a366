//! # ChronoVault - Rotating-slot directory backups
//!
//! A retention engine that periodically snapshots a source directory into a
//! fixed-size ring of timestamped slot directories, overwriting the oldest
//! slot once the ring is full.
//!
//! ## Overview
//!
//! Each backup cycle writes one slot. A slot holds either:
//! - verbatim copies of every file matching the configured patterns (full
//!   mode), or
//! - for files modified since the previous cycle, an rsync-style signature
//!   of the current content plus a binary delta against the previous
//!   signature (modified-only mode).
//!
//! Any slot can be restored over the source directory. Cycles are driven by a
//! pausable scheduler running on tokio.
//!
//! ## Architecture
//!
//! - **Retention ring**: indices `1..=maxBackups`, re-derived from the slot
//!   directory names on startup
//! - **Slot manager**: creates, replaces, lists and discards slot directories
//! - **File walker**: pattern-filtered enumeration of the source tree
//! - **Delta codec**: block signatures with rolling weak and truncated
//!   SHA-256 strong checksums, delta construction and application
//! - **Snapshot / restore engines**: one cycle, one restore; per-file work
//!   runs in parallel and failures are isolated per file
//! - **Scheduler**: periodic loop with pause, resume and shutdown
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chronovault::{BackupConfig, ChronoVault};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BackupConfig::from_file("backup.conf".as_ref())?;
//! let vault = ChronoVault::open(config)?;
//!
//! // One cycle right now
//! let report = vault.run_cycle()?;
//! println!("Stored {} files in slot {:?}", report.files_written, report.slot_index);
//!
//! // Put the contents of slot 1 back
//! let restored = vault.restore(1)?;
//! println!("Restored {} files", restored.files_restored);
//! # Ok(())
//! # }
//! ```
//!
//! ### Periodic backups
//!
//! ```rust,no_run
//! use chronovault::ChronoVaultBuilder;
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let vault = ChronoVaultBuilder::new("./documents", "./backups")
//!     .interval(Duration::from_secs(300))
//!     .modified_only(true)
//!     .build()?;
//!
//! let scheduler = vault.start_scheduler();
//! scheduler.pause();
//! scheduler.resume();
//! scheduler.shutdown();
//! scheduler.join().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Listening for events
//!
//! ```rust,no_run
//! use chronovault::{ChronoVaultBuilder, events::ChannelSink};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let (sink, mut events) = ChannelSink::new();
//! let vault = ChronoVaultBuilder::new("./documents", "./backups")
//!     .event_sink(Arc::new(sink))
//!     .build()?;
//!
//! vault.run_cycle()?;
//! while let Ok(event) = events.try_recv() {
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Restore semantics
//!
//! Restoring is destructive: files in the source directory are overwritten
//! without confirmation. A delta is applied to whatever the source file holds
//! at restore time, so restoring an older slot after newer edits reproduces
//! the stored content only when the basis has not drifted. Enable
//! `verifyBasis` to refuse patches whose basis changed.
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T>`], an alias for
//! `std::result::Result<T, ChronoError>`. Every [`ChronoError`] maps onto an
//! [`ErrorKind`] used in [`BackupEvent::Failed`](events::BackupEvent::Failed)
//! notifications.

// Public API modules
pub mod compression;
pub mod config;
pub mod delta;
pub mod error;
pub mod events;
pub mod restore;
pub mod ring;
pub mod scheduler;
pub mod slot;
pub mod snapshot;
pub mod types;
pub mod utils;
pub mod vault;
pub mod walker;

// Internal modules (not part of public API)
mod collections;
mod rolling;

// Re-export main types for convenience
pub use compression::{ArtifactCodec, CompressionStrategy};
pub use config::BackupConfig;
pub use error::{ChronoError, ErrorKind, Result};
pub use events::{BackupEvent, EventSink};
pub use scheduler::SchedulerHandle;
pub use types::*;
pub use vault::{ChronoVault, ChronoVaultBuilder};
