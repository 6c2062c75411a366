//! Retention ring bookkeeping
//!
//! The ring is the cyclic sequence of slot indices `1..=max_backups`. Nothing
//! about it is persisted separately: on startup the position is re-derived
//! from the slot directories already on disk, so a restarted process carries
//! on where the previous one stopped.

use crate::error::Result;
use crate::slot::SlotManager;
use std::path::Path;
use tracing::debug;

/// Highest slot index found under `root`, clamped to `max_backups`
///
/// Directories whose names do not parse are ignored. An empty or missing
/// root gives 0.
pub fn resume_index(root: &Path, max_backups: u32) -> Result<u32> {
    let highest = SlotManager::new(root.to_path_buf())
        .list()?
        .iter()
        .map(|slot| slot.index)
        .max()
        .unwrap_or(0);
    Ok(highest.min(max_backups))
}

/// Index that follows `highest` when resuming
///
/// Once the ring has been filled, the last index is reused rather than
/// wrapping to 1.
pub fn next_after_resume(highest: u32, max_backups: u32) -> u32 {
    if highest >= max_backups {
        max_backups
    } else {
        highest + 1
    }
}

/// Position in the retention ring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionRing {
    max_backups: u32,
    current: u32,
}

impl RetentionRing {
    /// Ring positioned at index 1
    pub fn new(max_backups: u32) -> Self {
        let max_backups = max_backups.max(1);
        Self {
            max_backups,
            current: 1,
        }
    }

    /// Ring positioned from the slots found under `root`
    pub fn resume(root: &Path, max_backups: u32) -> Result<Self> {
        let max_backups = max_backups.max(1);
        let highest = resume_index(root, max_backups)?;
        let current = next_after_resume(highest, max_backups);
        debug!(
            "Resumed retention ring at {} (highest on disk: {}, max: {})",
            current, highest, max_backups
        );
        Ok(Self {
            max_backups,
            current,
        })
    }

    /// Index the next non-empty cycle writes
    pub fn current(&self) -> u32 {
        self.current
    }

    /// Ring size
    pub fn max_backups(&self) -> u32 {
        self.max_backups
    }

    /// Move to the next index after a non-empty cycle, wrapping to 1
    pub fn advance(&mut self) -> u32 {
        self.current = (self.current % self.max_backups) + 1;
        self.current
    }
}
