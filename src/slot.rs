//! On-disk slot management
//!
//! A slot is one directory directly under the backup root, named
//! `"<index>_<HH-mm_dd-MM-yyyy>"` in local time:
//!
//! ```text
//! backup_root/
//! ├── 1_09-30_14-03-2024/
//! │   ├── .slot.json          # sidecar (advisory)
//! │   ├── report.txt          # full copy
//! │   ├── notes.md.sig        # signature of current content
//! │   └── notes.md.delta      # patch against the previous content
//! ├── 2_09-35_14-03-2024/
//! └── 3_09-40_14-03-2024/
//! ```
//!
//! Slots are addressed by index only; the timestamp part of the name is
//! informational. Directories whose leading token is not a positive integer
//! are not slots and are skipped with a log line.

use crate::error::{ChronoError, Result};
use crate::types::{BackupSlot, SlotInfo, SlotMetadata};
use crate::utils;
use chrono::{DateTime, Local, NaiveDateTime};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// `chrono` format of the timestamp part of a slot name
pub const SLOT_TIME_FORMAT: &str = "%H-%M_%d-%m-%Y";
/// Sidecar file written into every committed slot
pub const METADATA_FILE: &str = ".slot.json";

/// Build the directory name for a slot
pub fn format_slot_name(index: u32, created_at: &DateTime<Local>) -> String {
    format!("{}_{}", index, created_at.format(SLOT_TIME_FORMAT))
}

/// Read the sidecar of the slot at `slot_path`, `None` if it has none
pub fn read_metadata(slot_path: &Path) -> Result<Option<SlotMetadata>> {
    let path = slot_path.join(METADATA_FILE);
    match fs::read(&path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Index and timestamp recovered from a slot directory name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedSlotName {
    /// Ring index
    pub index: u32,
    /// Local wall-clock time, `None` if that part did not parse
    pub created_at: Option<NaiveDateTime>,
}

/// Parse a slot directory name
///
/// Returns `None` when the leading token is not a positive integer. A
/// well-formed index with a malformed timestamp still parses.
pub fn parse_slot_name(name: &str) -> Option<ParsedSlotName> {
    let (index, rest) = match name.split_once('_') {
        Some((index, rest)) => (index, Some(rest)),
        None => (name, None),
    };
    let index: u32 = index.parse().ok().filter(|i| *i >= 1)?;
    let created_at = rest.and_then(|ts| NaiveDateTime::parse_from_str(ts, SLOT_TIME_FORMAT).ok());
    Some(ParsedSlotName { index, created_at })
}

/// Owner of the slot directories under one backup root
#[derive(Debug, Clone)]
pub struct SlotManager {
    root: PathBuf,
}

impl SlotManager {
    /// Manage slots under `root`
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Backup root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the backup root if needed
    pub fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root).map_err(|e| ChronoError::slot_io(&self.root, e))
    }

    /// Every slot directory currently holding `index`
    pub fn find_all_by_index(&self, index: u32) -> Result<Vec<PathBuf>> {
        Ok(self
            .scan()?
            .into_iter()
            .filter(|(parsed, _, _)| parsed.index == index)
            .map(|(_, _, path)| path)
            .collect())
    }

    /// The slot directory holding `index`, if any
    pub fn find_by_index(&self, index: u32) -> Result<Option<PathBuf>> {
        Ok(self.find_all_by_index(index)?.into_iter().next())
    }

    /// Destroy whatever holds `index` and create a fresh, empty slot there
    pub fn replace(&self, index: u32) -> Result<BackupSlot> {
        self.replace_at(index, Local::now())
    }

    /// [`replace`](Self::replace) with an explicit creation time
    pub fn replace_at(&self, index: u32, created_at: DateTime<Local>) -> Result<BackupSlot> {
        self.ensure_root()?;
        for old in self.find_all_by_index(index)? {
            info!("Replacing slot {} at {:?}", index, old);
            self.discard(&old)?;
        }

        let path = self.root.join(format_slot_name(index, &created_at));
        fs::create_dir(&path).map_err(|e| ChronoError::slot_io(&path, e))?;
        debug!("Created slot {:?}", path);

        Ok(BackupSlot {
            index,
            created_at,
            path,
        })
    }

    /// Recursively delete a slot; a missing directory is a no-op
    pub fn discard(&self, path: &Path) -> Result<()> {
        utils::remove_dir_all_if_exists(path).map_err(|e| ChronoError::slot_io(path, e))?;
        Ok(())
    }

    /// All slots, oldest first
    ///
    /// Ordered by the sidecar's commit time when present, else by the time in
    /// the directory name; slots without either come first, by index.
    pub fn list(&self) -> Result<Vec<SlotInfo>> {
        let mut slots: Vec<SlotInfo> = self
            .scan()?
            .into_iter()
            .map(|(parsed, name, path)| {
                let metadata = match self.read_metadata(&path) {
                    Ok(meta) => meta,
                    Err(e) => {
                        warn!("Ignoring unreadable sidecar in {:?}: {}", path, e);
                        None
                    }
                };
                SlotInfo {
                    index: parsed.index,
                    created_at: parsed.created_at,
                    name,
                    path,
                    metadata,
                }
            })
            .collect();

        slots.sort_by(|a, b| {
            a.created_utc()
                .cmp(&b.created_utc())
                .then(a.index.cmp(&b.index))
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(slots)
    }

    /// Write the sidecar into `slot_path`
    pub fn write_metadata(&self, slot_path: &Path, metadata: &SlotMetadata) -> Result<()> {
        let json = serde_json::to_vec_pretty(metadata)?;
        utils::atomic_write(&slot_path.join(METADATA_FILE), &json)
    }

    /// Read the sidecar of `slot_path`, `None` if it has none
    pub fn read_metadata(&self, slot_path: &Path) -> Result<Option<SlotMetadata>> {
        read_metadata(slot_path)
    }

    /// Immediate subdirectories that parse as slots, in name order
    fn scan(&self) -> Result<Vec<(ParsedSlotName, String, PathBuf)>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ChronoError::slot_io(&self.root, e)),
        };

        let mut found = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ChronoError::slot_io(&self.root, e))?;
            let is_dir = entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false);
            if !is_dir {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            match parse_slot_name(&name) {
                Some(parsed) => {
                    if parsed.created_at.is_none() {
                        debug!("Slot {:?} has an unparsable timestamp", name);
                    }
                    found.push((parsed, name, entry.path()));
                }
                None => debug!("Skipping non-slot directory {:?}", name),
            }
        }
        found.sort_by(|a, b| a.1.cmp(&b.1));
        Ok(found)
    }
}
