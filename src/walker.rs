//! Candidate file enumeration
//!
//! The walker lists the files a cycle should consider: those under the
//! source root whose name matches one of the configured patterns and,
//! optionally, whose modification time is after a cut-off.
//!
//! ## Traversal
//!
//! - Flat mode lists the immediate children of the root.
//! - Recursive mode descends into every subdirectory, with no depth limit,
//!   and reports paths relative to the root so the slot mirrors the tree.
//! - Traversal is driven by `walkdir`, which keeps its own stack of open
//!   directories; deep trees cannot exhaust the call stack.
//! - Symlinked files are included. Symlinked directories are never
//!   descended into, which also rules out symlink cycles.
//! - Entries are sorted by name within each directory and visited depth
//!   first, so `sub/deeper/f.txt` comes before `sub/e.txt`.
//!
//! The walk is lazy: directories are read as the iterator advances. An
//! unreadable directory or file yields one `Err` item and the walk carries on.
//!
//! ## Example
//!
//! ```rust,no_run
//! use chronovault::walker::FileWalker;
//! use std::path::PathBuf;
//!
//! # fn main() -> chronovault::Result<()> {
//! let walker = FileWalker::new(PathBuf::from("./documents"))
//!     .with_patterns(vec!["*.txt".to_string(), "*.md".to_string()])
//!     .with_recursive(true);
//!
//! for record in walker.walk()? {
//!     let record = record?;
//!     println!("{} ({} bytes)", record.relative_path.display(), record.size_hint);
//! }
//! # Ok(())
//! # }
//! ```

use crate::error::{ChronoError, Result};
use crate::types::FileRecord;
use crate::utils;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};
use walkdir::{DirEntry, WalkDir};

/// Compile file-type patterns into one matcher
///
/// Each pattern is matched against the file name only, so `*.txt` never
/// matches a directory component. A file matching several patterns is still
/// reported once.
pub fn compile_patterns(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Builder for a candidate-file walk
#[derive(Debug, Clone)]
pub struct FileWalker {
    root: PathBuf,
    patterns: Vec<String>,
    recursive: bool,
    modified_after: Option<DateTime<Utc>>,
}

impl FileWalker {
    /// Walk `root`, matching every file, flat, with no time filter
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            patterns: vec!["*".to_string()],
            recursive: false,
            modified_after: None,
        }
    }

    /// Set the file-name patterns
    pub fn with_patterns(mut self, patterns: Vec<String>) -> Self {
        self.patterns = patterns;
        self
    }

    /// Descend into subdirectories
    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Only report files modified strictly after `cutoff`
    pub fn with_modified_after(mut self, cutoff: Option<DateTime<Utc>>) -> Self {
        self.modified_after = cutoff;
        self
    }

    /// Start the walk
    ///
    /// Fails only if a pattern does not compile; I/O problems surface as
    /// items of the returned iterator.
    pub fn walk(&self) -> Result<Walk> {
        let globs = compile_patterns(&self.patterns)?;
        debug!(
            "Walking {:?} (recursive: {}, modified after: {:?})",
            self.root, self.recursive, self.modified_after
        );
        let max_depth = if self.recursive { usize::MAX } else { 1 };
        let entries = WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(max_depth)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();
        Ok(Walk {
            root: self.root.clone(),
            globs,
            modified_after: self.modified_after,
            entries,
        })
    }
}

/// Enumerate candidate files under `root`
pub fn enumerate(
    root: &Path,
    patterns: &[String],
    recursive: bool,
    modified_after: Option<DateTime<Utc>>,
) -> Result<Walk> {
    FileWalker::new(root.to_path_buf())
        .with_patterns(patterns.to_vec())
        .with_recursive(recursive)
        .with_modified_after(modified_after)
        .walk()
}

/// Lazy iterator over candidate files
pub struct Walk {
    root: PathBuf,
    globs: GlobSet,
    modified_after: Option<DateTime<Utc>>,
    entries: walkdir::IntoIter,
}

impl std::fmt::Debug for Walk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Walk")
            .field("root", &self.root)
            .field("modified_after", &self.modified_after)
            .finish_non_exhaustive()
    }
}

impl Iterator for Walk {
    type Item = Result<FileRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.entries.next()? {
                Ok(entry) => entry,
                Err(e) => return Some(Err(self.walk_error(e))),
            };
            if let Some(item) = self.record(entry).transpose() {
                return Some(item);
            }
        }
    }
}

impl Walk {
    /// Turn a walk entry into a record, or `None` when it is filtered out
    fn record(&self, entry: DirEntry) -> Result<Option<FileRecord>> {
        // Not followed, so a symlinked directory reports as a symlink here
        if entry.file_type().is_dir() || !self.globs.is_match(entry.file_name()) {
            return Ok(None);
        }

        let path = entry.into_path();
        // Follows symlinks so a linked file reports its target's metadata
        let metadata = fs::metadata(&path).map_err(|e| ChronoError::unreadable(&path, e))?;
        if !metadata.is_file() {
            return Ok(None);
        }

        let modified_at = metadata
            .modified()
            .map(utils::system_time_to_utc)
            .map_err(|e| ChronoError::unreadable(&path, e))?;
        if let Some(cutoff) = self.modified_after {
            if modified_at <= cutoff {
                trace!("Skipping unmodified {:?}", path);
                return Ok(None);
            }
        }

        let relative_path = utils::make_relative(&path, &self.root)?;
        Ok(Some(FileRecord {
            path,
            relative_path,
            modified_at,
            size_hint: metadata.len(),
        }))
    }

    fn walk_error(&self, err: walkdir::Error) -> ChronoError {
        let path = err
            .path()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        if err.io_error().is_some() {
            ChronoError::unreadable(path, io::Error::from(err))
        } else {
            ChronoError::WalkDir(err)
        }
    }
}
