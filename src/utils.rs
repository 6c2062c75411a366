//! Utility functions for ChronoVault
//!
//! Hashing, atomic writes, path helpers and formatting shared by the engines.
//!
//! ## Atomic writes
//!
//! Everything written into a slot or back into the source tree goes through
//! [`atomic_write`] or [`copy_file_atomic`]: content lands in a temporary file
//! in the destination directory and is renamed into place, so readers never
//! observe a half-written file. The temporary file is created with mode
//! 0600, so the destination's permissions are set explicitly before the
//! rename: copies take the permissions of their source, and
//! [`atomic_write_with_permissions`] takes them from the caller.

use crate::error::{ChronoError, Result};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::NamedTempFile;
use tracing::trace;

/// Hash arbitrary data using SHA-256, hex encoded
pub fn hash_data(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Create the parent directory of `path` if it does not exist
pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Atomic file write (write to temp file then rename)
///
/// The temporary file is created next to `path` so the final rename never
/// crosses a filesystem boundary. Parent directories are created as needed.
/// On failure the temporary file is removed and `path` is left untouched.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    atomic_write_with_permissions(path, content, None)
}

/// [`atomic_write`], giving the written file `permissions` when set
pub fn atomic_write_with_permissions(
    path: &Path,
    content: &[u8],
    permissions: Option<fs::Permissions>,
) -> Result<()> {
    ensure_parent_dir(path)?;
    let dir = parent_or_current(path);

    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(content)?;
    if let Some(permissions) = permissions {
        temp.as_file().set_permissions(permissions)?;
    }
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| ChronoError::Io(e.error))?;

    trace!("Atomically wrote {} bytes to {:?}", content.len(), path);
    Ok(())
}

/// Copy `from` to `to` through a temporary file, returning bytes copied
///
/// `to` ends up with the permissions of `from`.
pub fn copy_file_atomic(from: &Path, to: &Path) -> Result<u64> {
    ensure_parent_dir(to)?;
    let dir = parent_or_current(to);

    let mut source = File::open(from)?;
    let permissions = source.metadata()?.permissions();
    let mut temp = NamedTempFile::new_in(dir)?;
    let copied = io::copy(&mut source, temp.as_file_mut())?;
    temp.as_file().set_permissions(permissions)?;
    temp.as_file().sync_all()?;
    temp.persist(to).map_err(|e| ChronoError::Io(e.error))?;

    trace!("Copied {:?} -> {:?} ({} bytes)", from, to, copied);
    Ok(copied)
}

fn parent_or_current(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Recursively delete a directory; a missing directory is not an error
///
/// Returns whether anything was removed.
pub fn remove_dir_all_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_dir_all(path) {
        Ok(()) => {
            trace!("Removed directory tree: {:?}", path);
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Make a path relative to a base path
///
/// Tries a lexical strip first and only canonicalises both paths when that
/// fails, so symlinked paths keep their link names.
pub fn make_relative(path: &Path, base: &Path) -> Result<PathBuf> {
    if let Ok(relative) = path.strip_prefix(base) {
        return Ok(relative.to_path_buf());
    }

    let path_canon = path.canonicalize()?;
    let base_canon = base.canonicalize()?;

    path_canon
        .strip_prefix(&base_canon)
        .map(|p| p.to_path_buf())
        .map_err(|_| {
            ChronoError::internal(format!(
                "Path {:?} is not relative to {:?}",
                path_canon, base_canon
            ))
        })
}

/// Append `suffix` to the file name of `path` (`a/b.txt` + `.sig` → `a/b.txt.sig`)
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Convert a filesystem timestamp to UTC
pub fn system_time_to_utc(time: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(time)
}

/// Name of this host, or `"unknown"`
pub fn hostname_string() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Format bytes in human-readable form
///
/// Binary units; values under 1024 are printed as whole bytes.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_hash_functions() {
        let data = b"Hello, world!";
        let hash = hash_data(data);
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_data(data));
        assert_ne!(hash, hash_data(b"Hello, world?"));
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1_048_576), "1.00 MB");
    }

    #[test]
    fn test_atomic_write_creates_parents_and_overwrites() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("nested").join("deep").join("out.bin");

        atomic_write(&target, b"first").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"first");

        atomic_write(&target, b"second").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"second");

        let leftovers: Vec<_> = fs::read_dir(target.parent().unwrap())
            .unwrap()
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn test_copy_file_atomic() {
        let temp_dir = TempDir::new().unwrap();
        let from = temp_dir.path().join("src.txt");
        let to = temp_dir.path().join("slot").join("src.txt");
        fs::write(&from, b"payload").unwrap();

        assert_eq!(copy_file_atomic(&from, &to).unwrap(), 7);
        assert_eq!(fs::read(&to).unwrap(), b"payload");
    }

    #[cfg(unix)]
    #[test]
    fn test_permissions_survive_atomic_writes() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let script = temp_dir.path().join("run.sh");
        fs::write(&script, b"#!/bin/sh\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        let mode = |path: &Path| fs::metadata(path).unwrap().permissions().mode() & 0o777;

        let copy = temp_dir.path().join("slot").join("run.sh");
        copy_file_atomic(&script, &copy).unwrap();
        assert_eq!(mode(&copy), 0o755);

        let shared = temp_dir.path().join("shared.txt");
        atomic_write_with_permissions(&shared, b"x", Some(fs::Permissions::from_mode(0o644)))
            .unwrap();
        assert_eq!(mode(&shared), 0o644);
    }

    #[test]
    fn test_remove_dir_all_if_exists() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("slot");
        fs::create_dir_all(dir.join("sub")).unwrap();
        fs::write(dir.join("sub").join("f"), b"x").unwrap();

        assert!(remove_dir_all_if_exists(&dir).unwrap());
        assert!(!dir.exists());
        assert!(!remove_dir_all_if_exists(&dir).unwrap());
    }

    #[test]
    fn test_make_relative_and_suffix() {
        let base = Path::new("/home/user/project");
        let full = Path::new("/home/user/project/src/main.rs");
        assert_eq!(make_relative(full, base).unwrap(), PathBuf::from("src/main.rs"));

        assert_eq!(
            with_suffix(Path::new("docs/report.txt"), ".sig"),
            PathBuf::from("docs/report.txt.sig")
        );
    }
}
