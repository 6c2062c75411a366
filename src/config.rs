//! Configuration loading and validation
//!
//! A [`BackupConfig`] can come from three places:
//!
//! - the key/value file read by the shell (`key = value` per line, `#` or `;`
//!   comments, blank lines ignored),
//! - a JSON document using the same camelCase keys,
//! - code, through [`BackupConfig::new`] or
//!   [`ChronoVaultBuilder`](crate::ChronoVaultBuilder).
//!
//! Whatever the origin, [`BackupConfig::validate`] runs once before anything
//! touches the disk.
//!
//! ## Example file
//!
//! ```text
//! source = /home/alice/documents
//! backupRoot = /mnt/backup/documents
//! fileTypes = *.txt, *.docx
//! maxBackups = 5
//! secondsBetweenBackups = 300
//! backupModifiedOnly = true
//! copyAllOnStartup = false
//! ```

use crate::error::{ChronoError, Result};
use crate::types::BackupMode;
use crate::walker;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Keys that must be present in a key/value configuration file
pub const REQUIRED_KEYS: &[&str] = &[
    "source",
    "backupRoot",
    "fileTypes",
    "maxBackups",
    "secondsBetweenBackups",
    "backupModifiedOnly",
    "copyAllOnStartup",
];

/// Longest accepted interval between cycle starts (100 years)
pub const MAX_SECONDS_BETWEEN_BACKUPS: u64 = 100 * 365 * 24 * 60 * 60;

/// Validated settings for one vault
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupConfig {
    /// Directory tree being backed up
    pub source: PathBuf,
    /// Directory holding the slot directories
    pub backup_root: PathBuf,
    /// Glob patterns matched against file names (`*.txt`, `*`)
    pub file_types: Vec<String>,
    /// Number of slots in the ring
    pub max_backups: u32,
    /// Interval between cycle starts
    pub seconds_between_backups: u64,
    /// Store only files modified since the previous cycle, as patches
    pub backup_modified_only: bool,
    /// When false, the first cycle only picks up files modified in the last interval
    pub copy_all_on_startup: bool,
    /// Descend into subdirectories
    #[serde(default)]
    pub allow_subfolders: bool,
    /// Check the basis hash before applying a delta during restore
    #[serde(default)]
    pub verify_basis: bool,
    /// Upper bound on files processed concurrently within a cycle
    #[serde(default = "default_parallel_workers")]
    pub parallel_workers: usize,
}

fn default_parallel_workers() -> usize {
    num_cpus::get()
}

impl BackupConfig {
    /// Configuration with defaults for everything except the two directories
    pub fn new(source: impl Into<PathBuf>, backup_root: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            backup_root: backup_root.into(),
            file_types: vec!["*".to_string()],
            max_backups: 5,
            seconds_between_backups: 60,
            backup_modified_only: false,
            copy_all_on_startup: true,
            allow_subfolders: false,
            verify_basis: false,
            parallel_workers: default_parallel_workers(),
        }
    }

    /// Load from a file, picking the format from the extension (`.json` or key/value)
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            ChronoError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let config = if is_json {
            Self::from_json(&text)?
        } else {
            Self::parse(&text)?
        };
        debug!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Parse a JSON document
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| ChronoError::config(e.to_string()))
    }

    /// Parse the key/value format
    ///
    /// Keys are case-sensitive; whitespace around keys and values is trimmed.
    /// The last occurrence of a repeated key wins. Unknown keys are logged and
    /// ignored.
    pub fn parse(text: &str) -> Result<Self> {
        let mut values: Vec<(String, String)> = Vec::new();
        for (line_no, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(ChronoError::config(format!(
                    "line {}: expected key=value, got {:?}",
                    line_no + 1,
                    line
                )));
            };
            let key = key.trim().to_string();
            let value = value.trim().to_string();
            values.retain(|(k, _)| *k != key);
            values.push((key, value));
        }

        let get = |key: &str| -> Option<&str> {
            values
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };
        let require = |key: &str| -> Result<&str> {
            get(key).ok_or_else(|| ChronoError::config(format!("missing key '{}'", key)))
        };

        for (key, _) in &values {
            if !REQUIRED_KEYS.contains(&key.as_str())
                && !matches!(key.as_str(), "allowSubfolders" | "verifyBasis" | "parallelWorkers")
            {
                warn!("Ignoring unknown configuration key '{}'", key);
            }
        }

        let mut config = Self::new(require("source")?, require("backupRoot")?);
        config.file_types = split_patterns(require("fileTypes")?);
        config.max_backups = parse_positive("maxBackups", require("maxBackups")?)?;
        config.seconds_between_backups =
            parse_positive("secondsBetweenBackups", require("secondsBetweenBackups")?)?;
        config.backup_modified_only =
            parse_bool("backupModifiedOnly", require("backupModifiedOnly")?)?;
        config.copy_all_on_startup = parse_bool("copyAllOnStartup", require("copyAllOnStartup")?)?;

        if let Some(value) = get("allowSubfolders") {
            config.allow_subfolders = parse_bool("allowSubfolders", value)?;
        }
        if let Some(value) = get("verifyBasis") {
            config.verify_basis = parse_bool("verifyBasis", value)?;
        }
        if let Some(value) = get("parallelWorkers") {
            config.parallel_workers = parse_positive("parallelWorkers", value)?;
        }

        Ok(config)
    }

    /// Reject values the engines cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.max_backups < 1 {
            return Err(ChronoError::config("maxBackups must be at least 1"));
        }
        if self.seconds_between_backups < 1 {
            return Err(ChronoError::config(
                "secondsBetweenBackups must be at least 1",
            ));
        }
        if self.seconds_between_backups > MAX_SECONDS_BETWEEN_BACKUPS {
            return Err(ChronoError::config(format!(
                "secondsBetweenBackups must be at most {}",
                MAX_SECONDS_BETWEEN_BACKUPS
            )));
        }
        if self.parallel_workers < 1 {
            return Err(ChronoError::config("parallelWorkers must be at least 1"));
        }
        if self.file_types.is_empty() {
            return Err(ChronoError::config("fileTypes must name at least one pattern"));
        }
        walker::compile_patterns(&self.file_types)?;

        if !self.source.is_dir() {
            return Err(ChronoError::config(format!(
                "source {} is not a directory",
                self.source.display()
            )));
        }
        if self.backup_root.exists() && !self.backup_root.is_dir() {
            return Err(ChronoError::config(format!(
                "backupRoot {} exists and is not a directory",
                self.backup_root.display()
            )));
        }
        if self.allow_subfolders && self.backup_root.starts_with(&self.source) {
            return Err(ChronoError::config(
                "backupRoot must not be inside source when allowSubfolders is enabled",
            ));
        }
        Ok(())
    }

    /// Interval between cycle starts
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.seconds_between_backups)
    }

    /// Backup mode implied by `backup_modified_only`
    pub fn mode(&self) -> BackupMode {
        if self.backup_modified_only {
            BackupMode::ModifiedOnly
        } else {
            BackupMode::Full
        }
    }
}

fn split_patterns(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect()
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    if value.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if value.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(ChronoError::config(format!(
            "{} must be true or false, got {:?}",
            key, value
        )))
    }
}

fn parse_positive<T>(key: &str, value: &str) -> Result<T>
where
    T: TryFrom<i64>,
{
    let parsed: i64 = value
        .parse()
        .map_err(|_| ChronoError::config(format!("{} must be an integer, got {:?}", key, value)))?;
    if parsed < 1 {
        return Err(ChronoError::config(format!(
            "{} must be at least 1, got {}",
            key, parsed
        )));
    }
    T::try_from(parsed).map_err(|_| ChronoError::config(format!("{} is out of range", key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    const SAMPLE: &str = "\
# ChronoVault settings
source = /data/src
backupRoot=/data/backups
fileTypes = *.txt, *.doc ,
maxBackups = 3
secondsBetweenBackups = 10
backupModifiedOnly = TRUE
copyAllOnStartup = false
";

    #[test]
    fn test_parse_key_values() {
        let config = BackupConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.source, PathBuf::from("/data/src"));
        assert_eq!(config.backup_root, PathBuf::from("/data/backups"));
        assert_eq!(config.file_types, vec!["*.txt", "*.doc"]);
        assert_eq!(config.max_backups, 3);
        assert_eq!(config.seconds_between_backups, 10);
        assert!(config.backup_modified_only);
        assert!(!config.copy_all_on_startup);
        assert!(!config.allow_subfolders);
        assert_eq!(config.mode(), BackupMode::ModifiedOnly);
        assert_eq!(config.interval(), Duration::from_secs(10));
    }

    #[test]
    fn test_missing_key() {
        let text = SAMPLE.replace("maxBackups = 3\n", "");
        let err = BackupConfig::parse(&text).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
        assert!(err.to_string().contains("maxBackups"));
    }

    #[test]
    fn test_rejects_bad_values() {
        for (from, to) in [
            ("maxBackups = 3", "maxBackups = 0"),
            ("maxBackups = 3", "maxBackups = -2"),
            ("secondsBetweenBackups = 10", "secondsBetweenBackups = ten"),
            ("copyAllOnStartup = false", "copyAllOnStartup = nope"),
        ] {
            let text = SAMPLE.replace(from, to);
            assert!(BackupConfig::parse(&text).is_err(), "accepted {}", to);
        }
        assert!(BackupConfig::parse("just a line\n").is_err());
    }

    #[test]
    fn test_optional_keys() {
        let text = format!(
            "{}allowSubfolders = true\nverifyBasis = True\nparallelWorkers = 2\n",
            SAMPLE
        );
        let config = BackupConfig::parse(&text).unwrap();
        assert!(config.allow_subfolders);
        assert!(config.verify_basis);
        assert_eq!(config.parallel_workers, 2);
    }

    #[test]
    fn test_json_round_trip_uses_camel_case() {
        let config = BackupConfig::parse(SAMPLE).unwrap();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"backupRoot\""));
        assert!(json.contains("\"secondsBetweenBackups\""));
        assert_eq!(BackupConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_validate() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("src");
        fs::create_dir(&source).unwrap();

        let config = BackupConfig::new(&source, temp.path().join("backups"));
        config.validate().unwrap();

        let missing = BackupConfig::new(temp.path().join("nope"), temp.path().join("b"));
        assert!(missing.validate().is_err());

        let mut nested = BackupConfig::new(&source, source.join("backups"));
        nested.allow_subfolders = true;
        assert!(nested.validate().is_err());

        let mut bad_pattern = BackupConfig::new(&source, temp.path().join("b"));
        bad_pattern.file_types = vec!["[".into()];
        assert_eq!(bad_pattern.validate().unwrap_err().kind(), ErrorKind::ConfigInvalid);
    }

    #[test]
    fn test_validate_bounds_interval() {
        let temp = TempDir::new().unwrap();
        let text = SAMPLE
            .replace("/data/src", &temp.path().display().to_string())
            .replace("/data/backups", &temp.path().join("b").display().to_string())
            .replace("secondsBetweenBackups = 10", "secondsBetweenBackups = 9000000000000");
        let config = BackupConfig::parse(&text).unwrap();
        let err = config.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
        assert!(err.to_string().contains("secondsBetweenBackups"));

        let mut longest = config;
        longest.seconds_between_backups = MAX_SECONDS_BETWEEN_BACKUPS;
        longest.validate().unwrap();
    }

    #[test]
    fn test_from_file() {
        let temp = TempDir::new().unwrap();
        let ini = temp.path().join("config.ini");
        fs::write(&ini, SAMPLE).unwrap();
        assert_eq!(BackupConfig::from_file(&ini).unwrap().max_backups, 3);

        assert!(BackupConfig::from_file(&temp.path().join("absent.ini")).is_err());
    }
}
