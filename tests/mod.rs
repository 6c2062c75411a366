//! Main test module for ChronoVault
//!
//! This module includes all test suites:
//! - Integration tests for multi-cycle scenarios and the scheduler
//! - Property-based tests for codec and ring invariants

pub mod integration;
pub mod property;

#[cfg(test)]
mod edge_cases {
    use ::chronovault::*;
    use std::fs;
    use tempfile::TempDir;

    fn vault(temp: &TempDir) -> ChronoVault {
        let source = temp.path().join("source");
        fs::create_dir_all(&source).unwrap();
        ChronoVaultBuilder::new(source, temp.path().join("backups"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_empty_source_never_creates_slots() {
        let temp = TempDir::new().unwrap();
        let vault = vault(&temp);

        for _ in 0..3 {
            assert!(vault.run_cycle().unwrap().is_empty());
        }
        assert!(vault.list_slots().unwrap().is_empty());
        assert_eq!(vault.schedule_state().current_index, 1);
    }

    #[test]
    fn test_empty_file_round_trips() {
        let temp = TempDir::new().unwrap();
        let vault = vault(&temp);
        let file = temp.path().join("source").join("empty.txt");
        fs::write(&file, b"").unwrap();

        vault.run_cycle().unwrap();
        fs::write(&file, b"not empty any more").unwrap();
        vault.restore(1).unwrap();
        assert_eq!(fs::read(&file).unwrap(), b"");
    }

    #[test]
    fn test_binary_content_round_trips() {
        let temp = TempDir::new().unwrap();
        let vault = vault(&temp);
        let file = temp.path().join("source").join("blob.bin");
        let content: Vec<u8> = (0..=255u8).cycle().take(70_000).collect();
        fs::write(&file, &content).unwrap();

        vault.run_cycle().unwrap();
        fs::write(&file, b"x").unwrap();
        vault.restore(1).unwrap();
        assert_eq!(fs::read(&file).unwrap(), content);
    }

    #[test]
    fn test_unicode_file_names() {
        let temp = TempDir::new().unwrap();
        let vault = vault(&temp);
        let source = temp.path().join("source");
        fs::write(source.join("résumé.txt"), "cv").unwrap();
        fs::write(source.join("日本語.txt"), "jp").unwrap();

        let report = vault.run_cycle().unwrap();
        assert_eq!(report.files_written, 2);
        fs::remove_file(source.join("日本語.txt")).unwrap();
        vault.restore(1).unwrap();
        assert_eq!(fs::read_to_string(source.join("日本語.txt")).unwrap(), "jp");
    }

    #[test]
    fn test_restore_from_missing_slot_path() {
        let temp = TempDir::new().unwrap();
        let vault = vault(&temp);
        let err = vault
            .restore_from(&temp.path().join("backups").join("4_10-00_01-01-2024"), None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SlotNotFound);
    }
}
