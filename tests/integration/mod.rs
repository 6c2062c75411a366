//! Integration tests for ChronoVault
//!
//! Drives whole vaults through many cycles over a generated project tree and
//! checks that every slot restores what the source held when it was written.

use ::chronovault::*;
use chronovault::events::ChannelSink;
use filetime::FileTime;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Test harness for multi-cycle scenarios
pub struct VaultHarness {
    pub temp_dir: TempDir,
    pub vault: ChronoVault,
    pub rng: StdRng,
}

impl VaultHarness {
    /// Harness over an empty source directory
    pub fn new(configure: impl FnOnce(ChronoVaultBuilder) -> ChronoVaultBuilder) -> Self {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir(temp_dir.path().join("source")).unwrap();
        let builder = ChronoVaultBuilder::new(
            temp_dir.path().join("source"),
            temp_dir.path().join("backups"),
        )
        .parallel_workers(4);
        let vault = configure(builder).build().unwrap();

        Self {
            temp_dir,
            vault,
            rng: StdRng::seed_from_u64(42),
        }
    }

    pub fn source(&self) -> PathBuf {
        self.temp_dir.path().join("source")
    }

    /// Write a file with an mtime after the next cycle's start
    pub fn write(&mut self, relative: &str, content: &[u8]) {
        let path = self.source().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        let later = FileTime::from_unix_time(chrono::Utc::now().timestamp() + 3_600, 0);
        filetime::set_file_mtime(&path, later).unwrap();
    }

    /// Run a cycle, then backdate every source file so only later writes count as modified
    pub fn cycle(&mut self) -> CycleReport {
        let report = self.vault.run_cycle().unwrap();
        let earlier = FileTime::from_unix_time(chrono::Utc::now().timestamp() - 3_600, 0);
        for entry in walkdir::WalkDir::new(self.source()).into_iter().filter_map(|e| e.ok()) {
            if entry.file_type().is_file() {
                filetime::set_file_mtime(entry.path(), earlier).unwrap();
            }
        }
        report
    }

    /// Random printable content
    pub fn content(&mut self, len: usize) -> Vec<u8> {
        (0..len).map(|_| self.rng.random_range(b' '..=b'~')).collect()
    }

    /// Generate `dirs` directories of `files` files each
    pub fn generate_project(&mut self, dirs: usize, files: usize) {
        for d in 0..dirs {
            for f in 0..files {
                let len = self.rng.random_range(100..6_000);
                let content = self.content(len);
                self.write(&format!("dir_{d}/file_{f}.txt"), &content);
            }
        }
    }

    /// Rewrite part of `count` random existing files
    pub fn mutate(&mut self, count: usize) -> Vec<String> {
        let files: Vec<String> = self.snapshot().into_keys().collect();
        let mut changed = Vec::new();
        for _ in 0..count {
            let name = files[self.rng.random_range(0..files.len())].clone();
            let mut content = fs::read(self.source().join(&name)).unwrap();
            let at = self.rng.random_range(0..=content.len());
            let insert_len = self.rng.random_range(1..200);
            let insert = self.content(insert_len);
            content.splice(at..at, insert);
            self.write(&name, &content);
            changed.push(name);
        }
        changed
    }

    /// Relative path -> content of every file in the source tree
    pub fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        read_tree(&self.source())
    }
}

fn read_tree(root: &Path) -> BTreeMap<String, Vec<u8>> {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let relative = e
                .path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/");
            (relative, fs::read(e.path()).unwrap())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_mode_every_slot_restores_its_snapshot() {
        let mut harness = VaultHarness::new(|b| b.allow_subfolders(true).max_backups(3));
        harness.generate_project(3, 4);

        let mut expected = BTreeMap::new();
        for _ in 0..5 {
            harness.mutate(3);
            let report = harness.cycle();
            assert!(report.failures.is_empty());
            expected.insert(report.slot_index.unwrap(), harness.snapshot());
        }
        assert_eq!(harness.vault.list_slots().unwrap().len(), 3);

        for (index, snapshot) in &expected {
            harness.mutate(5);
            harness.vault.restore(*index).unwrap();
            assert_eq!(&harness.snapshot(), snapshot, "slot {index} restored wrongly");
        }
    }

    #[test]
    fn test_modified_only_chain_restores_forward() {
        let mut harness = VaultHarness::new(|b| {
            b.allow_subfolders(true)
                .modified_only(true)
                .max_backups(10)
                .verify_basis(true)
        });
        harness.generate_project(2, 3);

        let first = harness.cycle();
        assert_eq!(first.full_copies, 6);
        let mut states = vec![harness.snapshot()];

        for _ in 0..4 {
            let changed = harness.mutate(2);
            let report = harness.cycle();
            let mut unique = changed.clone();
            unique.sort();
            unique.dedup();
            assert_eq!(report.files_written, unique.len());
            assert_eq!(report.patches_written, unique.len());
            states.push(harness.snapshot());
        }

        // Replaying patches in order from the first state rebuilds the last
        let source = harness.source();
        fs::remove_dir_all(&source).unwrap();
        fs::create_dir(&source).unwrap();
        for index in 1..=5u32 {
            let report = harness.vault.restore(index).unwrap();
            assert!(report.skipped.is_empty(), "slot {index}: {:?}", report.skipped);
            let restored = harness.snapshot();
            assert_eq!(restored, states[index as usize - 1], "after slot {index}");
        }
    }

    #[test]
    fn test_patch_without_basis_is_skipped() {
        let mut harness = VaultHarness::new(|b| b.modified_only(true));
        let content = harness.content(8_000);
        harness.write("big.txt", &content);
        harness.cycle();

        let mut changed = content.clone();
        changed.extend_from_slice(b"more");
        harness.write("big.txt", &changed);
        harness.cycle();

        fs::remove_file(harness.source().join("big.txt")).unwrap();
        let report = harness.vault.restore(2).unwrap();
        assert_eq!(report.files_restored, 0);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].kind, ErrorKind::BasisMissing);
        assert!(!harness.source().join("big.txt").exists());
    }

    #[test]
    fn test_file_patterns_filter_candidates() {
        let mut harness = VaultHarness::new(|b| {
            b.file_types(vec!["*.txt".to_string(), "*.md".to_string()])
        });
        harness.write("a.txt", b"a");
        harness.write("b.md", b"b");
        harness.write("c.log", b"c");

        let report = harness.cycle();
        let slot = read_tree(&report.slot_path.unwrap());
        let names: Vec<&str> = slot.keys().map(String::as_str).collect();
        assert_eq!(names, vec![".slot.json", "a.txt", "b.md"]);
    }

    #[test]
    fn test_restore_single_file_from_slot() {
        let mut harness = VaultHarness::new(|b| b.allow_subfolders(true));
        harness.write("docs/one.txt", b"one");
        harness.write("docs/two.txt", b"two");
        harness.cycle();

        harness.write("docs/one.txt", b"ONE");
        harness.write("docs/two.txt", b"TWO");
        harness
            .vault
            .restore_file(1, Path::new("docs/one.txt"))
            .unwrap();

        assert_eq!(fs::read(harness.source().join("docs/one.txt")).unwrap(), b"one");
        assert_eq!(fs::read(harness.source().join("docs/two.txt")).unwrap(), b"TWO");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pause_blocks_next_cycle_until_resume() {
        let mut harness = VaultHarness::new(|b| b.interval(Duration::from_secs(1)));
        harness.write("a.txt", b"a");
        let scheduler = harness.vault.start_scheduler();

        wait_for(&scheduler, 1).await;
        scheduler.pause();
        let paused_at = scheduler.state().cycles_completed;
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        // At most the cycle already running when pause was requested
        assert!(scheduler.state().cycles_completed <= paused_at + 1);
        let settled = scheduler.state().cycles_completed;
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(scheduler.state().cycles_completed, settled);

        scheduler.resume();
        wait_for(&scheduler, settled + 1).await;

        scheduler.shutdown();
        scheduler.join().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_scheduler_reports_events() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("source");
        fs::create_dir(&source).unwrap();
        fs::write(source.join("a.txt"), "a").unwrap();

        let (sink, mut events) = ChannelSink::new();
        let vault = ChronoVaultBuilder::new(&source, temp.path().join("backups"))
            .event_sink(Arc::new(sink))
            .interval(Duration::from_secs(3600))
            .build()
            .unwrap();
        let scheduler = vault.start_scheduler();

        let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, BackupEvent::CycleCompleted { slot_index: 1, .. }));

        scheduler.shutdown();
        scheduler.join().await.unwrap();
    }

    async fn wait_for(scheduler: &SchedulerHandle, cycles: u64) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while scheduler.state().cycles_completed < cycles {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("scheduler made no progress");
    }
}
