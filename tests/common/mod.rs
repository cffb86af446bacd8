// tests/common/mod.rs

//! Shared fixtures and helpers for installer integration tests.

use ministaller::hash::{HashAlgorithm, hash_tree};
use ministaller::progress::ProgressHandler;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use walkdir::WalkDir;

/// Progress handler that records every event it receives.
#[derive(Default)]
pub struct RecordingHandler {
    pub percents: Mutex<Vec<u32>>,
    pub messages: Mutex<Vec<String>>,
    pub finishes: AtomicUsize,
}

impl RecordingHandler {
    pub fn finish_count(&self) -> usize {
        self.finishes.load(Ordering::SeqCst)
    }

    /// Assert that recorded percents are strictly increasing within 1..=100.
    pub fn assert_percents_monotone(&self) {
        let percents = self.percents.lock().unwrap();
        for pair in percents.windows(2) {
            assert!(
                pair[0] < pair[1],
                "percents not increasing: {:?}",
                *percents
            );
        }
        for p in percents.iter() {
            assert!((1..=100).contains(p), "percent out of range: {}", p);
        }
    }
}

impl ProgressHandler for RecordingHandler {
    fn handle_system_message(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }

    fn handle_percent_change(&self, percent: u32) {
        self.percents.lock().unwrap().push(percent);
    }

    fn handle_finish(&self) {
        self.finishes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Write `content` at `relpath` under `root`, creating parent directories.
pub fn write_file(root: &Path, relpath: &str, content: &str) {
    let path = root.join(relpath);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

/// Digest map of every regular file under `root`, keyed by relative path.
pub fn tree_digests(root: &Path) -> BTreeMap<String, String> {
    hash_tree(root, HashAlgorithm::Sha256).unwrap()
}

/// Assert no file under `root` carries the backup suffix.
pub fn assert_no_stray_backups(root: &Path) {
    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        let name = entry.file_name().to_string_lossy();
        assert!(
            !name.ends_with(".bak"),
            "stray backup left behind: {}",
            entry.path().display()
        );
    }
}

/// Assert no directory under `root` is empty.
pub fn assert_no_empty_dirs(root: &Path) {
    for entry in WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if entry.file_type().is_dir() {
            let count = fs::read_dir(entry.path()).unwrap().count();
            assert!(
                count > 0,
                "empty directory left: {}",
                entry.path().display()
            );
        }
    }
}
