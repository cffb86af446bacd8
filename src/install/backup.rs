// src/install/backup.rs

//! Shadow-backup protocol and the backup ledger
//!
//! A backup is a rename of the original file to a sibling path with a
//! `.bak` suffix. Because backup and original always share a directory,
//! the rename never crosses filesystems and is atomic on every
//! supported platform.
//!
//! Ledger writes funnel through a single consumer thread fed by a
//! channel, so producers never lock; the ledger is materialized only
//! after the consumer exits.

use std::collections::HashMap;
use std::collections::hash_map::Drain;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};
use tracing::debug;

/// Suffix appended to a displaced file's name for its shadow backup
pub const BACKUP_EXT: &str = ".bak";

/// One recorded backup: the displaced file and where its contents went
#[derive(Debug, Clone)]
pub struct BackupEntry {
    /// Relative path of the original file, forward-slash normalized
    pub relpath: String,
    /// Absolute path of the backup holding its pre-install contents
    pub backup_path: PathBuf,
}

/// Mapping from relative path to backup location for one install run
///
/// Every entry implies the original path is currently absent or
/// replaced, and that renaming the backup over the original restores
/// the pre-install content.
#[derive(Debug, Default)]
pub struct BackupLedger {
    entries: HashMap<String, PathBuf>,
}

impl BackupLedger {
    /// Number of recorded backups
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no backups are recorded
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn record(&mut self, relpath: String, backup_path: PathBuf) {
        self.entries.insert(relpath, backup_path);
    }

    /// Remove and return the backup recorded for `relpath`
    pub(crate) fn take(&mut self, relpath: &str) -> Option<PathBuf> {
        self.entries.remove(relpath)
    }

    pub(crate) fn drain(&mut self) -> Drain<'_, String, PathBuf> {
        self.entries.drain()
    }

    /// Spawn the single consumer that materializes the ledger.
    ///
    /// Producers send [`BackupEntry`] values through the returned
    /// channel; dropping the last sender ends the consumer, and joining
    /// the handle yields the completed ledger.
    pub(crate) fn spawn_collector() -> io::Result<(Sender<BackupEntry>, JoinHandle<BackupLedger>)>
    {
        let (tx, rx) = mpsc::channel::<BackupEntry>();

        let handle = thread::Builder::new()
            .name("backup-ledger".to_string())
            .spawn(move || {
                let mut ledger = BackupLedger::default();

                for entry in rx {
                    ledger.record(entry.relpath, entry.backup_path);
                }

                debug!("Backup accounting finished, {} backups recorded", ledger.len());
                ledger
            })?;

        Ok((tx, handle))
    }
}

/// Sibling backup location for `relpath`, always in the same directory
/// as the original
pub(crate) fn backup_path_for(install_dir: &Path, relpath: &str) -> PathBuf {
    install_dir.join(format!("{}{}", relpath, BACKUP_EXT))
}

/// Rename `relpath` out of the way and enqueue its ledger entry.
///
/// The rename completes before the entry is enqueued, so once a later
/// destructive step runs, the backup it depends on already exists on
/// disk and is on its way into the ledger.
pub(crate) fn backup_file(
    install_dir: &Path,
    relpath: &str,
    ledger: &Sender<BackupEntry>,
) -> io::Result<()> {
    let original = install_dir.join(relpath);
    let backup = backup_path_for(install_dir, relpath);

    // stale backup from an interrupted run
    let _ = fs::remove_file(&backup);

    fs::rename(&original, &backup)?;
    debug!("Backed up {} to {}", original.display(), backup.display());

    let _ = ledger.send(BackupEntry {
        relpath: relpath.to_string(),
        backup_path: backup,
    });

    Ok(())
}
