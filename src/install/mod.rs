// src/install/mod.rs

//! Transactional applier for a computed diff
//!
//! Applies the add/update/remove sets against the install tree with a
//! shadow-backup protocol: every pre-existing file is renamed to a
//! sibling `.bak` before anything destructive happens to its path, so a
//! failure at any point restores the tree from the backup ledger.
//!
//! # Phase order
//!
//! ```text
//! pre-install -> remove -> update -> add -> post-success
//!                                        \-> post-failure (rollback)
//! ```
//!
//! Phases run strictly in order and each file list is processed
//! sequentially, which keeps the ledger consistent and rollback
//! deterministic. Progress ticks and ledger entries flow through
//! channels to their single consumers; the applier itself never blocks
//! on the progress handler.

mod backup;
mod cleanup;

pub use backup::{BACKUP_EXT, BackupEntry, BackupLedger};

use crate::diff::{DiffResult, UpdateFileInfo};
use crate::error::{Error, Result};
use crate::fsutil::{copy_file, relative_key};
use crate::progress::{
    ADD_FACTOR, ProgressHandler, ProgressReporter, REMOVE_BACKUP_PRICE, REMOVE_FACTOR,
    UPDATE_FACTOR,
};
use backup::backup_file;
use cleanup::{cleanup_empty_dirs, purge_files};
use rayon::prelude::*;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::Sender;
use tracing::{debug, info, warn};

/// Applies a [`DiffResult`] to the install tree, with rollback on failure
///
/// One installer instance owns the install tree for the duration of
/// [`PackageInstaller::install`]; concurrent installs against the same
/// tree are not supported.
pub struct PackageInstaller {
    install_dir: PathBuf,
    package_dir: PathBuf,
    handler: Arc<dyn ProgressHandler>,
    current_exe: Option<PathBuf>,
    fail_in_the_end: bool,
    self_remove_path: Option<PathBuf>,
}

impl PackageInstaller {
    /// Create an installer over the live install tree and the staged package tree
    pub fn new(
        install_dir: impl Into<PathBuf>,
        package_dir: impl Into<PathBuf>,
        handler: Arc<dyn ProgressHandler>,
    ) -> Self {
        Self {
            install_dir: install_dir.into(),
            package_dir: package_dir.into(),
            handler,
            current_exe: None,
            fail_in_the_end: false,
            self_remove_path: None,
        }
    }

    /// Declare the full path of the currently-running executable.
    ///
    /// Passed in explicitly so tests stay hermetic. When the executable
    /// is itself among the updated or removed files, its backup is kept
    /// on disk and surfaced via [`PackageInstaller::self_remove_path`]
    /// instead of being deleted from within the running process.
    pub fn with_current_exe(mut self, path: impl Into<PathBuf>) -> Self {
        self.current_exe = Some(path.into());
        self
    }

    /// Debug flag: force the rollback path after a successful apply
    pub fn with_fail_in_the_end(mut self, fail: bool) -> Self {
        self.fail_in_the_end = fail;
        self
    }

    /// Backup of the running executable that survived post-success cleanup.
    ///
    /// The host is expected to schedule its deletion after the process
    /// exits; the mechanism is platform specific and out of scope here.
    pub fn self_remove_path(&self) -> Option<&Path> {
        self.self_remove_path.as_deref()
    }

    /// Apply the diff, reporting progress to the handler.
    ///
    /// On success the install tree matches the package tree for every
    /// path in the diff, every backup from this run is gone (the
    /// running executable's own backup excepted) and directories left
    /// empty are pruned. On error the tree has been restored to its
    /// pre-install state as far as the filesystem allowed. The handler
    /// receives its finish event exactly once on every path.
    pub fn install(&mut self, diff: &DiffResult) -> Result<()> {
        let (ledger_tx, collector) = BackupLedger::spawn_collector()?;
        let reporter = ProgressReporter::start(Arc::clone(&self.handler), grand_total(diff));

        self.before_install();

        let result = self.apply_phases(diff, &reporter, &ledger_tx);

        // Queue closure is the completion signal: the ledger exists
        // only after its consumer has drained every entry.
        drop(ledger_tx);
        let mut ledger = match collector.join() {
            Ok(ledger) => ledger,
            Err(_) => {
                warn!("Backup ledger collector died, treating run as unrecoverable");
                BackupLedger::default()
            }
        };

        if result.is_ok() && !self.fail_in_the_end {
            self.after_success(&mut ledger, &reporter);
        } else {
            self.after_failure(diff, &mut ledger, &reporter);
        }

        reporter.finish();

        match result {
            Ok(()) if self.fail_in_the_end => Err(Error::InducedFailure),
            other => other,
        }
    }

    /// Clear a stale backup of the running executable left behind by a
    /// previously interrupted run
    fn before_install(&self) {
        debug!("Before install");

        let Some(exe) = &self.current_exe else {
            return;
        };

        let mut stale = exe.clone().into_os_string();
        stale.push(BACKUP_EXT);
        let stale = PathBuf::from(stale);

        match fs::remove_file(&stale) {
            Ok(()) => info!("Stale installer backup removed: {}", stale.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No stale installer backup found");
            }
            Err(e) => warn!("Error while removing stale backup {}: {}", stale.display(), e),
        }
    }

    fn apply_phases(
        &self,
        diff: &DiffResult,
        reporter: &ProgressReporter,
        ledger: &Sender<BackupEntry>,
    ) -> Result<()> {
        info!("Installing package...");

        reporter.system_message("Removing components...");
        self.remove_files(&diff.to_remove, reporter, ledger);

        reporter.system_message("Updating components...");
        self.update_files(&diff.to_update, reporter, ledger)?;

        reporter.system_message("Adding components...");
        self.add_files(&diff.to_add, reporter)?;

        Ok(())
    }

    /// Remove phase: each file is renamed into its backup; actual
    /// deletion is deferred to the backup sweep at the end.
    ///
    /// A failed rename is logged and tolerated. The file keeps its
    /// place, has no backup, and rollback will not touch it.
    fn remove_files(
        &self,
        files: &[UpdateFileInfo],
        reporter: &ProgressReporter,
        ledger: &Sender<BackupEntry>,
    ) {
        info!("Removing {} files", files.len());

        for fi in files {
            debug!("Removing file {}", fi.path);

            if let Err(e) = backup_file(&self.install_dir, &fi.path, ledger) {
                warn!("Removing file {} failed: {}", fi.path, e);
            }

            reporter.account_remove(fi.size);
        }
    }

    /// Update phase: backup rename, then copy the package-side content
    /// over the original path. A copy failure ends the phase and
    /// triggers rollback.
    fn update_files(
        &self,
        files: &[UpdateFileInfo],
        reporter: &ProgressReporter,
        ledger: &Sender<BackupEntry>,
    ) -> Result<()> {
        info!("Updating {} files", files.len());

        for fi in files {
            let oldpath = self.install_dir.join(&fi.path);
            debug!("Updating file {}", oldpath.display());

            if let Err(e) = backup_file(&self.install_dir, &fi.path, ledger) {
                warn!("Error while backing up {}: {}", fi.path, e);
            }

            // The backup rename normally leaves the slot free; clear it
            // if it somehow survived so the copy starts from a clean path.
            if oldpath.exists()
                && let Err(e) = fs::remove_file(&oldpath)
            {
                warn!("Error while removing {}: {}", oldpath.display(), e);
            }

            let newpath = self.package_dir.join(&fi.path);
            let copied = copy_file(&newpath, &oldpath);
            reporter.account_update(fi.size);

            if let Err(e) = copied {
                warn!("Updating file {} failed: {}", fi.path, e);
                return Err(Error::Copy {
                    from: newpath,
                    to: oldpath,
                    source: e,
                });
            }
        }

        Ok(())
    }

    /// Add phase: create parent directories and copy each new file in.
    /// A copy failure ends the phase and triggers rollback.
    fn add_files(&self, files: &[UpdateFileInfo], reporter: &ProgressReporter) -> Result<()> {
        info!("Adding {} files", files.len());

        for fi in files {
            let target = self.install_dir.join(&fi.path);

            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }

            debug!("Adding file {}", fi.path);

            let source = self.package_dir.join(&fi.path);
            match copy_file(&source, &target) {
                Ok(()) => reporter.account_add(fi.size),
                Err(e) => {
                    warn!("Adding file {} failed: {}", fi.path, e);
                    return Err(Error::Copy {
                        from: source,
                        to: target,
                        source: e,
                    });
                }
            }
        }

        Ok(())
    }

    fn after_success(&mut self, ledger: &mut BackupLedger, reporter: &ProgressReporter) {
        info!("After success");
        reporter.system_message("Finishing the installation...");

        self.remove_backups(ledger, reporter);
        cleanup_empty_dirs(&self.install_dir);
    }

    fn after_failure(
        &mut self,
        diff: &DiffResult,
        ledger: &mut BackupLedger,
        reporter: &ProgressReporter,
    ) {
        info!("After failure");
        reporter.system_message("Cleaning up...");

        purge_files(&self.install_dir, &diff.to_add);
        self.restore_backups(ledger);
        self.remove_backups(ledger, reporter);
        cleanup_empty_dirs(&self.install_dir);
    }

    /// Delete every backup left in the ledger.
    ///
    /// The running executable's own backup cannot be deleted from
    /// within the process on every platform; it is pulled out of the
    /// ledger and surfaced via [`PackageInstaller::self_remove_path`]
    /// instead.
    fn remove_backups(&mut self, ledger: &mut BackupLedger, reporter: &ProgressReporter) {
        info!("Removing {} backups", ledger.len());

        if let Some(exe) = &self.current_exe
            && exe.starts_with(&self.install_dir)
        {
            let selfpath = relative_key(&self.install_dir, exe);
            if let Some(backup) = ledger.take(&selfpath) {
                debug!("Deferring removal of own backup {}", backup.display());
                self.self_remove_path = Some(backup);
            }
        }

        for (_, backup) in ledger.drain() {
            debug!("Removing {}", backup.display());

            if let Err(e) = fs::remove_file(&backup) {
                warn!("Error while removing {}: {}", backup.display(), e);
            }

            reporter.account_backup_remove();
        }
    }

    /// Rename every backup back over its original path.
    ///
    /// Failures are logged and the entries retained, so the backup
    /// sweep that follows still sees them; rollback never aborts on an
    /// individual file.
    fn restore_backups(&self, ledger: &mut BackupLedger) {
        info!("Restoring {} backups", ledger.len());

        let entries: Vec<(String, PathBuf)> = ledger.drain().collect();
        let failed: Vec<(String, PathBuf)> = entries
            .into_par_iter()
            .filter_map(|(relpath, backup)| {
                let original = self.install_dir.join(&relpath);
                debug!("Restoring {} to {}", backup.display(), original.display());

                match fs::rename(&backup, &original) {
                    Ok(()) => None,
                    Err(e) => {
                        warn!("Error while restoring {}: {}", backup.display(), e);
                        Some((relpath, backup))
                    }
                }
            })
            .collect();

        for (relpath, backup) in failed {
            ledger.record(relpath, backup);
        }
    }
}

/// Precompute the weighted work for a whole run, in progress units.
///
/// Removes and updates each pay their phase factor plus the flat price
/// of deleting their backup later; adds pay for a single copy.
fn grand_total(diff: &DiffResult) -> u64 {
    let mut sum = 0u64;

    for fi in &diff.to_remove {
        sum += fi.size * (REMOVE_FACTOR + REMOVE_BACKUP_PRICE) / 100;
    }
    for fi in &diff.to_update {
        sum += fi.size * (UPDATE_FACTOR + REMOVE_BACKUP_PRICE) / 100;
    }
    for fi in &diff.to_add {
        sum += fi.size * ADD_FACTOR / 100;
    }

    sum
}
