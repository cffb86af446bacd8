// src/install/cleanup.rs

//! Post-run janitor: purge half-applied adds and prune empty directories

use crate::diff::UpdateFileInfo;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Delete files copied in by the add phase of a failed run.
///
/// Not-found is not an error here: the failure may have struck before a
/// given file was ever copied.
pub(crate) fn purge_files(root: &Path, files: &[UpdateFileInfo]) {
    debug!("Purging {} files", files.len());

    for fi in files {
        let fullpath = root.join(&fi.path);

        match fs::remove_file(&fullpath) {
            Ok(()) => debug!("Purged {}", fullpath.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Error while purging {}: {}", fullpath.display(), e),
        }
    }
}

/// Remove every directory under `root` left empty by the run.
///
/// The root itself is kept. Deepest paths are visited first so a chain
/// of empty parents collapses in a single pass. Non-empty directories
/// and individual removal errors are tolerated.
pub(crate) fn cleanup_empty_dirs(root: &Path) {
    let mut dirs = Vec::new();

    for entry in WalkDir::new(root).min_depth(1) {
        match entry {
            Ok(entry) if entry.file_type().is_dir() => dirs.push(entry.into_path()),
            Ok(_) => {}
            Err(e) => warn!("Error while collecting directories: {}", e),
        }
    }

    remove_empty_dirs(dirs);
}

fn remove_empty_dirs(mut dirs: Vec<PathBuf>) {
    dirs.sort_by(|a, b| b.as_os_str().len().cmp(&a.as_os_str().len()));

    for dir in dirs {
        let Ok(mut entries) = fs::read_dir(&dir) else {
            continue;
        };
        if entries.next().is_some() {
            continue;
        }

        debug!("Removing empty dir {}", dir.display());
        if let Err(e) = fs::remove_dir(&dir) {
            warn!("Error while removing dir {}: {}", dir.display(), e);
        }
    }
}
