// src/fsutil.rs

//! Small filesystem helpers shared by the hasher, diff engine and applier

use crate::error::{Error, Result};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Compute the forward-slash relative key of `path` under `root`.
///
/// Both trees' hash maps are keyed this way so install-side and
/// package-side entries share a common key space regardless of the
/// OS path separator.
pub(crate) fn relative_key(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let parts: Vec<_> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    parts.join("/")
}

/// Enumerate every regular file under `root`, recursively.
///
/// Directories are descended into but not returned; symlinks and other
/// non-regular entries are skipped. A traversal error aborts the walk:
/// a partial listing would misclassify every missing file.
pub(crate) fn collect_regular_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| Error::Walk {
            path: root.to_path_buf(),
            source: e,
        })?;

        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }

    Ok(files)
}

/// Copy `src` to `dst`, preserving the source file mode, and fsync the
/// destination before returning.
///
/// Updates use copy rather than rename because the package directory may
/// live on a different volume than the install tree.
pub(crate) fn copy_file(src: &Path, dst: &Path) -> io::Result<()> {
    fs::copy(src, dst)?;

    let file = File::open(dst)?;
    file.sync_all()?;

    Ok(())
}
