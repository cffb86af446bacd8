// src/diff/generator.rs

//! Diff generation over two directory trees
//!
//! Both trees are hashed in parallel, then scanned concurrently: the
//! install-side scan feeds the remove and update accumulators, the
//! package-side scan feeds the add accumulator. Per-file classification
//! fans out across the rayon pool and drains through one channel per
//! accumulator.

use crate::diff::{DiffOptions, DiffResult, UpdateFileInfo};
use crate::error::Result;
use crate::fsutil::{collect_regular_files, relative_key};
use crate::hash::{HashAlgorithm, hash_tree};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::mpsc;
use tracing::{debug, info, warn};

/// Computes the add/update/remove sets for one install run
pub struct DiffGenerator {
    install_dir: PathBuf,
    package_dir: PathBuf,
    options: DiffOptions,
    algorithm: HashAlgorithm,
}

impl DiffGenerator {
    /// Create a generator over the live install tree and the staged package tree
    pub fn new(install_dir: impl Into<PathBuf>, package_dir: impl Into<PathBuf>) -> Self {
        Self {
            install_dir: install_dir.into(),
            package_dir: package_dir.into(),
            options: DiffOptions::default(),
            algorithm: HashAlgorithm::default(),
        }
    }

    /// Set the policy flags
    pub fn with_options(mut self, options: DiffOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the fingerprint algorithm (both trees always use the same one)
    pub fn with_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Walk and hash both trees, then classify every regular file.
    ///
    /// The three output sequences are sorted by path so the applier
    /// processes files in a reproducible order; as sets they depend only
    /// on the trees and the policy flags.
    pub fn generate(&self) -> Result<DiffResult> {
        info!(
            "Generating diff: install dir {}, package dir {}",
            self.install_dir.display(),
            self.package_dir.display()
        );

        let (install_hashes, package_hashes) = rayon::join(
            || hash_tree(&self.install_dir, self.algorithm),
            || hash_tree(&self.package_dir, self.algorithm),
        );
        let install_hashes = install_hashes?;
        let package_hashes = package_hashes?;
        debug!("Hashes calculated");

        let (install_side, package_side) = rayon::join(
            || self.scan_install_side(&install_hashes, &package_hashes),
            || self.scan_package_side(&package_hashes),
        );
        let (mut to_remove, mut to_update) = install_side?;
        let mut to_add = package_side?;

        to_add.sort_by(|a, b| a.path.cmp(&b.path));
        to_update.sort_by(|a, b| a.path.cmp(&b.path));
        to_remove.sort_by(|a, b| a.path.cmp(&b.path));

        info!(
            "Found {} files to add, {} to update, {} to remove",
            to_add.len(),
            to_update.len(),
            to_remove.len()
        );

        Ok(DiffResult {
            to_add,
            to_update,
            to_remove,
        })
    }

    /// Classify install-tree files into the remove and update sets.
    ///
    /// Update entries carry the package-side size (it weights the
    /// incoming copy) and the install-side digest (the pre-state).
    fn scan_install_side(
        &self,
        install_hashes: &BTreeMap<String, String>,
        package_hashes: &BTreeMap<String, String>,
    ) -> Result<(Vec<UpdateFileInfo>, Vec<UpdateFileInfo>)> {
        let files = collect_regular_files(&self.install_dir)?;

        let (remove_tx, remove_rx) = mpsc::channel();
        let (update_tx, update_rx) = mpsc::channel();

        files
            .par_iter()
            .for_each_with((remove_tx, update_tx), |(remove_tx, update_tx), path| {
                let relpath = relative_key(&self.install_dir, path);
                let package_path = self.package_dir.join(&relpath);
                let install_digest = install_hashes.get(&relpath).cloned().unwrap_or_default();

                match fs::metadata(&package_path) {
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        if !self.options.keep_missing
                            && let Ok(meta) = fs::metadata(path)
                        {
                            let _ = remove_tx.send(UpdateFileInfo {
                                path: relpath,
                                digest: install_digest,
                                size: meta.len(),
                            });
                        }
                    }
                    Ok(package_meta) => {
                        let package_digest =
                            package_hashes.get(&relpath).cloned().unwrap_or_default();

                        if package_digest != install_digest || self.options.force_update {
                            let _ = update_tx.send(UpdateFileInfo {
                                path: relpath,
                                digest: install_digest,
                                size: package_meta.len(),
                            });
                        }
                    }
                    Err(e) => {
                        warn!("Failed to probe {}: {}", package_path.display(), e);
                    }
                }
            });

        Ok((
            remove_rx.into_iter().collect(),
            update_rx.into_iter().collect(),
        ))
    }

    /// Classify package-tree files with no install-side counterpart as adds
    fn scan_package_side(
        &self,
        package_hashes: &BTreeMap<String, String>,
    ) -> Result<Vec<UpdateFileInfo>> {
        let files = collect_regular_files(&self.package_dir)?;

        let (add_tx, add_rx) = mpsc::channel();

        files.par_iter().for_each_with(add_tx, |add_tx, path| {
            let relpath = relative_key(&self.package_dir, path);
            let install_path = self.install_dir.join(&relpath);

            if let Err(e) = fs::metadata(&install_path)
                && e.kind() == io::ErrorKind::NotFound
                && let Ok(meta) = fs::metadata(path)
            {
                let digest = package_hashes.get(&relpath).cloned().unwrap_or_default();
                let _ = add_tx.send(UpdateFileInfo {
                    path: relpath,
                    digest,
                    size: meta.len(),
                });
            }
        });

        Ok(add_rx.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;
    use std::collections::BTreeSet;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn write(root: &Path, relpath: &str, content: &str) {
        let path = root.join(relpath);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    fn paths(files: &[UpdateFileInfo]) -> Vec<&str> {
        files.iter().map(|f| f.path.as_str()).collect()
    }

    #[test]
    fn test_pure_add() {
        let install = TempDir::new().unwrap();
        let package = TempDir::new().unwrap();

        write(package.path(), "a.txt", "A");
        write(package.path(), "sub/b.txt", "B");

        let diff = DiffGenerator::new(install.path(), package.path())
            .generate()
            .unwrap();

        assert_eq!(paths(&diff.to_add), vec!["a.txt", "sub/b.txt"]);
        assert!(diff.to_update.is_empty());
        assert!(diff.to_remove.is_empty());

        let a = &diff.to_add[0];
        assert_eq!(a.size, 1);
        assert_eq!(a.digest, hash_bytes(HashAlgorithm::Sha256, b"A"));
    }

    #[test]
    fn test_pure_remove() {
        let install = TempDir::new().unwrap();
        let package = TempDir::new().unwrap();

        write(install.path(), "x", "X");
        write(install.path(), "y", "YY");

        let diff = DiffGenerator::new(install.path(), package.path())
            .generate()
            .unwrap();

        assert!(diff.to_add.is_empty());
        assert!(diff.to_update.is_empty());
        assert_eq!(paths(&diff.to_remove), vec!["x", "y"]);

        // Removes carry install-side size and digest
        let y = &diff.to_remove[1];
        assert_eq!(y.size, 2);
        assert_eq!(y.digest, hash_bytes(HashAlgorithm::Sha256, b"YY"));
    }

    #[test]
    fn test_keep_missing_drops_removes() {
        let install = TempDir::new().unwrap();
        let package = TempDir::new().unwrap();

        write(install.path(), "x", "X");

        let diff = DiffGenerator::new(install.path(), package.path())
            .with_options(DiffOptions {
                keep_missing: true,
                force_update: false,
            })
            .generate()
            .unwrap();

        assert!(diff.is_empty());
    }

    #[test]
    fn test_update_on_digest_mismatch() {
        let install = TempDir::new().unwrap();
        let package = TempDir::new().unwrap();

        write(install.path(), "a", "old");
        write(package.path(), "a", "newer");
        write(install.path(), "same", "S");
        write(package.path(), "same", "S");

        let diff = DiffGenerator::new(install.path(), package.path())
            .generate()
            .unwrap();

        assert_eq!(paths(&diff.to_update), vec!["a"]);
        assert!(diff.to_add.is_empty());
        assert!(diff.to_remove.is_empty());

        // Package-side size, install-side digest
        let a = &diff.to_update[0];
        assert_eq!(a.size, 5);
        assert_eq!(a.digest, hash_bytes(HashAlgorithm::Sha256, b"old"));
    }

    #[test]
    fn test_force_update_includes_identical_files() {
        let install = TempDir::new().unwrap();
        let package = TempDir::new().unwrap();

        write(install.path(), "same", "S");
        write(package.path(), "same", "S");

        let diff = DiffGenerator::new(install.path(), package.path())
            .with_options(DiffOptions {
                keep_missing: false,
                force_update: true,
            })
            .generate()
            .unwrap();

        assert_eq!(paths(&diff.to_update), vec!["same"]);
    }

    #[test]
    fn test_sets_are_disjoint() {
        let install = TempDir::new().unwrap();
        let package = TempDir::new().unwrap();

        write(install.path(), "removed", "R");
        write(install.path(), "changed", "old");
        write(install.path(), "kept", "K");
        write(package.path(), "changed", "new");
        write(package.path(), "kept", "K");
        write(package.path(), "added", "A");

        let diff = DiffGenerator::new(install.path(), package.path())
            .generate()
            .unwrap();

        let mut seen = BTreeSet::new();
        for file in diff
            .to_add
            .iter()
            .chain(&diff.to_update)
            .chain(&diff.to_remove)
        {
            assert!(seen.insert(&file.path), "{} appears twice", file.path);
        }

        assert_eq!(paths(&diff.to_add), vec!["added"]);
        assert_eq!(paths(&diff.to_update), vec!["changed"]);
        assert_eq!(paths(&diff.to_remove), vec!["removed"]);
    }

    #[test]
    fn test_package_file_shadowed_by_install_dir_is_not_added() {
        let install = TempDir::new().unwrap();
        let package = TempDir::new().unwrap();

        fs::create_dir_all(install.path().join("name")).unwrap();
        write(package.path(), "name", "payload");

        let diff = DiffGenerator::new(install.path(), package.path())
            .generate()
            .unwrap();

        // The install side has an entry at the path, so this is not an
        // add; the collision surfaces during apply instead.
        assert!(diff.to_add.is_empty());
    }

    #[test]
    fn test_xxh128_diff_matches_sha256_classification() {
        let install = TempDir::new().unwrap();
        let package = TempDir::new().unwrap();

        write(install.path(), "a", "old");
        write(package.path(), "a", "new");
        write(package.path(), "b", "B");

        let diff = DiffGenerator::new(install.path(), package.path())
            .with_algorithm(HashAlgorithm::Xxh128)
            .generate()
            .unwrap();

        assert_eq!(paths(&diff.to_add), vec!["b"]);
        assert_eq!(paths(&diff.to_update), vec!["a"]);
    }

    #[test]
    fn test_missing_install_dir_is_an_error() {
        let package = TempDir::new().unwrap();
        let missing = package.path().join("no-such-dir");

        let result = DiffGenerator::new(&missing, package.path()).generate();
        assert!(result.is_err());
    }
}
