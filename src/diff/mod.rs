// src/diff/mod.rs

//! File-level difference between an install tree and a staged package tree
//!
//! The diff engine hashes both trees, then classifies every regular file
//! into one of three disjoint sets:
//!
//! - **add**: present in the package tree only
//! - **update**: present in both with differing digests (or forced)
//! - **remove**: present in the install tree only
//!
//! The resulting [`DiffResult`] drives the transactional applier; its
//! content depends only on the two trees and the policy flags, never on
//! traversal order.

mod generator;

pub use generator::DiffGenerator;

use serde::{Deserialize, Serialize};

/// Record for a file participating in the diff
///
/// For updates the size is the package-side (incoming) size, because it
/// weights the copy that will be performed, while the digest records the
/// install-side pre-state. Adds and removes describe a single tree, so
/// both fields come from that side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateFileInfo {
    /// Relative path, forward-slash normalized
    pub path: String,
    /// Content fingerprint, lowercase hex
    pub digest: String,
    /// Byte size at classification time
    pub size: u64,
}

/// Policy flags controlling diff classification
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DiffOptions {
    /// Keep install-side files that the package no longer ships
    pub keep_missing: bool,
    /// Re-copy every shared file even when digests match
    pub force_update: bool,
}

/// The three disjoint file sets produced by the diff engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiffResult {
    /// Files present only in the package tree
    pub to_add: Vec<UpdateFileInfo>,
    /// Files present in both trees whose content must be replaced
    pub to_update: Vec<UpdateFileInfo>,
    /// Files present only in the install tree
    pub to_remove: Vec<UpdateFileInfo>,
}

impl DiffResult {
    /// True when applying this diff would be a no-op
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_update.is_empty() && self.to_remove.is_empty()
    }

    /// Total number of files across all three sets
    pub fn total_files(&self) -> usize {
        self.to_add.len() + self.to_update.len() + self.to_remove.len()
    }
}
