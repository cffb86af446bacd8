// src/error.rs

//! Crate-wide error and result types
//!
//! Only failures that invalidate the run are represented here: a broken
//! tree walk or an unreadable file makes the diff meaningless, and a
//! failed copy during apply triggers rollback. Individually tolerable
//! errors (backup renames, backup removal, restore renames) are logged
//! at the call site and never surface as an `Error`.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that terminate an install run
#[derive(Debug, Error)]
pub enum Error {
    /// A directory traversal failed to enumerate entries
    #[error("failed to walk {}: {source}", path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    /// A file could not be read while computing its digest
    #[error("failed to hash {}: {source}", path.display())]
    Hash {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A destination copy failed during the update or add phase
    #[error("failed to copy {} to {}: {source}", from.display(), to.display())]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Filesystem failure outside the cases above
    #[error(transparent)]
    Io(#[from] io::Error),

    /// The debug fail-in-the-end flag forced the rollback path
    #[error("installation aborted by induced failure")]
    InducedFailure,
}
