// src/hash.rs

//! Content fingerprinting for install and package trees
//!
//! Two algorithms are supported behind one interface:
//! - **SHA-256**: cryptographic, matches external manifests
//! - **XXH128**: non-cryptographic, extremely fast
//!
//! The diff engine only needs a stable fingerprint to decide whether a
//! file changed, so either algorithm works as long as both trees use the
//! same one within a single run. SHA-256 is the default.

use crate::error::{Error, Result};
use crate::fsutil::{collect_regular_files, relative_key};
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;
use tracing::debug;
use xxhash_rust::xxh3::xxh3_128;

/// Hash algorithm selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashAlgorithm {
    /// SHA-256 (256-bit cryptographic hash)
    #[default]
    Sha256,

    /// XXH128 (128-bit non-cryptographic hash)
    ///
    /// The digest is a content fingerprint, not an authenticator, so
    /// this is a valid choice when hashing throughput dominates.
    Xxh128,
}

impl HashAlgorithm {
    /// Get the hash output length in bytes
    #[inline]
    pub const fn output_len(&self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Xxh128 => 16,
        }
    }

    /// Get the hash output length as a hex string
    #[inline]
    pub const fn hex_len(&self) -> usize {
        self.output_len() * 2
    }

    /// Get the algorithm name as a string
    #[inline]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Xxh128 => "xxh128",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "xxh128" | "xxhash" | "xxh3" => Ok(Self::Xxh128),
            _ => Err(format!("unknown hash algorithm: {}", s)),
        }
    }
}

/// Hasher that can compute digests using any supported algorithm
pub struct Hasher {
    algorithm: HashAlgorithm,
    state: HasherState,
}

enum HasherState {
    Sha256(Sha256),
    // XXH3 has no incremental API in the bindings we use, buffer instead
    Xxh128(Vec<u8>),
}

impl Hasher {
    /// Create a new hasher with the specified algorithm
    pub fn new(algorithm: HashAlgorithm) -> Self {
        let state = match algorithm {
            HashAlgorithm::Sha256 => HasherState::Sha256(Sha256::new()),
            HashAlgorithm::Xxh128 => HasherState::Xxh128(Vec::new()),
        };
        Self { algorithm, state }
    }

    /// Update the hasher with more data
    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            HasherState::Sha256(hasher) => hasher.update(data),
            HasherState::Xxh128(buffer) => buffer.extend_from_slice(data),
        }
    }

    /// Finalize and return the digest as a lowercase hex string
    pub fn finalize(self) -> String {
        match self.state {
            HasherState::Sha256(hasher) => format!("{:x}", hasher.finalize()),
            HasherState::Xxh128(buffer) => format!("{:032x}", xxh3_128(&buffer)),
        }
    }

    /// Get the algorithm being used
    #[inline]
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }
}

/// Compute the digest of a byte slice
pub fn hash_bytes(algorithm: HashAlgorithm, data: &[u8]) -> String {
    match algorithm {
        HashAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            hasher.update(data);
            format!("{:x}", hasher.finalize())
        }
        HashAlgorithm::Xxh128 => format!("{:032x}", xxh3_128(data)),
    }
}

/// Compute the digest of data from a reader
pub fn hash_reader<R: Read>(algorithm: HashAlgorithm, reader: &mut R) -> io::Result<String> {
    let mut hasher = Hasher::new(algorithm);
    let mut buffer = [0u8; 8192];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize())
}

/// Compute the digest of a file's content, streaming
pub fn hash_file(path: &Path, algorithm: HashAlgorithm) -> Result<String> {
    let mut file = File::open(path).map_err(|e| Error::Hash {
        path: path.to_path_buf(),
        source: e,
    })?;

    hash_reader(algorithm, &mut file).map_err(|e| Error::Hash {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Hash every regular file under `root`.
///
/// Returns a map from forward-slash relative path to digest. Files are
/// hashed in parallel; the walk itself and any unreadable file abort
/// with an error, because a partial map would misclassify every file
/// it is missing.
pub fn hash_tree(root: &Path, algorithm: HashAlgorithm) -> Result<BTreeMap<String, String>> {
    let files = collect_regular_files(root)?;

    let hashes = files
        .par_iter()
        .map(|path| {
            let digest = hash_file(path, algorithm)?;
            Ok((relative_key(root, path), digest))
        })
        .collect::<Result<BTreeMap<_, _>>>()?;

    debug!("Hashed {} files under {}", hashes.len(), root.display());
    Ok(hashes)
}
