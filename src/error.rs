//! Crate-wide error taxonomy.
//!
//! One flat enum rather than one per module: every module here lives in the
//! same crate and the taxonomy is small enough that splitting it up would
//! just mean re-wrapping at each boundary. Grounded on the per-crate
//! `error.rs` convention from the `context-finder-mcp` pack (`thiserror`
//! enum, `#[from]` for the lower-level errors it absorbs, a crate-local
//! `Result` alias).

use std::path::PathBuf;

use thiserror::Error;

use crate::fingerprint::Fingerprint;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("notebook format {major}.{minor} is newer than this cache understands")]
    UnsupportedFormat { major: i64, minor: i64 },

    #[error("cell {index}: execution_count {found:?} does not match the expected sequence position {expected}")]
    InvalidNotebook {
        index: usize,
        expected: u64,
        found: Option<u64>,
    },

    #[error("fingerprint {0} is already cached")]
    DuplicateFingerprint(Fingerprint),

    #[error("fingerprint {0} is already cached (pass overwrite to replace it)")]
    AlreadyCached(Fingerprint),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("asset path {path} does not lie under project root {root}")]
    InvalidAsset { path: PathBuf, root: PathBuf },

    #[error("artifact path {0} is absolute or escapes its root with '..'")]
    InvalidArtifactPath(PathBuf),

    #[error("no reader registered under key {0:?}")]
    ReaderUnavailable(String),

    #[error("reader key {0:?} is already registered")]
    ReaderAlreadyRegistered(String),

    #[error("cache entry for fingerprint {0} has no blob directory on disk")]
    StorageCorrupt(Fingerprint),

    #[error("execution of {uri} failed: {reason}")]
    ExecutorFailed { uri: String, reason: String },

    #[error(transparent)]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    WalkDir(#[from] walkdir::Error),
}
