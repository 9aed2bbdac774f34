//! Library for `nbcache`.
//!
//! A content-addressed cache for executed computational notebooks: notebooks
//! are fingerprinted on their inputs (kernel spec plus code cell sources) so
//! that repeat runs with identical inputs can reuse previously captured
//! outputs and side-effect artifacts instead of re-executing.
//!
//! This library is not intended to be used outside of the `nbcache` binary
//! and its test suite, but is split out as a library so that both can share
//! the same implementation.

pub mod cache;
pub mod diff;
pub mod error;
pub mod exec;
pub mod executor;
pub mod fingerprint;
pub mod fs_util;
pub mod index;
pub mod model;
pub mod project;
pub mod readers;
pub mod store;

pub use cache::{Cache, CacheBundle, CacheOptions, LocalCache, DEFAULT_CACHE_LIMIT};
pub use diff::{diff_notebooks, CellDiffOp, NotebookDiff};
pub use error::{Error, Result};
pub use exec::{Cancellation, ExecutionResult, Filter, Pipeline, PipelineConfig, SandboxMode, Scheduling};
pub use fingerprint::{Fingerprint, FingerprintSelectors};
pub use model::{Cell, CellKind, NotebookDoc, Output};

/// Cache-format version written to `version.txt` at the cache root.
///
/// Encodes both the on-disk layout revision and the digest algorithm in use,
/// per the open question in spec §9: different revisions of the original
/// tool used different digests, so this crate fixes one choice and records
/// it so a future implementation can detect a mismatch.
pub const CACHE_FORMAT_VERSION: &str = "nbcache-v1/md5";
