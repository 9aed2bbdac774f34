//! C1 — Fingerprinter.
//!
//! Reduces a notebook to the subset of its content that determines whether a
//! previous execution can be reused, then digests that canonical form.
//!
//! Grounded on `clients::courier::v1::Key`'s hex-newtype-over-bytes pattern
//! (here: hex string directly, since md5 output is already a fixed-width hex
//! digest and there's no separate binary representation worth keeping
//! around) and on `jupyter_cache/cache/main.py`'s `_create_hashable_nb` /
//! `_hash_notebook` pair, which performs exactly this reduce-then-hash split.

use std::collections::BTreeSet;
use std::fmt;

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{Cell, CellKind, NotebookDoc, CANONICAL_FORMAT_MINOR, SUPPORTED_FORMAT_MAJOR, SUPPORTED_FORMAT_MINOR};

/// Which metadata keys participate in the fingerprint.
///
/// Kept as an explicit struct (rather than two loose `HashSet` parameters)
/// per the design note that dynamic keyword bags should be named types, not
/// bags of positional arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FingerprintSelectors {
    /// Notebook-level metadata keys that participate in the fingerprint.
    /// Default: `{"kernelspec"}`.
    pub notebook_metadata_keys: BTreeSet<String>,
    /// Cell-level metadata keys that participate in the fingerprint.
    /// Default: empty (no cell metadata participates).
    pub cell_metadata_keys: BTreeSet<String>,
}

impl Default for FingerprintSelectors {
    fn default() -> Self {
        Self {
            notebook_metadata_keys: BTreeSet::from(["kernelspec".to_string()]),
            cell_metadata_keys: BTreeSet::new(),
        }
    }
}

/// A fingerprint: the digest of a notebook's canonical form.
///
/// Two notebooks that differ only in prose cells, non-selected metadata,
/// cell ids, execution counts, or outputs hash to the same `Fingerprint`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Serialize, Deserialize)]
#[display("{_0}")]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for Fingerprint {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Reduce a notebook to its canonical form: prose and raw cells dropped,
/// code cell execution state stripped, metadata filtered to the selected
/// keys only.
///
/// This mirrors `_create_hashable_nb`: strip everything that can change
/// without changing what the executor would actually do.
pub fn canonicalize(nb: &NotebookDoc, selectors: &FingerprintSelectors) -> Result<NotebookDoc> {
    if nb.format_major > SUPPORTED_FORMAT_MAJOR
        || (nb.format_major == SUPPORTED_FORMAT_MAJOR && nb.format_minor > SUPPORTED_FORMAT_MINOR)
    {
        return Err(Error::UnsupportedFormat {
            major: nb.format_major,
            minor: nb.format_minor,
        });
    }

    let metadata = nb
        .metadata
        .iter()
        .filter(|(k, _)| selectors.notebook_metadata_keys.contains(*k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let cells = nb
        .code_cells()
        .map(|cell| Cell {
            kind: CellKind::Code,
            source: cell.source.clone(),
            metadata: cell
                .metadata
                .iter()
                .filter(|(k, _)| selectors.cell_metadata_keys.contains(*k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            id: None,
            execution_count: None,
            outputs: Vec::new(),
        })
        .collect();

    Ok(NotebookDoc {
        metadata,
        cells,
        format_major: SUPPORTED_FORMAT_MAJOR,
        format_minor: CANONICAL_FORMAT_MINOR,
    })
}

/// Canonical, deterministic text form of a (already-canonicalized) notebook.
///
/// `serde_json::Map` is a `BTreeMap` under the hood unless the
/// `preserve_order` feature is enabled (it isn't, here), so object keys at
/// every nesting level serialize in sorted order for free; struct field
/// order is fixed by declaration order. Together that's enough for a stable
/// digest across process runs and platforms.
pub fn canonical_text(canon: &NotebookDoc) -> Result<String> {
    Ok(serde_json::to_string(canon)?)
}

/// Canonicalize and fingerprint a notebook in one step.
///
/// Returns both the canonical form (useful to callers who want to compare it
/// structurally, e.g. `Cache::diff`) and its fingerprint.
pub fn fingerprint(
    nb: &NotebookDoc,
    selectors: &FingerprintSelectors,
) -> Result<(NotebookDoc, Fingerprint)> {
    let canon = canonicalize(nb, selectors)?;
    let text = canonical_text(&canon)?;
    let digest = md5::compute(text.as_bytes());
    Ok((canon, Fingerprint(format!("{digest:x}"))))
}
