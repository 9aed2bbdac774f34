//! In-memory representation of a notebook document.
//!
//! This is deliberately a minimal subset of the Jupyter notebook format: only
//! the fields the cache actually reasons about (cell kind, source, metadata,
//! execution count, outputs) are modeled. Anything else present in a
//! notebook file on disk is round-tripped opaquely through `metadata` maps by
//! the reader that produced this struct; the cache itself never needs to
//! understand notebook-format fields it doesn't use.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Newest notebook format major version this crate understands.
pub const SUPPORTED_FORMAT_MAJOR: i64 = 4;

/// Newest notebook format minor version this crate understands.
pub const SUPPORTED_FORMAT_MINOR: i64 = 5;

/// `format_minor` written onto a canonicalized (and therefore also a stored)
/// notebook, pinned per the canonicalization rules regardless of how new a
/// minor version the input used, as long as it's within
/// [`SUPPORTED_FORMAT_MINOR`].
pub const CANONICAL_FORMAT_MINOR: i64 = 4;

/// A notebook document: ordered cells plus document-level metadata.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NotebookDoc {
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub cells: Vec<Cell>,
    pub format_major: i64,
    pub format_minor: i64,
}

impl NotebookDoc {
    /// Iterate over code cells only, in document order.
    pub fn code_cells(&self) -> impl Iterator<Item = &Cell> {
        self.cells.iter().filter(|c| c.kind == CellKind::Code)
    }

    /// Iterate over code cells only, mutably, in document order.
    pub fn code_cells_mut(&mut self) -> impl Iterator<Item = &mut Cell> {
        self.cells.iter_mut().filter(|c| c.kind == CellKind::Code)
    }
}

/// The three cell kinds a notebook can contain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellKind {
    Code,
    Prose,
    Raw,
}

/// One notebook cell.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub kind: CellKind,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Stable per-cell identifier, if the source format carries one
    /// (notebook format 4.5+ requires it; earlier formats don't have it).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Only meaningful for code cells; `None` means "not yet executed".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_count: Option<u64>,
    #[serde(default)]
    pub outputs: Vec<Output>,
}

impl Cell {
    pub fn new_code(source: impl Into<String>) -> Self {
        Self {
            kind: CellKind::Code,
            source: source.into(),
            metadata: Map::new(),
            id: None,
            execution_count: None,
            outputs: Vec::new(),
        }
    }

    pub fn new_prose(source: impl Into<String>) -> Self {
        Self {
            kind: CellKind::Prose,
            source: source.into(),
            metadata: Map::new(),
            id: None,
            execution_count: None,
            outputs: Vec::new(),
        }
    }
}

/// One recorded output of executing a code cell.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "output_type", rename_all = "snake_case")]
pub enum Output {
    Stream {
        name: String,
        text: String,
    },
    DisplayData {
        #[serde(default)]
        data: Map<String, Value>,
        #[serde(default)]
        metadata: Map<String, Value>,
    },
    ExecuteResult {
        #[serde(default)]
        execution_count: Option<u64>,
        #[serde(default)]
        data: Map<String, Value>,
        #[serde(default)]
        metadata: Map<String, Value>,
    },
    Error {
        ename: String,
        evalue: String,
        #[serde(default)]
        traceback: Vec<String>,
    },
}
