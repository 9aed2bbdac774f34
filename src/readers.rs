//! C7 — Reader plug-in registry.
//!
//! Grounded on `jupyter_cache/readers.py`: a key-to-function map with
//! override protection (`add_reader(key, reader, override=False)` raises if
//! the key already exists unless the caller opts in). The original is a
//! module-level global; per the design note that process-global state
//! should be an explicit object instead, this is a plain struct constructed
//! by the caller and threaded through explicitly (into `ProjectRegistry`),
//! not a `static`.
//!
//! Entry-point based dynamic discovery (`ENTRY_POINT_GROUP_READER`) has no
//! equivalent here: Rust has no runtime plugin-loading story comparable to
//! Python entry points, so this registry only holds readers registered in
//! process.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::model::NotebookDoc;

/// A function that reads a notebook-like file from a URI (a filesystem path,
/// in this crate) into a `NotebookDoc`.
pub type ReaderFn = Arc<dyn Fn(&Path) -> Result<NotebookDoc> + Send + Sync>;

/// The default reader key, used when a project doesn't name one explicitly.
pub const DEFAULT_READER_KEY: &str = "default";

#[derive(Clone)]
pub struct ReaderRegistry {
    readers: HashMap<String, ReaderFn>,
}

impl ReaderRegistry {
    /// A registry pre-populated with the built-in reader, under
    /// [`DEFAULT_READER_KEY`].
    pub fn with_defaults() -> Self {
        let mut registry = Self { readers: HashMap::new() };
        registry
            .register(DEFAULT_READER_KEY, Arc::new(read_default), false)
            .expect("default reader key is unused in a fresh registry");
        registry
    }

    pub fn empty() -> Self {
        Self { readers: HashMap::new() }
    }

    /// Register `reader` under `key`. Errors if `key` is already registered
    /// and `override_existing` is false.
    pub fn register(&mut self, key: impl Into<String>, reader: ReaderFn, override_existing: bool) -> Result<()> {
        let key = key.into();
        if !override_existing && self.readers.contains_key(&key) {
            return Err(Error::ReaderAlreadyRegistered(key));
        }
        self.readers.insert(key, reader);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<ReaderFn> {
        self.readers.get(key).cloned().ok_or_else(|| Error::ReaderUnavailable(key.to_string()))
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.readers.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn read(&self, key: &str, uri: &Path) -> Result<NotebookDoc> {
        (self.get(key)?)(uri)
    }
}

impl Default for ReaderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// The built-in reader: notebooks are stored on disk as the same JSON this
/// crate writes into the cache (see `fingerprint::canonical_text` for the
/// canonical subset; on-disk project notebooks carry the full document).
fn read_default(uri: &Path) -> Result<NotebookDoc> {
    let text = std::fs::read_to_string(uri)?;
    Ok(serde_json::from_str(&text)?)
}
