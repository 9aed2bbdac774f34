//! C4 — Cache engine.
//!
//! Ties the fingerprinter (C1), index (C2), and blob store (C3) together
//! into the cache's public read/write contract. Exposed as a trait with one
//! concrete implementation, `LocalCache`, per the design note that an
//! abstract interface should exist at this seam even though only one
//! implementation ships — mirroring `cache::backend::CacheBackend` /
//! `cache::local::LocalBackend` in the teacher.
//!
//! Operation semantics (`cache`, `match_notebook`, `get`, `remove`,
//! `merge_into`, eviction) are grounded on `jupyter_cache/cache/main.py`'s
//! `JupyterCacheBase` (`commit_notebook_bundle`, `get_commit_bundle`,
//! `remove_commit`, `match_commit_notebook`, `truncate_commits`).

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde_json::{Map, Value};
use tracing::{instrument, warn};

use crate::error::{Error, Result};
use crate::fingerprint::{self, Fingerprint, FingerprintSelectors};
use crate::index::{CacheRecord, Index};
use crate::model::{Cell, CellKind, NotebookDoc};
use crate::store::{ArtifactSource, Store};

/// Default value of the `cache_limit` setting when the settings table has no
/// row for it yet (spec §3: "the only required key is `cache_limit`
/// ... default 1000").
pub const DEFAULT_CACHE_LIMIT: u64 = 1000;

/// Options for [`Cache::cache`]. Kept as one explicit struct rather than
/// positional booleans, per the design note on keyword bags.
#[derive(Clone, Debug)]
pub struct CacheOptions {
    /// Validate that code cells were executed in a contiguous 1, 2, 3, ...
    /// sequence before accepting the notebook (mirrors
    /// `_validate_nb_bundle`).
    pub check_validity: bool,
    /// If a record already exists for this fingerprint, replace it instead
    /// of erroring.
    pub overwrite: bool,
    pub description: String,
    pub selectors: FingerprintSelectors,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            check_validity: true,
            overwrite: false,
            description: String::new(),
            selectors: FingerprintSelectors::default(),
        }
    }
}

/// Everything needed to cache one executed notebook: the notebook itself,
/// where it came from, and the artifacts it produced.
pub struct CacheBundle {
    pub notebook: NotebookDoc,
    pub origin_uri: Option<String>,
    pub artifacts: Vec<ArtifactSource>,
    pub data: Map<String, Value>,
}

/// A notebook plus its artifacts, read back out of the cache.
pub struct CachedBundle {
    pub record: CacheRecord,
    pub notebook: NotebookDoc,
    pub artifacts: Vec<(PathBuf, PathBuf)>,
}

/// Public contract of the cache engine. See module docs for grounding.
pub trait Cache: Send + Sync {
    fn cache(&self, bundle: CacheBundle, options: &CacheOptions) -> Result<CacheRecord>;
    fn match_notebook(&self, notebook: &NotebookDoc, selectors: &FingerprintSelectors) -> Result<CacheRecord>;
    fn get(&self, id: i64) -> Result<CachedBundle>;
    fn get_codecell(&self, id: i64, index: usize) -> Result<Cell>;
    fn get_record(&self, id: i64) -> Result<CacheRecord>;
    fn list_records(&self) -> Result<Vec<CacheRecord>>;
    fn remove(&self, id: i64) -> Result<()>;
    fn clear(&self) -> Result<()>;
    fn merge_into(&self, notebook: &NotebookDoc, selectors: &FingerprintSelectors) -> Result<(CacheRecord, NotebookDoc)>;
    fn diff(&self, id: i64, notebook: &NotebookDoc, selectors: &FingerprintSelectors) -> Result<(CacheRecord, crate::diff::NotebookDiff)>;
}

/// Filesystem-and-SQLite cache engine: the only implementation of [`Cache`]
/// this crate ships.
pub struct LocalCache {
    index: Index,
    store: Store,
}

impl LocalCache {
    pub fn new(index: Index, store: Store) -> Self {
        Self { index, store }
    }

    /// Delete cache records beyond the retained count, per the
    /// `cache_limit` setting (default [`DEFAULT_CACHE_LIMIT`] if unset), then
    /// sweep their blob directories. Mirrors `truncate_commits`, called
    /// after every successful `cache()`.
    #[instrument(name = "LocalCache::evict", skip(self))]
    fn evict(&self) -> Result<()> {
        let limit = self
            .index
            .setting_get("cache_limit")?
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_CACHE_LIMIT);
        let to_evict = self.index.oldest_to_evict(limit as usize)?;
        if to_evict.is_empty() {
            return Ok(());
        }
        for id in &to_evict {
            if let Some(record) = self.index.cache_record_by_id(*id)? {
                self.store.remove_tree(&record.fingerprint)?;
            }
        }
        self.index.remove_cache_records(&to_evict)?;
        Ok(())
    }

    /// Reconcile the index and the blob store: index rows whose directory is
    /// missing are deleted, and directories with no matching row are
    /// deleted. Runs once, at cache open.
    #[instrument(name = "LocalCache::sweep", skip(self))]
    pub fn sweep(&self) -> Result<()> {
        let records = self.index.list_cache_records()?;
        let mut known = BTreeSet::new();
        let mut orphan_records = Vec::new();
        for record in &records {
            known.insert(record.fingerprint.as_str().to_string());
            if !self.store.has_tree(&record.fingerprint) {
                warn!(fingerprint = %record.fingerprint, "cache record has no blob directory, removing row");
                orphan_records.push(record.id);
            }
        }
        self.index.remove_cache_records(&orphan_records)?;

        for fingerprint in self.store.list_trees()? {
            if !known.contains(fingerprint.as_str()) {
                warn!(%fingerprint, "blob directory has no cache record, removing directory");
                self.store.remove_tree(&fingerprint)?;
            }
        }
        Ok(())
    }

    fn bump_and_fetch(&self, record: CacheRecord) -> Result<CachedBundle> {
        if !self.store.has_tree(&record.fingerprint) {
            return Err(Error::StorageCorrupt(record.fingerprint));
        }
        self.index.touch_cache_record(record.id)?;
        let text = self.store.read_notebook(&record.fingerprint)?;
        let notebook: NotebookDoc = serde_json::from_str(&text)?;
        let artifacts = self.store.iter_artifacts(&record.fingerprint)?;
        Ok(CachedBundle { record, notebook, artifacts })
    }
}

/// Validate that code cells were executed in sequence 1, 2, 3, ... with no
/// gaps or repeats, mirroring `_validate_nb_bundle`.
fn validate_execution_sequence(notebook: &NotebookDoc) -> Result<()> {
    for (index, cell) in notebook.code_cells().enumerate() {
        let expected = (index + 1) as u64;
        if cell.execution_count != Some(expected) {
            return Err(Error::InvalidNotebook {
                index,
                expected,
                found: cell.execution_count,
            });
        }
    }
    Ok(())
}

impl Cache for LocalCache {
    #[instrument(name = "LocalCache::cache", skip(self, bundle))]
    fn cache(&self, bundle: CacheBundle, options: &CacheOptions) -> Result<CacheRecord> {
        if options.check_validity {
            validate_execution_sequence(&bundle.notebook)?;
        }

        let (canon, fp) = fingerprint::fingerprint(&bundle.notebook, &options.selectors)?;

        if let Some(existing) = self.index.cache_record_by_fingerprint(&fp)? {
            if !options.overwrite {
                return Err(Error::AlreadyCached(fp));
            }
            self.remove(existing.id)?;
        }

        // Index row is written before the blob tree, so a crash between the
        // two steps leaves an orphan row (caught by the next `sweep`) rather
        // than an orphan blob directory masquerading as a valid entry.
        let record = self.index.insert_cache_record(
            &fp,
            bundle.origin_uri.as_deref(),
            &options.description,
            &bundle.data,
        )?;

        let text = fingerprint::canonical_text(&full_notebook_for_storage(&canon, &bundle.notebook))?;
        if let Err(err) = self.store.write_notebook(&fp, &text).and_then(|()| self.store.write_artifacts(&fp, &bundle.artifacts)) {
            self.index.remove_cache_records(&[record.id])?;
            return Err(err);
        }

        self.evict()?;
        Ok(record)
    }

    #[instrument(name = "LocalCache::match_notebook", skip(self, notebook))]
    fn match_notebook(&self, notebook: &NotebookDoc, selectors: &FingerprintSelectors) -> Result<CacheRecord> {
        let (_, fp) = fingerprint::fingerprint(notebook, selectors)?;
        let record = self
            .index
            .cache_record_by_fingerprint(&fp)?
            .ok_or_else(|| Error::NotFound(format!("no cache entry for fingerprint {fp}")))?;
        self.index.touch_cache_record(record.id)?;
        Ok(record)
    }

    #[instrument(name = "LocalCache::get", skip(self))]
    fn get(&self, id: i64) -> Result<CachedBundle> {
        let record = self.get_record(id)?;
        self.bump_and_fetch(record)
    }

    #[instrument(name = "LocalCache::get_codecell", skip(self))]
    fn get_codecell(&self, id: i64, index: usize) -> Result<Cell> {
        let bundle = self.get(id)?;
        bundle
            .notebook
            .code_cells()
            .nth(index)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("cache record {id} has no code cell at index {index}")))
    }

    #[instrument(name = "LocalCache::get_record", skip(self))]
    fn get_record(&self, id: i64) -> Result<CacheRecord> {
        self.index
            .cache_record_by_id(id)?
            .ok_or_else(|| Error::NotFound(format!("no cache record with id {id}")))
    }

    #[instrument(name = "LocalCache::list_records", skip(self))]
    fn list_records(&self) -> Result<Vec<CacheRecord>> {
        self.index.list_cache_records()
    }

    #[instrument(name = "LocalCache::remove", skip(self))]
    fn remove(&self, id: i64) -> Result<()> {
        let record = self.get_record(id)?;
        self.index.remove_cache_records(&[id])?;
        self.store.remove_tree(&record.fingerprint)?;
        Ok(())
    }

    #[instrument(name = "LocalCache::clear", skip(self))]
    fn clear(&self) -> Result<()> {
        self.index.clear_cache_records()?;
        self.store.clear_all()?;
        Ok(())
    }

    #[instrument(name = "LocalCache::merge_into", skip(self, notebook))]
    fn merge_into(&self, notebook: &NotebookDoc, selectors: &FingerprintSelectors) -> Result<(CacheRecord, NotebookDoc)> {
        let (_, fp) = fingerprint::fingerprint(notebook, selectors)?;
        let record = self
            .index
            .cache_record_by_fingerprint(&fp)?
            .ok_or_else(|| Error::NotFound(format!("no cache entry for fingerprint {fp}")))?;

        let text = self.store.read_notebook(&record.fingerprint)?;
        let cached: NotebookDoc = serde_json::from_str(&text)?;

        let mut merged = notebook.clone();
        for key in &selectors.notebook_metadata_keys {
            if let Some(value) = cached.metadata.get(key) {
                merged.metadata.insert(key.clone(), value.clone());
            }
        }

        let cached_code: Vec<&Cell> = cached.code_cells().collect();
        let mut cached_iter = cached_code.into_iter();
        for cell in merged.cells.iter_mut().filter(|c| c.kind == CellKind::Code) {
            let Some(cached_cell) = cached_iter.next() else { break };
            cell.source = cached_cell.source.clone();
            cell.execution_count = cached_cell.execution_count;
            cell.outputs = cached_cell.outputs.clone();
            for key in &selectors.cell_metadata_keys {
                if let Some(value) = cached_cell.metadata.get(key) {
                    cell.metadata.insert(key.clone(), value.clone());
                }
            }
            if cell.id.is_none() {
                cell.id = cached_cell.id.clone();
            }
        }

        Ok((record, merged))
    }

    #[instrument(name = "LocalCache::diff", skip(self, notebook))]
    fn diff(&self, id: i64, notebook: &NotebookDoc, selectors: &FingerprintSelectors) -> Result<(CacheRecord, crate::diff::NotebookDiff)> {
        let record = self.get_record(id)?;
        let text = self.store.read_notebook(&record.fingerprint)?;
        let committed: NotebookDoc = serde_json::from_str(&text)?;
        let committed_canon = fingerprint::canonicalize(&committed, selectors)?;
        let other_canon = fingerprint::canonicalize(notebook, selectors)?;
        let diff = crate::diff::diff_notebooks(&committed_canon, &other_canon);
        Ok((record, diff))
    }
}

/// What's committed to storage is the canonical cell sequence (code cells
/// only, in the same order `canonicalize` produced them) with each cell's
/// real execution state — `id`, `metadata`, `execution_count`, `outputs` —
/// reattached from the notebook that was actually executed. Prose and raw
/// cells are dropped rather than stored, mirroring `_prepare_nb_for_commit`
/// (which empties non-code cells rather than hashing them) and this crate's
/// own Non-goal that prose content isn't tracked. Notebook-level metadata is
/// taken from `original` unfiltered: the fingerprint only needs a few
/// selected keys to compare by, but everything the executor produced is
/// still worth keeping on the stored copy.
fn full_notebook_for_storage(canon: &NotebookDoc, original: &NotebookDoc) -> NotebookDoc {
    let mut originals = original.code_cells();
    let cells = canon
        .cells
        .iter()
        .map(|canon_cell| {
            let mut cell = canon_cell.clone();
            if let Some(orig) = originals.next() {
                cell.metadata = orig.metadata.clone();
                cell.id = orig.id.clone();
                cell.execution_count = orig.execution_count;
                cell.outputs = orig.outputs.clone();
            }
            cell
        })
        .collect();

    NotebookDoc {
        metadata: original.metadata.clone(),
        cells,
        format_major: canon.format_major,
        format_minor: canon.format_minor,
    }
}
