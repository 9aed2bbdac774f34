//! C5 — Project registry.
//!
//! Tracks which notebooks a project cares about and how to read them,
//! independent of whether they're currently cached. Grounded on
//! `jupyter_cache/cache/main.py`'s staging half (`stage_notebook_file`,
//! `list_staged_records`, `list_nbs_to_exec`) renamed from "staged" to
//! "project" to match this crate's vocabulary, and on `NbStageRecord` in
//! `cache/db.py` for the record shape.

use std::path::{Path, PathBuf};

use tracing::instrument;

use crate::cache::Cache;
use crate::error::{Error, Result};
use crate::fingerprint::FingerprintSelectors;
use crate::fs_util::validate_asset_path;
use crate::index::{CacheRecord, Index, ProjectKey, ProjectRecord};
use crate::model::NotebookDoc;
use crate::readers::{ReaderRegistry, DEFAULT_READER_KEY};

/// Tracks notebooks known to a project and the reader used to load each.
pub struct ProjectRegistry<'a> {
    index: &'a Index,
    readers: &'a ReaderRegistry,
}

impl<'a> ProjectRegistry<'a> {
    pub fn new(index: &'a Index, readers: &'a ReaderRegistry) -> Self {
        Self { index, readers }
    }

    /// Add `uri` to the project, validating that every asset path lies
    /// under the notebook's parent directory. If `uri` is already tracked,
    /// returns the existing record unchanged (mirrors
    /// `NbStageRecord.create_record(raise_on_exists=False)`).
    #[instrument(name = "ProjectRegistry::add", skip(self, assets))]
    pub fn add(&self, uri: &str, assets: &[PathBuf], reader_key: Option<&str>) -> Result<ProjectRecord> {
        if let Some(existing) = self.index.project_record(ProjectKey::Uri(uri))? {
            return Ok(existing);
        }
        let root = Path::new(uri).parent().unwrap_or_else(|| Path::new("."));
        for asset in assets {
            validate_asset_path(root, asset)?;
        }
        let reader_key = reader_key.unwrap_or(DEFAULT_READER_KEY);
        self.readers.get(reader_key)?;
        self.index.insert_project_record(uri, assets, reader_key)
    }

    pub fn remove(&self, key: ProjectKey<'_>) -> Result<()> {
        self.index.remove_project_record(key)
    }

    pub fn get(&self, key: ProjectKey<'_>) -> Result<ProjectRecord> {
        self.index
            .project_record(key)?
            .ok_or_else(|| Error::NotFound("no project record for the given key".to_string()))
    }

    pub fn list(&self) -> Result<Vec<ProjectRecord>> {
        self.index.list_project_records()
    }

    /// Read the notebook a project record points to, via its registered
    /// reader.
    #[instrument(name = "ProjectRegistry::notebook_of", skip(self))]
    pub fn notebook_of(&self, record: &ProjectRecord) -> Result<NotebookDoc> {
        self.readers.read(&record.reader_key, Path::new(&record.uri))
    }

    /// The cache record matching this project record's current notebook
    /// content, if any.
    #[instrument(name = "ProjectRegistry::cached_match_of", skip(self, cache))]
    pub fn cached_match_of(
        &self,
        record: &ProjectRecord,
        cache: &dyn Cache,
        selectors: &FingerprintSelectors,
    ) -> Result<Option<CacheRecord>> {
        let notebook = self.notebook_of(record)?;
        match cache.match_notebook(&notebook, selectors) {
            Ok(cache_record) => Ok(Some(cache_record)),
            Err(Error::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Project records whose current notebook content has no matching cache
    /// entry. Mirrors `list_nbs_to_exec`.
    #[instrument(name = "ProjectRegistry::unexecuted", skip(self, cache))]
    pub fn unexecuted(&self, cache: &dyn Cache, selectors: &FingerprintSelectors) -> Result<Vec<ProjectRecord>> {
        let mut out = Vec::new();
        for record in self.list()? {
            if self.cached_match_of(&record, cache, selectors)?.is_none() {
                out.push(record);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheBundle, CacheOptions, LocalCache};
    use crate::model::Cell;
    use crate::store::Store;
    use pretty_assertions::assert_eq as pretty_assert_eq;
    use serde_json::Map;

    fn setup(dir: &std::path::Path) -> (Index, ReaderRegistry, LocalCache) {
        let index = Index::open(dir.join("index.sqlite3")).unwrap();
        let readers = ReaderRegistry::with_defaults();
        let cache = LocalCache::new(Index::open(dir.join("cache_index.sqlite3")).unwrap(), Store::new(dir.join("executed")));
        (index, readers, cache)
    }

    #[test]
    fn add_is_idempotent_for_the_same_uri() {
        let dir = tempfile::tempdir().unwrap();
        let (index, readers, _cache) = setup(dir.path());
        let project = ProjectRegistry::new(&index, &readers);
        let first = project.add("notebooks/a.ipynb", &[], None).unwrap();
        let second = project.add("notebooks/a.ipynb", &[], None).unwrap();
        pretty_assert_eq!(first.id, second.id);
    }

    #[test]
    fn add_rejects_asset_escaping_notebook_directory() {
        let dir = tempfile::tempdir().unwrap();
        let (index, readers, _cache) = setup(dir.path());
        let project = ProjectRegistry::new(&index, &readers);
        let err = project
            .add("notebooks/a.ipynb", &[PathBuf::from("../../etc/passwd")], None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidAsset { .. }));
    }

    #[test]
    fn unexecuted_lists_projects_without_a_cache_match() {
        let dir = tempfile::tempdir().unwrap();
        let (index, readers, cache) = setup(dir.path());
        let project = ProjectRegistry::new(&index, &readers);

        let nb_path = dir.path().join("a.nb.json");
        let notebook = NotebookDoc {
            metadata: Map::new(),
            cells: vec![Cell::new_code("1 + 1")],
            format_major: 4,
            format_minor: 5,
        };
        std::fs::write(&nb_path, serde_json::to_string(&notebook).unwrap()).unwrap();
        project.add(nb_path.to_str().unwrap(), &[], None).unwrap();

        let selectors = FingerprintSelectors::default();
        let pending = project.unexecuted(&cache, &selectors).unwrap();
        pretty_assert_eq!(pending.len(), 1);

        let mut executed = notebook.clone();
        executed.cells[0].execution_count = Some(1);
        cache
            .cache(
                CacheBundle { notebook: executed, origin_uri: Some(nb_path.to_str().unwrap().into()), artifacts: vec![], data: Map::new() },
                &CacheOptions::default(),
            )
            .unwrap();

        let pending = project.unexecuted(&cache, &selectors).unwrap();
        pretty_assert_eq!(pending.len(), 0);
    }
}
