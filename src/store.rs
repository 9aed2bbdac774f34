//! C3 — Blob store.
//!
//! Each cached notebook gets a directory named after its fingerprint,
//! containing the canonical notebook text and an `artifacts/` subtree of
//! whatever files execution produced. Grounded on
//! `cache/local/cas.rs::LocalCas`'s temp-file-then-rename write discipline,
//! adapted from a flat single-file-per-key CAS to a directory-per-key tree
//! (since a notebook's artifacts are themselves a filesystem tree, not a
//! single blob) and without the zstd compression layer the teacher uses for
//! build artifacts — canonical notebook text is stored as plain UTF-8 per
//! the external interface contract.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::Result;
use crate::fingerprint::Fingerprint;
use crate::fs_util::validate_artifact_path;

const NOTEBOOK_FILE_NAME: &str = "base.nb";
const ARTIFACTS_DIR_NAME: &str = "artifacts";

/// Filesystem-backed blob store rooted at `<cache-root>/executed`.
#[derive(Clone, Debug)]
pub struct Store {
    root: PathBuf,
}

/// A single artifact to copy into the store, described as a relative label
/// plus the file on disk that currently holds its content.
#[derive(Clone, Debug)]
pub struct ArtifactSource {
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
}

/// A scoped handle to an artifact directory suitable for writing into
/// directly (e.g. so an executor's sandbox can be pointed straight at the
/// final artifact location).
///
/// For this directory-backed store no materialization step is needed: the
/// path is simply the real artifacts directory for the fingerprint, created
/// on construction. The guard exists so callers have a single type to hold
/// regardless of what a future store implementation might need to do to
/// make a path usable (e.g. a remote store might need to stage a local
/// temp directory and upload it on drop).
#[derive(Debug)]
pub struct ArtifactScope {
    path: PathBuf,
}

impl ArtifactScope {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Store {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn tree_dir(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.root.join(fingerprint.as_str())
    }

    fn notebook_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.tree_dir(fingerprint).join(NOTEBOOK_FILE_NAME)
    }

    fn artifacts_dir(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.tree_dir(fingerprint).join(ARTIFACTS_DIR_NAME)
    }

    pub fn has_tree(&self, fingerprint: &Fingerprint) -> bool {
        self.notebook_path(fingerprint).is_file()
    }

    /// List every fingerprint that currently has a directory on disk.
    pub fn list_trees(&self) -> Result<Vec<Fingerprint>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    out.push(Fingerprint::from(name.to_string()));
                }
            }
        }
        Ok(out)
    }

    /// Write the canonical notebook text for `fingerprint`, atomically.
    pub fn write_notebook(&self, fingerprint: &Fingerprint, text: &str) -> Result<()> {
        let dir = self.tree_dir(fingerprint);
        fs::create_dir_all(&dir)?;
        atomic_write(&self.notebook_path(fingerprint), text.as_bytes())?;
        Ok(())
    }

    pub fn read_notebook(&self, fingerprint: &Fingerprint) -> Result<String> {
        Ok(fs::read_to_string(self.notebook_path(fingerprint))?)
    }

    /// Copy every artifact into `<tree>/artifacts/<relative_path>`, validating
    /// each relative path first so a malicious or buggy executor can't write
    /// outside the artifacts tree.
    pub fn write_artifacts(&self, fingerprint: &Fingerprint, artifacts: &[ArtifactSource]) -> Result<()> {
        let artifacts_dir = self.artifacts_dir(fingerprint);
        fs::create_dir_all(&artifacts_dir)?;
        for artifact in artifacts {
            validate_artifact_path(&artifact.relative_path)?;
            let dst = artifacts_dir.join(&artifact.relative_path);
            if let Some(parent) = dst.parent() {
                fs::create_dir_all(parent)?;
            }
            let bytes = fs::read(&artifact.absolute_path)?;
            atomic_write(&dst, &bytes)?;
        }
        Ok(())
    }

    /// List `(relative_path, absolute_path)` for every artifact currently
    /// stored for `fingerprint`.
    pub fn iter_artifacts(&self, fingerprint: &Fingerprint) -> Result<Vec<(PathBuf, PathBuf)>> {
        let dir = self.artifacts_dir(fingerprint);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in WalkDir::new(&dir) {
            let entry = entry?;
            if entry.file_type().is_file() {
                let relative = entry.path().strip_prefix(&dir).expect("walked under dir").to_path_buf();
                out.push((relative, entry.path().to_path_buf()));
            }
        }
        Ok(out)
    }

    /// A scoped handle to the (possibly not-yet-existing) artifacts directory
    /// for `fingerprint`, suitable for an executor to write directly into.
    pub fn temp_artifact_path(&self, fingerprint: &Fingerprint) -> Result<ArtifactScope> {
        let dir = self.artifacts_dir(fingerprint);
        fs::create_dir_all(&dir)?;
        Ok(ArtifactScope { path: dir })
    }

    pub fn remove_tree(&self, fingerprint: &Fingerprint) -> Result<()> {
        let dir = self.tree_dir(fingerprint);
        if dir.is_dir() {
            fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }

    pub fn clear_all(&self) -> Result<()> {
        if self.root.is_dir() {
            fs::remove_dir_all(&self.root)?;
        }
        fs::create_dir_all(&self.root)?;
        Ok(())
    }
}

fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp.");
    temp.push(Uuid::new_v4().to_string());
    let temp = PathBuf::from(temp);
    fs::write(&temp, content)?;
    match fs::rename(&temp, path) {
        Ok(()) => Ok(()),
        Err(err) => {
            let _ = fs::remove_file(&temp);
            Err(err)
        }
    }
}
