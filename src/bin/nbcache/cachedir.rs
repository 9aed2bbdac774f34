//! Resolving and bootstrapping the on-disk cache root.
//!
//! Grounded on `cache/local/mod.rs::default_cache_dir` (an env var with a
//! filesystem fallback), trimmed to what spec.md §6 actually asks for: an
//! `NBCACHE_DIR` environment variable falling back to `.nbcache/` under the
//! current working directory, rather than the teacher's `directories`-crate
//! platform cache path.

use std::path::{Path, PathBuf};

use color_eyre::eyre::{bail, Context as _, Result};
use nbcache::index::Index;
use nbcache::readers::ReaderRegistry;
use nbcache::store::Store;
use nbcache::{LocalCache, CACHE_FORMAT_VERSION};
use tracing::{info, instrument};

const VERSION_FILE: &str = "version.txt";
const INDEX_FILE: &str = "index.db";
const EXECUTED_DIR: &str = "executed";

#[instrument]
pub fn resolve_cache_root() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("NBCACHE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    std::env::current_dir().map(|cwd| cwd.join(".nbcache")).context("determine current working directory")
}

/// Open (creating if absent) the cache rooted at `root`: checks
/// `version.txt` against [`CACHE_FORMAT_VERSION`], writing it on first use,
/// and runs the startup sweep before returning.
#[instrument]
pub fn open_cache(root: &Path) -> Result<(LocalCache, Index, ReaderRegistry)> {
    std::fs::create_dir_all(root).with_context(|| format!("create cache root {}", root.display()))?;
    check_or_write_version(root)?;

    let index = Index::open(root.join(INDEX_FILE)).context("open relational index")?;
    let project_index = Index::open(root.join("projects.db")).context("open project registry index")?;
    let store = Store::new(root.join(EXECUTED_DIR));
    let cache = LocalCache::new(index, store);
    cache.sweep().context("sweep cache root for orphaned entries")?;

    let readers = ReaderRegistry::with_defaults();
    Ok((cache, project_index, readers))
}

fn check_or_write_version(root: &Path) -> Result<()> {
    let path = root.join(VERSION_FILE);
    match std::fs::read_to_string(&path) {
        Ok(existing) => {
            let existing = existing.trim();
            if existing != CACHE_FORMAT_VERSION {
                bail!("cache at {} was created by format {existing:?}, this binary expects {CACHE_FORMAT_VERSION:?}", root.display());
            }
            Ok(())
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            info!(root = %root.display(), version = CACHE_FORMAT_VERSION, "initializing new cache root");
            std::fs::write(&path, CACHE_FORMAT_VERSION)?;
            Ok(())
        }
        Err(err) => Err(err).context("read cache version file"),
    }
}
