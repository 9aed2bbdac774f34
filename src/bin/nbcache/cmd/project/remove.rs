use color_eyre::eyre::Context as _;
use color_eyre::Result;
use nbcache::index::ProjectKey;
use nbcache::project::ProjectRegistry;
use tracing::instrument;

use crate::cachedir;

use super::RemoveOptions;

#[instrument]
pub fn exec(options: RemoveOptions) -> Result<()> {
    let root = cachedir::resolve_cache_root()?;
    let (_cache, index, readers) = cachedir::open_cache(&root).context("open cache")?;

    let project = ProjectRegistry::new(&index, &readers);
    project
        .remove(ProjectKey::Uri(&options.uri))
        .with_context(|| format!("remove notebook {}", options.uri))?;

    println!("stopped tracking {}", options.uri);
    Ok(())
}
