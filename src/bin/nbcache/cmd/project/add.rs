use color_eyre::eyre::Context as _;
use color_eyre::Result;
use tracing::instrument;

use crate::cachedir;
use nbcache::project::ProjectRegistry;

use super::AddOptions;

#[instrument]
pub fn exec(options: AddOptions) -> Result<()> {
    let root = cachedir::resolve_cache_root()?;
    let (_cache, index, readers) = cachedir::open_cache(&root).context("open cache")?;

    let project = ProjectRegistry::new(&index, &readers);
    let record = project
        .add(&options.uri, &options.assets, options.reader.as_deref())
        .with_context(|| format!("add notebook {}", options.uri))?;

    println!("tracking {} (id {})", record.uri, record.id);
    Ok(())
}
