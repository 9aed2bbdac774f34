use color_eyre::eyre::Context as _;
use color_eyre::Result;
use nbcache::Cache as _;
use tracing::instrument;

use crate::cachedir;

#[instrument]
pub fn exec() -> Result<()> {
    let root = cachedir::resolve_cache_root()?;
    let (cache, _projects, _readers) = cachedir::open_cache(&root).context("open cache")?;

    println!("cache root: {}", root.display());
    println!("format: {}", nbcache::CACHE_FORMAT_VERSION);

    let records = cache.list_records().context("list cache records")?;
    if records.is_empty() {
        println!("(empty)");
        return Ok(());
    }

    println!("{:<5} {:<34} {:<24} {}", "id", "fingerprint", "accessed", "description");
    for record in records {
        println!(
            "{:<5} {:<34} {:<24} {}",
            record.id,
            record.fingerprint,
            record.accessed_at,
            if record.description.is_empty() { "-" } else { &record.description },
        );
    }
    Ok(())
}
