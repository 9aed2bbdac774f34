use color_eyre::eyre::Context as _;
use color_eyre::Result;
use nbcache::project::ProjectRegistry;
use tracing::instrument;

use crate::cachedir;

#[instrument]
pub fn exec() -> Result<()> {
    let root = cachedir::resolve_cache_root()?;
    let (_cache, index, readers) = cachedir::open_cache(&root).context("open cache")?;

    let project = ProjectRegistry::new(&index, &readers);
    let records = project.list().context("list project records")?;
    if records.is_empty() {
        println!("(no notebooks tracked)");
        return Ok(());
    }

    println!("{:<5} {:<10} {:<10} {}", "id", "reader", "traceback", "uri");
    for record in records {
        println!(
            "{:<5} {:<10} {:<10} {}",
            record.id,
            record.reader_key,
            if record.traceback.is_some() { "error" } else { "-" },
            record.uri,
        );
    }
    Ok(())
}
