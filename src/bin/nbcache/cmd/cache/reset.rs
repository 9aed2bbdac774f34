use std::io::Write as _;

use clap::Args;
use color_eyre::eyre::Context as _;
use color_eyre::Result;
use nbcache::Cache as _;
use tracing::instrument;

use crate::cachedir;

#[derive(Clone, Debug, Args)]
pub struct Options {
    /// Skip the confirmation prompt.
    #[arg(short, long)]
    yes: bool,
}

#[instrument]
pub fn exec(options: Options) -> Result<()> {
    let root = cachedir::resolve_cache_root()?;
    let (cache, _projects, _readers) = cachedir::open_cache(&root).context("open cache")?;

    if !options.yes {
        print!("This will delete every cache record under {}. Continue? [y/N] ", root.display());
        std::io::stdout().flush().ok();
        let mut answer = String::new();
        std::io::stdin().read_line(&mut answer).context("read confirmation")?;
        if !matches!(answer.trim(), "y" | "Y" | "yes") {
            println!("Aborted.");
            return Ok(());
        }
    }

    cache.clear().context("clear cache")?;
    println!("Cache cleared.");
    Ok(())
}
