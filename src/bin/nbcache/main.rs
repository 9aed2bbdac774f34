//! The binary entrypoint for `nbcache`.

use clap::{Parser, Subcommand};
use color_eyre::Result;
use tracing::instrument;
use tracing_subscriber::util::SubscriberInitExt;

mod cachedir;
mod cmd;
mod log;

#[derive(Clone, Debug, Parser)]
#[command(name = "nbcache", about = "Content-addressed cache for executed notebooks")]
struct TopLevelFlags {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, Subcommand)]
enum Command {
    /// Inspect or clear the cache.
    #[clap(subcommand)]
    Cache(cmd::cache::Command),

    /// Track, untrack, or list project notebooks.
    #[clap(subcommand)]
    Project(cmd::project::Command),

    /// Execute every outdated project notebook and cache the results.
    Exec(cmd::exec::Options),
}

#[instrument]
fn main() -> Result<()> {
    color_eyre::install()?;
    let top = TopLevelFlags::parse();
    log::make_logger()?.init();

    match top.command {
        Command::Cache(cmd) => match cmd {
            cmd::cache::Command::Show => cmd::cache::show::exec(),
            cmd::cache::Command::Reset(options) => cmd::cache::reset::exec(options),
        },
        Command::Project(cmd) => cmd::project::exec(cmd),
        Command::Exec(options) => cmd::exec::exec(options),
    }
}
