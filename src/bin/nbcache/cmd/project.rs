use std::path::PathBuf;

use clap::{Args, Subcommand};

#[derive(Clone, Debug, Subcommand)]
pub enum Command {
    /// Track a notebook (and its asset files) under the project.
    Add(AddOptions),

    /// Stop tracking a notebook.
    Remove(RemoveOptions),

    /// List every tracked notebook.
    List,
}

#[derive(Clone, Debug, Args)]
pub struct AddOptions {
    /// Path to the notebook file.
    pub uri: String,

    /// Asset files the notebook reads, relative to the notebook's directory.
    #[arg(long = "asset")]
    pub assets: Vec<PathBuf>,

    /// Reader key to use for this notebook; defaults to the built-in reader.
    #[arg(long)]
    pub reader: Option<String>,
}

#[derive(Clone, Debug, Args)]
pub struct RemoveOptions {
    /// Path to the notebook file, as it was added.
    pub uri: String,
}

pub fn exec(command: Command) -> color_eyre::Result<()> {
    match command {
        Command::Add(options) => add(options),
        Command::Remove(options) => remove(options),
        Command::List => list(),
    }
}

mod add;
mod list;
mod remove;

use add::exec as add;
use list::exec as list;
use remove::exec as remove;
