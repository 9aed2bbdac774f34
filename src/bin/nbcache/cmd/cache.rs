use clap::Subcommand;

pub mod reset;
pub mod show;

#[derive(Clone, Debug, Subcommand)]
pub enum Command {
    /// Print a summary of every cache record.
    Show,

    /// Delete cache records, either entirely or down to a retained count.
    Reset(reset::Options),
}
