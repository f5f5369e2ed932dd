//! Implementation of expressdiff CLI commands.

use clap::Parser;
use clap::Subcommand;

pub mod server;

/// The expressdiff command line interface.
#[derive(Parser, Debug)]
#[command(author, version, about, propagate_version = true)]
pub struct App {
    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Starts the orchestrator HTTP server.
    Server(server::Args),
}
