//! Implementation of the `server` subcommand.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use crate::config::Config;
use crate::config::FileConfig;
use crate::scheduler::SlurmScheduler;

/// Arguments to the `server` subcommand.
#[derive(Parser, Debug)]
pub struct Args {
    /// Configuration file path.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host to bind to (overrides the configuration file).
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides the configuration file).
    #[arg(long)]
    pub port: Option<u16>,
}

/// The main function for the `server` subcommand.
pub async fn server(args: Args) -> Result<()> {
    let file = match args.config {
        Some(path) => FileConfig::from_file(&path)?,
        None => FileConfig::default(),
    };

    let mut config = Config::resolve(file)?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    let scheduler = Arc::new(SlurmScheduler::new(config.scheduler_timeout));

    crate::server::serve(config, scheduler).await
}
