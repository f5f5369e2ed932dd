//! Web-controlled orchestrator for a fixed RNA-seq differential expression
//! pipeline executed through Slurm on a shared cluster.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![warn(rust_2021_compatibility)]
#![warn(missing_debug_implementations)]
#![warn(clippy::missing_docs_in_private_items)]
#![warn(rustdoc::broken_intra_doc_links)]

use clap::Parser;

pub mod commands;
pub mod config;
pub mod controller;
pub mod results;
pub mod scheduler;
pub mod server;
pub mod stage;
pub mod store;
pub mod template;
pub mod validate;

/// The main function for the expressdiff binary.
pub async fn expressdiff_main() {
    let app = commands::App::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = match app.command {
        commands::Commands::Server(args) => commands::server::server(args).await,
    } {
        eprintln!("error: {e:?}");
        std::process::exit(1);
    }
}
