//! blocklist-compiler - IPv4 blocklist feeds to RouterOS address-list scripts
//!
//! Fetches the configured feeds, merges and aggregates them, and serves the
//! result as a MikroTik import script.

use anyhow::Result;
use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use blocklist_compiler::cli::{Cli, Commands};
use blocklist_compiler::commands;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.verbose {
        Level::DEBUG
    } else if cli.quiet {
        Level::ERROR
    } else {
        Level::INFO
    };

    // Logs go to stderr so `compile` output can be piped
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Serve { listen } => commands::serve::run(listen, &cli.config).await,
        Commands::Compile { opts } => commands::compile::run(opts, &cli.config).await,
        Commands::Check { ip } => commands::check::run(&ip, &cli.config).await,
        Commands::Sources { json } => commands::sources::run(json, &cli.config).await,
        Commands::Version => {
            println!("blocklist-compiler {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
