//! CLI argument parsing with clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "blocklist-compiler")]
#[command(author, version, about = "Compile IPv4 blocklist feeds into RouterOS address-list scripts")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path
    #[arg(
        short,
        long,
        default_value = "/etc/blocklist-compiler/config.yaml",
        global = true
    )]
    pub config: PathBuf,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose mode (debug output)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve compiled scripts over HTTP
    Serve {
        /// Listen address, overrides the config file
        #[arg(long)]
        listen: Option<String>,
    },

    /// Compile once and write the script to stdout
    Compile {
        #[command(flatten)]
        opts: CompileOpts,
    },

    /// Check whether an address ends up in the compiled list
    Check {
        /// IPv4 address to check
        ip: String,
    },

    /// List configured sources
    Sources {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show version
    Version,
}

/// Selection and rendering options shared by `compile`.
#[derive(clap::Args, Debug, Default, Clone)]
pub struct CompileOpts {
    /// Comma-separated source ids (active or not)
    #[arg(long, conflicts_with = "source")]
    pub sources: Option<String>,

    /// Single source, by id or name
    #[arg(long)]
    pub source: Option<String>,

    /// Address-list name override
    #[arg(long)]
    pub list: Option<String>,

    /// RouterOS timeout override (e.g. 1d, 02:00:00)
    #[arg(long)]
    pub timeout: Option<String>,

    /// Extra whitelisted CIDR (repeatable)
    #[arg(long)]
    pub whitelist: Vec<String>,
}
