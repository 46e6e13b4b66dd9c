//! CLI definitions for fusebox-sync.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "fusebox-sync",
    version,
    about = "Fusebox controller state synchronization",
    after_help = "Examples:\n  fusebox-sync run --config fusebox.toml\n  fusebox-sync snapshot --config fusebox.toml --id c1\n  fusebox-sync validate --config fusebox.toml"
)]
pub struct Cli {
    /// Log at debug level regardless of the configured level.
    #[arg(long, short, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Poll every configured controller and serve the admin endpoint.
    Run {
        /// Configuration file.
        #[arg(long, default_value = "fusebox.toml")]
        config: PathBuf,
    },
    /// Refresh controllers once and print their snapshots as JSON.
    Snapshot {
        /// Configuration file.
        #[arg(long, default_value = "fusebox.toml")]
        config: PathBuf,
        /// Only this controller id.
        #[arg(long)]
        id: Option<String>,
    },
    /// Check a configuration file and exit.
    Validate {
        /// Configuration file.
        #[arg(long, default_value = "fusebox.toml")]
        config: PathBuf,
    },
}
