//! CLI entrypoint for fusebox-sync.

#[path = "fusebox-sync/cli.rs"]
mod cli;
#[path = "fusebox-sync/run.rs"]
mod run;

use clap::Parser;

use cli::{Cli, Command};

fn main() {
    let cli = Cli::parse();
    let result = match cli.command {
        Command::Run { config } => run::run(&config, cli.verbose),
        Command::Snapshot { config, id } => run::snapshot(&config, id.as_deref(), cli.verbose),
        Command::Validate { config } => run::validate(&config),
    };
    if let Err(err) = result {
        eprintln!("fusebox-sync error: {err:#}");
        std::process::exit(1);
    }
}
