use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "lingopost",
    version,
    about = "Translates unread mail through an LLM and forwards it on a daily schedule"
)]
pub struct Cli {
    #[arg(
        long,
        short,
        global = true,
        default_value = "config.yaml",
        help = "Path to the YAML configuration file"
    )]
    pub config: PathBuf,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch, translate and forward unread mail once, then exit.
    Run(RunArgs),
    /// Run the daily scheduler until terminated.
    Daemon,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[arg(long, help = "Log fetched mail without translating or sending")]
    pub dry_run: bool,
}
