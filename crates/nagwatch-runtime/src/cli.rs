//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "nagwatch", about = "Alert state tracking with grouped notifications")]
pub struct Cli {
    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Evaluate observations and emit grouped alerts until stopped
    Run(RunOpts),
    /// Validate a config file and exit
    CheckConfig(ConfigOpts),
    /// Summarize a checkpoint file
    Inspect(InspectOpts),
}

#[derive(clap::Args)]
pub struct RunOpts {
    /// TOML config file
    #[arg(long, short = 'c', env = "NAGWATCH_CONFIG")]
    pub config: PathBuf,

    /// NDJSON observation input ("-" or absent for stdin)
    #[arg(long, short = 'i')]
    pub input: Option<PathBuf>,

    /// Checkpoint file (overrides checkpoint.path from the config)
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,
}

#[derive(clap::Args)]
pub struct ConfigOpts {
    /// TOML config file
    #[arg(long, short = 'c', env = "NAGWATCH_CONFIG")]
    pub config: PathBuf,
}

#[derive(clap::Args)]
pub struct InspectOpts {
    /// Checkpoint file to read
    pub checkpoint: PathBuf,

    /// Print JSON instead of a text table
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}
