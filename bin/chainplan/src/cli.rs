use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing::level_filters::LevelFilter;

/// How the run summary is printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum ReportFormat {
    #[default]
    Table,
    Json,
}

#[derive(Parser)]
#[command(name = "chainplan")]
#[command(
    author,
    version,
    about = "Deploy, upgrade and verify interrelated contracts from a declarative plan"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, global = true, env = "CHAINPLAN_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to the plan configuration file, or to a directory containing `Chainplan.toml`.
    #[arg(short, long, global = true, env = "CHAINPLAN_CONFIG", default_value = ".")]
    pub config: PathBuf,

    /// Ledger files from previous runs, merged into the `[seed]` addresses.
    #[arg(long = "seed-file", global = true, value_name = "PATH")]
    pub seed_files: Vec<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Execute the enabled steps of the plan against the selected network.
    Run(RunArgs),
    /// Load the configuration and artifacts and check the plan without touching the network.
    Check,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// The network to run against, overriding `network` in the configuration.
    #[arg(short, long, env = "CHAINPLAN_NETWORK")]
    pub network: Option<String>,

    /// Skip source verification for every step.
    #[arg(long)]
    pub no_verify: bool,

    /// Write the resulting ledger to this file, in seed file format.
    #[arg(long, env = "CHAINPLAN_LEDGER_OUT")]
    pub ledger_out: Option<PathBuf>,

    /// Output format of the run summary.
    #[arg(long, default_value_t = ReportFormat::Table)]
    pub format: ReportFormat,
}
