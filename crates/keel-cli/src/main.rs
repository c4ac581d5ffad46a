//! Keel CLI - scenario driver for the tokenomics kernel.
//!
//! Drives the in-memory protocol engine through scripted lifecycles and
//! randomized invariant sweeps. No chain, network, or persistence attached;
//! everything runs against simulated time and blocks.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

/// Keel: tokenomics kernel driver
///
/// Runs the genesis auction, bonding curve, farms, and redemption unit
/// end to end against an in-memory ledger.
#[derive(Parser)]
#[command(name = "keel")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Parameter file path (TOML)
    #[arg(short, long, global = true, env = "KEEL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scripted genesis-to-redemption lifecycle
    Run {
        /// Number of committers in the genesis auction
        #[arg(long, default_value_t = 3)]
        committers: u32,

        /// Write the full event log to this file (JSON)
        #[arg(short, long)]
        events: Option<PathBuf>,

        /// Output format (json, human)
        #[arg(short, long, default_value = "human")]
        format: String,
    },

    /// Drive random operation sequences and check invariants after each
    Simulate {
        /// RNG seed
        #[arg(short, long, default_value_t = 42)]
        seed: u64,

        /// Operations per run
        #[arg(long, default_value_t = 500)]
        steps: u32,

        /// Number of independent runs
        #[arg(long, default_value_t = 10)]
        runs: u32,

        /// Number of user accounts
        #[arg(long, default_value_t = 4)]
        actors: u32,
    },

    /// Inspect and validate parameter files
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Validate a parameter file
    Validate {
        /// Parameter file (TOML)
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Print the effective parameters
    Show {
        /// Output format (json, human)
        #[arg(short, long, default_value = "human")]
        format: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Run {
            committers,
            events,
            format,
        } => commands::run::run(committers, events, format, cli.config),
        Commands::Simulate {
            seed,
            steps,
            runs,
            actors,
        } => commands::simulate::run(seed, steps, runs, actors, cli.config),
        Commands::Config { action } => match action {
            ConfigCommands::Validate { file } => commands::config::validate(file),
            ConfigCommands::Show { format } => commands::config::show(format, cli.config),
        },
    }
}
