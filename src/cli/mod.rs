//! CLI argument parsing using clap 4.x derive macros

pub mod node;
pub mod simulate;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Phase-scheduled DGI broker with distributed state collection
#[derive(Parser, Debug)]
#[command(name = "dgi-broker")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(disable_version_flag = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Configuration file (defaults to ./dgi-broker.toml, then the user config dir)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Print version information
    #[arg(long)]
    pub version: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a single broker node until interrupted
    Run {
        /// Print every phase change
        #[arg(long)]
        show_phases: bool,

        /// Request a global snapshot every N seconds
        #[arg(long, value_name = "SECS")]
        snapshot_every: Option<u64>,

        /// Module the periodic snapshots are requested for
        #[arg(long, default_value = "gm")]
        module: String,

        /// Print collected states as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Run an in-process cluster and collect snapshots across it
    Simulate {
        /// Number of nodes in the cluster
        #[arg(short, long, default_value_t = 3)]
        nodes: usize,

        /// Snapshots to request from the first node
        #[arg(short, long, default_value_t = 1)]
        rounds: usize,

        /// Gateway power level of node i is `base + i`
        #[arg(long, default_value_t = 1.0)]
        base_power: f64,

        /// Initiator response timeout in milliseconds (overrides the config)
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Print collected states as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Print the upcoming phase sequence of the configured modules
    Phases {
        /// Number of phase changes to print
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,

        /// Compute the sequence from this time of day (HH:MM:SS[.mmm], UTC)
        /// instead of watching a live scheduler
        #[arg(long, value_name = "TIME")]
        at: Option<String>,
    },

    /// Write a configuration file with default values
    InitConfig {
        /// Destination (defaults to ./dgi-broker.toml)
        #[arg(short, long)]
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}
