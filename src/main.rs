//! `dgi-broker` - phase-scheduled broker node for distributed grid intelligence
//!
//! Runs the round-robin module scheduler and the distributed state collector,
//! either as a single node or as an in-process simulated cluster.

use anyhow::Result;
use clap::Parser;
use console::Style;

use crate::cli::{Cli, Commands};

mod cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.version {
        let blue = Style::new().blue();
        println!(
            "{} v{} ({})",
            blue.apply_to("dgi-broker"),
            env!("CARGO_PKG_VERSION"),
            env!("GIT_HASH")
        );
        return Ok(());
    }

    dgi_core::logging::init(&cli.log_level);

    match cli.command {
        Some(Commands::InitConfig { path, force }) => cli::node::handle_init_config(path, force),

        Some(Commands::Run {
            show_phases,
            snapshot_every,
            module,
            json,
        }) => {
            let config = cli::node::load_config(cli.config.as_deref())?;
            cli::node::handle_run(config, show_phases, snapshot_every, &module, json).await
        }

        Some(Commands::Simulate {
            nodes,
            rounds,
            base_power,
            timeout_ms,
            json,
        }) => {
            let config = cli::node::load_config(cli.config.as_deref())?;
            cli::simulate::handle_simulate(config, nodes, rounds, base_power, timeout_ms, json)
                .await
        }

        Some(Commands::Phases { count, at }) => {
            let config = cli::node::load_config(cli.config.as_deref())?;
            match at {
                Some(at) => cli::node::handle_phases_at(&config, &at, count),
                None => cli::node::handle_phases(config, count).await,
            }
        }

        None => {
            let config = cli::node::load_config(cli.config.as_deref())?;
            cli::node::handle_run(config, false, None, "gm", false).await
        }
    }
}
