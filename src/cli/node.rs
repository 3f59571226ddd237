use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{NaiveTime, Timelike};
use console::Style;
use dgi_core::clock::SystemClock;
use dgi_core::config::{find_config_file, BrokerConfig, CONFIG_FILE_NAME};
use dgi_core::scheduler::{natural_phase, PhaseChange, PhaseScheduler};
use dgi_core::{BrokerNode, CollectedState, InMemoryNetwork};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Interval;

/// Load the configuration from `path`, or from the standard locations.
pub fn load_config(path: Option<&Path>) -> Result<BrokerConfig> {
    let path = path.map(Path::to_path_buf).or_else(find_config_file);
    BrokerConfig::load(path.as_deref()).context("Failed to load configuration")
}

/// One-line JSON rendering of a collected state
pub fn collected_json(state: &CollectedState) -> Result<String> {
    let value = serde_json::json!({
        "module": state.module,
        "version": state.version,
        "values": state.values(),
        "gateway": state.gateway,
    });
    Ok(serde_json::to_string(&value)?)
}

fn print_phase(change: &PhaseChange) {
    let dim = Style::new().dim();
    let cyan = Style::new().cyan().bold();
    let marker = if change.aligned { " (aligned)" } else { "" };
    println!(
        "{} {} {:>4}ms{}",
        dim.apply_to(change.at.format("%H:%M:%S%.3f")),
        cyan.apply_to(format!("{:<6}", change.module)),
        change.duration.as_millis(),
        dim.apply_to(marker)
    );
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

pub async fn handle_run(
    config: BrokerConfig,
    show_phases: bool,
    snapshot_every: Option<u64>,
    module: &str,
    json: bool,
) -> Result<()> {
    let node = BrokerNode::start(config, InMemoryNetwork::new())
        .await
        .context("Failed to start broker node")?;

    let green = Style::new().green().bold();
    println!("{} node {}", green.apply_to("Started"), node.uuid());

    let mut phases = node.scheduler().subscribe_phases();
    let mut results = node.subscribe_results(module);
    let period = snapshot_every.map(Duration::from_secs).filter(|p| !p.is_zero());
    let mut ticker = period.map(tokio::time::interval);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down node...");
                break;
            }
            change = phases.recv(), if show_phases => match change {
                Ok(change) => print_phase(&change),
                Err(RecvError::Lagged(missed)) => eprintln!("(skipped {missed} phase changes)"),
                Err(RecvError::Closed) => break,
            },
            _ = tick(&mut ticker) => {
                node.request_snapshot(module);
            }
            Some(state) = results.next() => {
                if json {
                    println!("{}", collected_json(&state)?);
                } else {
                    println!("{} {}: {}", green.apply_to("Collected"), state.version, state.gateway);
                }
            }
        }
    }

    node.shutdown().await?;
    Ok(())
}

pub async fn handle_phases(config: BrokerConfig, count: usize) -> Result<()> {
    let clock = Arc::new(SystemClock::with_skew_ms(config.scheduler.clock_skew_ms));
    let (scheduler, task) = PhaseScheduler::spawn(config.scheduler.scheduler_config(), clock);
    let mut phases = scheduler.subscribe_phases();
    for module in &config.scheduler.modules {
        scheduler.register_module(module.id.clone(), module.phase());
    }

    let mut printed = 0;
    while printed < count {
        match phases.recv().await {
            Ok(change) => {
                print_phase(&change);
                printed += 1;
            }
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        }
    }

    scheduler.stop();
    task.await?;
    Ok(())
}

/// Parse `HH:MM:SS` or `HH:MM:SS.mmm` into an offset from midnight
fn parse_time_of_day(raw: &str) -> Result<Duration> {
    let time = NaiveTime::parse_from_str(raw, "%H:%M:%S%.f")
        .with_context(|| format!("Invalid time of day {raw:?} (expected HH:MM:SS[.mmm])"))?;
    Ok(Duration::from_secs(u64::from(time.num_seconds_from_midnight()))
        + Duration::from_millis(u64::from(time.nanosecond().min(999_999_999) / 1_000_000)))
}

pub fn handle_phases_at(config: &BrokerConfig, at: &str, count: usize) -> Result<()> {
    let start = parse_time_of_day(at)?;
    let modules = &config.scheduler.modules;
    let phases: Vec<Duration> = modules.iter().map(|m| m.phase()).collect();
    let natural = natural_phase(&phases, start)
        .context("No modules with a non-zero phase are configured")?;

    let dim = Style::new().dim();
    let cyan = Style::new().cyan().bold();
    let mut offset = start;
    let mut index = natural.index;
    let mut duration = natural.remaining;
    for _ in 0..count {
        let millis = offset.as_millis();
        println!(
            "{} {} {:>4}ms",
            dim.apply_to(format!(
                "{:02}:{:02}:{:02}.{:03}",
                millis / 3_600_000 % 24,
                millis / 60_000 % 60,
                millis / 1_000 % 60,
                millis % 1_000
            )),
            cyan.apply_to(format!("{:<6}", modules[index].id)),
            duration.as_millis()
        );
        offset += duration;
        index = (index + 1) % modules.len();
        duration = phases[index];
    }
    Ok(())
}

pub fn handle_init_config(path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = path.unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    BrokerConfig::default()
        .save(&path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dgi_core::SnapshotVersion;

    #[test]
    fn test_collected_json_shape() {
        let state = CollectedState {
            module: "gm".to_string(),
            version: SnapshotVersion::new("node-0", 3),
            gateway: "1,2(from a to b)".to_string(),
        };
        let raw = collected_json(&state).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["module"], "gm");
        assert_eq!(value["version"]["initiator"], "node-0");
        assert_eq!(value["version"]["sequence"], 3);
        assert_eq!(value["values"][1], "2(from a to b)");
        assert!(!raw.contains('\n'));
    }

    #[test]
    fn test_parse_time_of_day() {
        assert_eq!(
            parse_time_of_day("01:00:02.250").unwrap(),
            Duration::from_millis(3_602_250)
        );
        assert_eq!(parse_time_of_day("00:00:10").unwrap(), Duration::from_secs(10));
        assert!(parse_time_of_day("25:00").is_err());
    }
}
