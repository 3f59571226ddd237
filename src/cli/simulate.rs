use std::time::Duration;

use anyhow::{Context, Result};
use console::Style;
use dgi_core::config::{BrokerConfig, SignalValue};
use dgi_core::{BrokerNode, InMemoryNetwork};

use super::node::collected_json;

/// Module the simulated snapshots are requested for
const SIMULATION_MODULE: &str = "gm";

fn node_config(base: &BrokerConfig, index: usize, uuids: &[String], power: f64) -> BrokerConfig {
    let mut config = base.clone();
    let device = format!("sst{index}");
    config.uuid = Some(uuids[index].clone());
    config.peers = uuids.to_vec();
    config.devices.specs = vec![format!("{device}:Sst")];
    config.devices.values = vec![SignalValue {
        device,
        signal: config.snapshot.gateway_signal.clone(),
        value: power,
    }];
    config
}

pub async fn handle_simulate(
    base: BrokerConfig,
    nodes: usize,
    rounds: usize,
    base_power: f64,
    timeout_ms: Option<u64>,
    json: bool,
) -> Result<()> {
    if nodes == 0 {
        anyhow::bail!("a cluster needs at least one node");
    }
    let mut base = base;
    if let Some(timeout_ms) = timeout_ms {
        base.snapshot.response_timeout_ms = timeout_ms;
    }
    // A phase cycle plus every granted wait, with room for delivery.
    let cycle: u64 = base.scheduler.modules.iter().map(|m| m.phase_ms).sum();
    let wait = Duration::from_millis(
        base.snapshot.response_timeout_ms * (u64::from(base.snapshot.response_extensions) + 1)
            + 2 * cycle
            + 1_000,
    );

    let network = InMemoryNetwork::new();
    let uuids: Vec<String> = (0..nodes).map(|i| format!("node-{i}")).collect();
    let mut cluster = Vec::with_capacity(nodes);
    for index in 0..nodes {
        let config = node_config(&base, index, &uuids, base_power + index as f64);
        let node = BrokerNode::start(config, network.clone())
            .await
            .with_context(|| format!("Failed to start {}", uuids[index]))?;
        cluster.push(node);
    }

    let bold = Style::new().bold();
    let green = Style::new().green();
    let red = Style::new().red();
    println!(
        "{} {} nodes, response timeout {}ms",
        bold.apply_to("Cluster:"),
        nodes,
        base.snapshot.response_timeout_ms
    );

    let leader = &cluster[0];
    let mut results = leader.subscribe_results(SIMULATION_MODULE);
    for round in 1..=rounds {
        leader.request_snapshot(SIMULATION_MODULE);
        match tokio::time::timeout(wait, results.next()).await {
            Ok(Some(state)) if json => println!("{}", collected_json(&state)?),
            Ok(Some(state)) => {
                let total: f64 = state
                    .values()
                    .iter()
                    .filter_map(|v| v.parse::<f64>().ok())
                    .sum();
                println!(
                    "{} round {round} {}: [{}] total {total}",
                    green.apply_to("✓"),
                    state.version,
                    state.gateway
                );
            }
            Ok(None) => break,
            Err(_) => println!(
                "{} round {round}: no complete snapshot within {}ms",
                red.apply_to("✗"),
                wait.as_millis()
            ),
        }
    }

    for node in cluster {
        node.shutdown().await?;
    }
    Ok(())
}
