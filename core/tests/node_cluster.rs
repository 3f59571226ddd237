//! Full broker nodes sharing an in-memory network
//!
//! Runs with paused time: response timers and phase changes fire as soon as
//! every task is idle, so multi-second timeouts complete instantly.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use dgi_core::clock::{AnchoredClock, Clock};
use dgi_core::config::{BrokerConfig, ModuleConfig, SignalValue};
use dgi_core::{BrokerNode, InMemoryNetwork};

fn clock() -> Arc<dyn Clock> {
    Arc::new(AnchoredClock::starting_at(
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
    ))
}

fn node_config(uuid: &str, peers: &[&str], power: f64) -> BrokerConfig {
    let mut config = BrokerConfig::default();
    config.uuid = Some(uuid.to_string());
    config.peers = peers.iter().map(|p| p.to_string()).collect();
    config.scheduler.modules = ["gm", "sc", "lb"]
        .into_iter()
        .map(|id| ModuleConfig {
            id: id.to_string(),
            phase_ms: 100,
        })
        .collect();
    config.snapshot.response_timeout_ms = 1_000;
    config.devices.specs = vec!["sst1:Sst".to_string(), "load1:Load".to_string()];
    config.devices.values = vec![
        SignalValue {
            device: "sst1".to_string(),
            signal: "powerLevel".to_string(),
            value: power,
        },
        SignalValue {
            device: "load1".to_string(),
            signal: "powerLevel".to_string(),
            value: -4.0,
        },
    ];
    config
}

async fn start_cluster(uuids: &[&str]) -> (InMemoryNetwork, Vec<BrokerNode>) {
    let network = InMemoryNetwork::new();
    let clock = clock();
    let mut nodes = Vec::new();
    for (index, uuid) in uuids.iter().enumerate() {
        let config = node_config(uuid, uuids, (index + 1) as f64);
        nodes.push(
            BrokerNode::start_with_clock(config, network.clone(), clock.clone())
                .await
                .unwrap(),
        );
    }
    (network, nodes)
}

#[tokio::test(start_paused = true)]
async fn test_cluster_snapshot_reaches_requesting_module() {
    dgi_core::logging::init_test_logging();
    let (network, nodes) = start_cluster(&["node-a", "node-b", "node-c"]).await;
    assert_eq!(network.members(), vec!["node-a", "node-b", "node-c"]);

    let leader = &nodes[0];
    let mut results = leader.subscribe_results("gm");
    assert!(leader.request_snapshot("gm"));

    let state = tokio::time::timeout(Duration::from_secs(5), results.next())
        .await
        .expect("no snapshot delivered")
        .expect("result stream closed");
    assert_eq!(state.module, "gm");
    assert_eq!(state.version.initiator, "node-a");
    assert_eq!(state.version.sequence, 1);
    let mut values = state.values();
    values.sort();
    assert_eq!(values, vec!["1", "2", "3"]);

    for node in nodes {
        node.shutdown().await.unwrap();
    }
    assert!(network.members().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_later_snapshot_sees_updated_signals() {
    let (_network, nodes) = start_cluster(&["node-a", "node-b"]).await;
    let mut results = nodes[1].subscribe_results("lb");

    nodes[1].request_snapshot("lb");
    let first = tokio::time::timeout(Duration::from_secs(5), results.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.version.initiator, "node-b");

    nodes[0].set_signal("sst1", "powerLevel", 7.5);
    nodes[1].request_snapshot("lb");
    let second = tokio::time::timeout(Duration::from_secs(5), results.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.version.sequence, first.version.sequence + 1);
    let mut values = second.values();
    values.sort();
    assert_eq!(values, vec!["2", "7.5"]);

    for node in nodes {
        node.shutdown().await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn test_missing_snapshot_module_is_appended() {
    let mut config = node_config("solo", &[], 1.0);
    config.scheduler.modules.retain(|m| m.id != "sc");

    let node = BrokerNode::start_with_clock(config, InMemoryNetwork::new(), clock())
        .await
        .unwrap();
    let modules = node.scheduler().modules().await.unwrap();
    let ids: Vec<&str> = modules.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["gm", "lb", "sc"]);

    let mut results = node.subscribe_results("gm");
    node.request_snapshot("gm");
    let state = tokio::time::timeout(Duration::from_secs(5), results.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.values(), vec!["1"]);
    node.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_bad_device_spec_fails_startup() {
    let mut config = node_config("solo", &[], 1.0);
    config.devices.specs.push("turbine1:Turbine".to_string());

    let err = BrokerNode::start(config, InMemoryNetwork::new())
        .await
        .unwrap_err();
    assert!(err.requires_user_action());
    assert!(err.to_string().contains("Turbine"));
}
