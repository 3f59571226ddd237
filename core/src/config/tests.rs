use super::*;
use ::config::Map;
use std::fs;
use tempfile::TempDir;

fn vars(pairs: &[(&str, &str)]) -> Option<Map<String, String>> {
    Some(
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    )
}

#[test]
fn test_default_config() {
    let config = BrokerConfig::default();
    assert!(config.validate().is_ok());
    assert!(config.uuid.is_none());
    assert!(config.peers.is_empty());
    assert!(config.devices.specs.is_empty());
    assert_eq!(BrokerConfig::from_toml_str("").unwrap(), config);
    assert_eq!(config.scheduler.alignment_interval_ms, 10_000);
    let ids: Vec<_> = config.scheduler.modules.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["gm", "sc", "lb"]);
    assert_eq!(config.snapshot.gateway_device_type, "Sst");
    assert_eq!(config.snapshot.response_extensions, 0);
}

#[test]
fn test_partial_file_keeps_defaults() {
    let raw = r#"
uuid = "node-a"
peers = ["node-b"]

[snapshot]
response_timeout_ms = 250
"#;
    let config = BrokerConfig::from_toml_str(raw).unwrap();
    assert_eq!(config.uuid.as_deref(), Some("node-a"));
    assert_eq!(config.peers, vec!["node-b"]);
    assert_eq!(config.snapshot.response_timeout_ms, 250);
    assert_eq!(config.snapshot.gateway_signal, "powerLevel");
    assert_eq!(config.scheduler.modules.len(), 3);
}

#[test]
fn test_validation_errors() {
    let mut config = BrokerConfig::default();
    config.scheduler.modules.push(ModuleConfig {
        id: "gm".to_string(),
        phase_ms: 10,
    });
    assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(msg)) if msg.contains("duplicate")));

    let mut config = BrokerConfig::default();
    config.scheduler.alignment_interval_ms = 0;
    assert!(config.validate().is_err());

    let mut config = BrokerConfig::default();
    config.snapshot.response_timeout_ms = 0;
    assert!(config.validate().is_err());

    let mut config = BrokerConfig::default();
    config.devices.specs.push("sst1".to_string());
    assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(msg)) if msg.contains("name:type")));

    let mut config = BrokerConfig::default();
    config.devices.values.push(SignalValue {
        device: "sst1".to_string(),
        signal: String::new(),
        value: 1.0,
    });
    assert!(config.validate().is_err());
}

#[test]
fn test_save_and_load() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("nested").join(CONFIG_FILE_NAME);

    let mut config = BrokerConfig::default();
    config.uuid = Some("node-a".to_string());
    config.devices.specs = vec!["sst1:Sst".to_string(), "load1:Load".to_string()];
    config.devices.values.push(SignalValue {
        device: "sst1".to_string(),
        signal: "powerLevel".to_string(),
        value: 4.5,
    });
    config.save(&path).unwrap();
    assert!(fs::read_to_string(&path).unwrap().contains("[snapshot]"));

    let loaded = BrokerConfig::load_with_env(Some(&path), vars(&[])).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_environment_overrides() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join(CONFIG_FILE_NAME);
    fs::write(&path, "uuid = \"from-file\"\n[scheduler]\nclock_skew_ms = 3\n").unwrap();

    let config = BrokerConfig::load_with_env(
        Some(&path),
        vars(&[
            ("DGI_SCHEDULER__CLOCK_SKEW_MS", "-15"),
            ("DGI_SNAPSHOT__RESPONSE_EXTENSIONS", "2"),
            ("DGI_PEERS", "node-b,node-c"),
            ("OTHER_SETTING", "ignored"),
        ]),
    )
    .unwrap();
    assert_eq!(config.uuid.as_deref(), Some("from-file"));
    assert_eq!(config.scheduler.clock_skew_ms, -15);
    assert_eq!(config.snapshot.response_extensions, 2);
    assert_eq!(config.peers, vec!["node-b", "node-c"]);
}

#[test]
fn test_missing_file() {
    let temp = TempDir::new().unwrap();
    let result = BrokerConfig::load_with_env(Some(&temp.path().join("absent.toml")), vars(&[]));
    assert!(matches!(result, Err(ConfigError::Io(_))));
}

#[test]
fn test_node_uuid_fallback() {
    let config = BrokerConfig::default();
    let a = config.node_uuid();
    assert!(uuid::Uuid::parse_str(&a).is_ok());

    let named = BrokerConfig {
        uuid: Some("node-a".to_string()),
        ..Default::default()
    };
    assert_eq!(named.node_uuid(), "node-a");
}
