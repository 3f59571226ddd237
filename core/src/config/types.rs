//! Configuration types
//!
//! Every section has a usable default, so an empty file (or no file at all)
//! describes a working single node.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use super::ConfigError;
use crate::scheduler::SchedulerConfig;

/// Top-level node configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Node identity; a random v4 UUID is used when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    /// Peers known at startup
    pub peers: Vec<String>,
    pub scheduler: SchedulerSection,
    pub snapshot: SnapshotConfig,
    pub devices: DeviceConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    pub alignment_interval_ms: u64,
    /// Signed adjustment added to every wall-clock read
    pub clock_skew_ms: i64,
    /// Round-robin order is the order listed here
    pub modules: Vec<ModuleConfig>,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            alignment_interval_ms: 10_000,
            clock_skew_ms: 0,
            modules: ["gm", "sc", "lb"]
                .into_iter()
                .map(|id| ModuleConfig {
                    id: id.to_string(),
                    phase_ms: 400,
                })
                .collect(),
        }
    }
}

impl SchedulerSection {
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            alignment_interval: Duration::from_millis(self.alignment_interval_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleConfig {
    pub id: String,
    pub phase_ms: u64,
}

impl ModuleConfig {
    pub fn phase(&self) -> Duration {
        Duration::from_millis(self.phase_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// How long the initiator waits before answering the requester
    pub response_timeout_ms: u64,
    /// Extra waits granted when markers are still missing at the timeout
    pub response_extensions: u32,
    /// Device type whose signal makes up a node's local state
    pub gateway_device_type: String,
    pub gateway_signal: String,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: 5_000,
            response_extensions: 0,
            gateway_device_type: "Sst".to_string(),
            gateway_signal: "powerLevel".to_string(),
        }
    }
}

impl SnapshotConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// `name:type` specifications
    pub specs: Vec<String>,
    /// Initial signal values
    pub values: Vec<SignalValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalValue {
    pub device: String,
    pub signal: String,
    pub value: f64,
}

impl BrokerConfig {
    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.alignment_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "scheduler.alignment_interval_ms must be greater than 0".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for module in &self.scheduler.modules {
            if module.id.trim().is_empty() {
                return Err(ConfigError::InvalidValue(
                    "scheduler.modules: module id must not be empty".to_string(),
                ));
            }
            if !seen.insert(module.id.as_str()) {
                return Err(ConfigError::InvalidValue(format!(
                    "scheduler.modules: duplicate module id {}",
                    module.id
                )));
            }
        }
        if self.snapshot.response_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "snapshot.response_timeout_ms must be greater than 0".to_string(),
            ));
        }
        for spec in &self.devices.specs {
            match spec.split_once(':') {
                Some((name, kind)) if !name.is_empty() && !kind.is_empty() => {}
                _ => {
                    return Err(ConfigError::InvalidValue(format!(
                        "devices.specs: expected name:type, got {spec:?}"
                    )))
                }
            }
        }
        for value in &self.devices.values {
            if value.device.is_empty() || value.signal.is_empty() {
                return Err(ConfigError::InvalidValue(
                    "devices.values: device and signal must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Configured identity, or a fresh random one
    pub fn node_uuid(&self) -> String {
        self.uuid
            .clone()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }
}
