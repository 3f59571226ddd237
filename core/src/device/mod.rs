//! Physical device layer
//!
//! Devices are named signal tables of a given type (`Sst`, `Load`, ...).
//! Their values live in an [`Adapter`]; simulator-backed adapters plug in at
//! that seam, the in-memory [`GenericAdapter`] is used everywhere else.

pub mod adapter;
pub mod factory;
pub mod manager;

pub use adapter::{Adapter, GenericAdapter};
pub use factory::{DeviceFactory, FactoryFn, BUILTIN_CLASSES};
pub use manager::PhysicalDeviceManager;

use std::sync::Arc;

pub type DeviceId = String;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("device class {0} is already registered")]
    DuplicateClass(String),

    #[error("device of unregistered type {0}")]
    UnknownClass(String),

    #[error("duplicate device {0}")]
    DuplicateDevice(DeviceId),

    #[error("incorrect device specification: {0}")]
    BadSpec(String),

    #[error("no type specified for device {0}")]
    MissingType(String),
}

pub trait Device: Send + Sync + std::fmt::Debug {
    fn id(&self) -> &str;
    fn type_name(&self) -> &str;
    fn get(&self, signal: &str) -> Option<f64>;
    fn set(&self, signal: &str, value: f64);
}

/// Read side of the device manager, as used by the state collector
pub trait DeviceInventory: Send + Sync {
    fn devices_of_type(&self, type_name: &str) -> Vec<Arc<dyn Device>>;

    /// Sum of `signal` over every device of `type_name`; missing readings
    /// count as zero.
    fn sum_signal(&self, type_name: &str, signal: &str) -> f64 {
        self.devices_of_type(type_name)
            .iter()
            .filter_map(|d| d.get(signal))
            .sum()
    }
}

/// A device whose signals are stored in an adapter
pub struct AdapterDevice {
    id: DeviceId,
    type_name: String,
    adapter: Arc<dyn Adapter>,
}

impl AdapterDevice {
    pub fn new(id: impl Into<DeviceId>, type_name: impl Into<String>, adapter: Arc<dyn Adapter>) -> Self {
        Self {
            id: id.into(),
            type_name: type_name.into(),
            adapter,
        }
    }
}

impl Device for AdapterDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn get(&self, signal: &str) -> Option<f64> {
        self.adapter.get(&self.id, signal)
    }

    fn set(&self, signal: &str, value: f64) {
        self.adapter.set(&self.id, signal, value);
    }
}

impl std::fmt::Debug for AdapterDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterDevice")
            .field("id", &self.id)
            .field("type", &self.type_name)
            .finish()
    }
}
