use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::{Device, DeviceError, DeviceId, DeviceInventory};

/// Registry of the physical devices attached to this node
#[derive(Default)]
pub struct PhysicalDeviceManager {
    devices: RwLock<BTreeMap<DeviceId, Arc<dyn Device>>>,
}

impl PhysicalDeviceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_device(&self, device: Arc<dyn Device>) -> Result<(), DeviceError> {
        let mut devices = self.devices.write();
        let id = device.id().to_string();
        if devices.contains_key(&id) {
            return Err(DeviceError::DuplicateDevice(id));
        }
        debug!(device = %id, kind = device.type_name(), "Added device");
        devices.insert(id, device);
        Ok(())
    }

    pub fn remove_device(&self, id: &str) -> Option<Arc<dyn Device>> {
        self.devices.write().remove(id)
    }

    pub fn get_device(&self, id: &str) -> Option<Arc<dyn Device>> {
        self.devices.read().get(id).cloned()
    }

    pub fn device_exists(&self, id: &str) -> bool {
        self.devices.read().contains_key(id)
    }

    pub fn device_count(&self) -> usize {
        self.devices.read().len()
    }
}

impl DeviceInventory for PhysicalDeviceManager {
    fn devices_of_type(&self, type_name: &str) -> Vec<Arc<dyn Device>> {
        self.devices
            .read()
            .values()
            .filter(|d| d.type_name() == type_name)
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for PhysicalDeviceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicalDeviceManager")
            .field("devices", &self.devices.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Adapter, AdapterDevice, GenericAdapter};

    #[test]
    fn test_sum_over_type() {
        let adapter: Arc<GenericAdapter> = Arc::new(GenericAdapter::new());
        let manager = PhysicalDeviceManager::new();
        for (id, kind, value) in [("sst1", "Sst", 1.5), ("sst2", "Sst", 2.0), ("load1", "Load", 9.0)] {
            manager
                .add_device(Arc::new(AdapterDevice::new(id, kind, adapter.clone())))
                .unwrap();
            adapter.set(id, "powerLevel", value);
        }
        // A device without a reading counts as zero.
        manager
            .add_device(Arc::new(AdapterDevice::new("sst3", "Sst", adapter.clone())))
            .unwrap();

        assert_eq!(manager.devices_of_type("Sst").len(), 3);
        assert_eq!(manager.sum_signal("Sst", "powerLevel"), 3.5);
        assert_eq!(manager.sum_signal("Desd", "powerLevel"), 0.0);
    }

    #[test]
    fn test_duplicate_and_remove() {
        let adapter = Arc::new(GenericAdapter::new());
        let manager = PhysicalDeviceManager::new();
        manager
            .add_device(Arc::new(AdapterDevice::new("a", "Load", adapter.clone())))
            .unwrap();
        assert_eq!(
            manager
                .add_device(Arc::new(AdapterDevice::new("a", "Sst", adapter)))
                .unwrap_err(),
            DeviceError::DuplicateDevice("a".into())
        );
        assert!(manager.remove_device("a").is_some());
        assert_eq!(manager.device_count(), 0);
    }
}
