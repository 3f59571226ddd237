//! Device construction by type name

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use super::{Adapter, AdapterDevice, Device, DeviceError, PhysicalDeviceManager};

/// Builds a device with the given id on top of the factory's adapter
pub type FactoryFn = Box<dyn Fn(&str, Arc<dyn Adapter>) -> Arc<dyn Device> + Send + Sync>;

/// Device classes every factory can build out of the box
pub const BUILTIN_CLASSES: [&str; 5] = ["Sst", "Drer", "Desd", "Load", "Fid"];

pub struct DeviceFactory {
    manager: Arc<PhysicalDeviceManager>,
    adapter: Arc<dyn Adapter>,
    registry: HashMap<String, FactoryFn>,
}

impl DeviceFactory {
    /// A factory with no registered classes
    pub fn new(manager: Arc<PhysicalDeviceManager>, adapter: Arc<dyn Adapter>) -> Self {
        Self {
            manager,
            adapter,
            registry: HashMap::new(),
        }
    }

    /// A factory that knows [`BUILTIN_CLASSES`]
    pub fn with_builtin_classes(manager: Arc<PhysicalDeviceManager>, adapter: Arc<dyn Adapter>) -> Self {
        let mut factory = Self::new(manager, adapter);
        for class in BUILTIN_CLASSES {
            let build: FactoryFn = Box::new(move |id: &str, adapter: Arc<dyn Adapter>| -> Arc<dyn Device> {
                Arc::new(AdapterDevice::new(id, class, adapter))
            });
            factory.registry.insert(class.to_string(), build);
        }
        factory
    }

    pub fn register_device_class(
        &mut self,
        type_name: impl Into<String>,
        build: FactoryFn,
    ) -> Result<(), DeviceError> {
        let type_name = type_name.into();
        if self.registry.contains_key(&type_name) {
            return Err(DeviceError::DuplicateClass(type_name));
        }
        info!(class = %type_name, "Registered device class");
        self.registry.insert(type_name, build);
        Ok(())
    }

    pub fn is_registered(&self, type_name: &str) -> bool {
        self.registry.contains_key(type_name)
    }

    /// Build a device of `type_name` and hand it to the manager
    pub fn create_device(&self, id: &str, type_name: &str) -> Result<Arc<dyn Device>, DeviceError> {
        let build = self
            .registry
            .get(type_name)
            .ok_or_else(|| DeviceError::UnknownClass(type_name.to_string()))?;
        let device = build(id, self.adapter.clone());
        self.manager.add_device(device.clone())?;
        Ok(device)
    }

    /// Build devices from `name:type` specifications, in order.
    ///
    /// Stops at the first bad specification; devices created before it stay
    /// registered.
    pub fn create_devices<S: AsRef<str>>(&self, specs: &[S]) -> Result<Vec<Arc<dyn Device>>, DeviceError> {
        let mut created = Vec::with_capacity(specs.len());
        for spec in specs {
            let spec = spec.as_ref();
            let (name, type_name) = spec
                .split_once(':')
                .ok_or_else(|| DeviceError::BadSpec(spec.to_string()))?;
            if self.manager.device_exists(name) {
                return Err(DeviceError::DuplicateDevice(spec.to_string()));
            }
            if type_name.is_empty() {
                return Err(DeviceError::MissingType(spec.to_string()));
            }
            created.push(self.create_device(name, type_name)?);
            info!(class = %type_name, device = %name, "Added device");
        }
        Ok(created)
    }

    pub fn manager(&self) -> &Arc<PhysicalDeviceManager> {
        &self.manager
    }

    pub fn adapter(&self) -> &Arc<dyn Adapter> {
        &self.adapter
    }
}

impl std::fmt::Debug for DeviceFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut classes: Vec<_> = self.registry.keys().collect();
        classes.sort();
        f.debug_struct("DeviceFactory").field("classes", &classes).finish()
    }
}
