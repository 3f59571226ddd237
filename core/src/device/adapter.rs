use std::collections::HashMap;

use parking_lot::RwLock;

/// Storage behind device signals
pub trait Adapter: Send + Sync {
    fn get(&self, device: &str, signal: &str) -> Option<f64>;
    fn set(&self, device: &str, signal: &str, value: f64);
}

/// In-memory signal table keyed by (device, signal)
#[derive(Debug, Default)]
pub struct GenericAdapter {
    values: RwLock<HashMap<(String, String), f64>>,
}

impl GenericAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

impl Adapter for GenericAdapter {
    fn get(&self, device: &str, signal: &str) -> Option<f64> {
        self.values
            .read()
            .get(&(device.to_string(), signal.to_string()))
            .copied()
    }

    fn set(&self, device: &str, signal: &str, value: f64) {
        self.values
            .write()
            .insert((device.to_string(), signal.to_string()), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_set() {
        let adapter = GenericAdapter::new();
        assert_eq!(adapter.get("sst1", "powerLevel"), None);
        adapter.set("sst1", "powerLevel", 4.5);
        adapter.set("sst1", "powerLevel", 5.0);
        assert_eq!(adapter.get("sst1", "powerLevel"), Some(5.0));
        assert_eq!(adapter.len(), 1);
    }
}
