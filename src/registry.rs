use std::collections::BTreeMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::debug;

use crate::mib::Mib;

static GLOBAL: Lazy<SlaveRegistry> = Lazy::new(SlaveRegistry::new);

/// Default MIBs per slave id, shared by every [`crate::conn::Connection`] which holds a clone of
/// the registry and has no local override for the slave id.
///
/// Clones share the same storage, all access is serialized with a mutex.
#[derive(Clone, Default)]
pub struct SlaveRegistry {
    slaves: Arc<Mutex<BTreeMap<u8, Mib>>>,
}

impl SlaveRegistry {
    /// Creates a new, independent registry
    pub fn new() -> Self {
        Self::default()
    }
    /// The process-wide registry, used by connections unless another one is given
    pub fn global() -> Self {
        GLOBAL.clone()
    }
    /// Sets the default MIB for a slave id and returns it. An empty MIB does not change anything,
    /// the current default (or an empty MIB) is returned instead
    pub fn set_default(&self, slave: u8, mib: Mib) -> Mib {
        let mut slaves = self.slaves.lock();
        if mib.is_empty() {
            return slaves.get(&slave).cloned().unwrap_or_default();
        }
        debug!(slave, signals = mib.len(), "default MIB set");
        slaves.insert(slave, mib.clone());
        mib
    }
    /// The default MIB of a slave id, empty if not set
    pub fn get_default(&self, slave: u8) -> Mib {
        self.slaves.lock().get(&slave).cloned().unwrap_or_default()
    }
    pub fn remove_default(&self, slave: u8) -> Option<Mib> {
        self.slaves.lock().remove(&slave)
    }
    /// Slave ids with a default MIB set
    pub fn slaves(&self) -> Vec<u8> {
        self.slaves.lock().keys().copied().collect()
    }
    /// Resolves the effective MIB: the override if present, the default otherwise, an empty MIB
    /// if neither is set
    pub fn resolve(&self, overrides: &BTreeMap<u8, Mib>, slave: u8) -> Mib {
        if let Some(mib) = overrides.get(&slave) {
            return mib.clone();
        }
        self.get_default(slave)
    }
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;
    use std::thread;

    use super::SlaveRegistry;
    use crate::mib::{Mib, RegisterSpec};

    fn mib(address: u16) -> Mib {
        Mib::new()
            .with("A", RegisterSpec::new(address, 3, "Short"))
            .with("B", RegisterSpec::new(address + 1, 4, "Bit"))
    }

    #[test]
    fn test_default_tier() {
        let registry = SlaveRegistry::new();
        assert!(registry.get_default(1).is_empty());
        registry.set_default(1, mib(10));
        assert_eq!(registry.resolve(&BTreeMap::new(), 1), mib(10));
        // empty MIBs do not overwrite
        assert_eq!(registry.set_default(1, Mib::new()), mib(10));
        assert!(registry.resolve(&BTreeMap::new(), 2).is_empty());
        assert_eq!(registry.slaves(), vec![1]);
        assert_eq!(registry.remove_default(1), Some(mib(10)));
        assert!(registry.get_default(1).is_empty());
    }

    #[test]
    fn test_override_wins() {
        let registry = SlaveRegistry::new();
        let mut overrides = BTreeMap::new();
        overrides.insert(1, mib(20));
        registry.set_default(1, mib(10));
        assert_eq!(registry.resolve(&overrides, 1), mib(20));
        registry.set_default(1, mib(30));
        assert_eq!(registry.resolve(&overrides, 1), mib(20));
    }

    #[test]
    fn test_clones_share() {
        let registry = SlaveRegistry::new();
        let other = registry.clone();
        other.set_default(5, mib(1));
        assert_eq!(registry.get_default(5), mib(1));
        assert!(SlaveRegistry::new().get_default(5).is_empty());
    }

    #[test]
    fn test_concurrent_access() {
        let registry = SlaveRegistry::new();
        let handles: Vec<_> = (0..8u8)
            .map(|slave| {
                let registry = registry.clone();
                thread::spawn(move || {
                    for i in 0..100 {
                        registry.set_default(slave, mib(i));
                        assert_eq!(registry.get_default(slave).len(), 2);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.slaves().len(), 8);
    }
}
