//! Driver registry
//!
//! Ordered, process-scoped set of [`DriverDescriptor`]s. Registering a
//! descriptor also claims its identity triple on the transport's
//! [`DriverBus`], so only connections some driver can handle are handed to
//! the framework.

use std::sync::Arc;

use lgx_transport::{DeviceId, DriverBus};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::driver::DriverDescriptor;
use crate::error::RegistryError;

/// Registered drivers, resolved by identity
pub struct DriverRegistry {
    drivers: RwLock<Vec<Arc<DriverDescriptor>>>,
    bus: Arc<dyn DriverBus>,
}

impl DriverRegistry {
    /// Create an empty registry on top of `bus`
    pub fn new(bus: Arc<dyn DriverBus>) -> Self {
        Self {
            drivers: RwLock::new(Vec::new()),
            bus,
        }
    }

    /// Create a registry and register `descriptors` in order
    ///
    /// If any registration fails the ones already made are undone.
    pub fn with_drivers(
        bus: Arc<dyn DriverBus>,
        descriptors: impl IntoIterator<Item = Arc<DriverDescriptor>>,
    ) -> Result<Self, RegistryError> {
        let registry = Self::new(bus);
        for descriptor in descriptors {
            if let Err(e) = registry.register(descriptor) {
                registry.shutdown();
                return Err(e);
            }
        }
        Ok(registry)
    }

    /// Add a descriptor and claim its identity on the transport
    ///
    /// Fails if a descriptor with the same identity is registered or the
    /// transport refuses the claim; nothing is changed in either case.
    pub fn register(&self, descriptor: Arc<DriverDescriptor>) -> Result<(), RegistryError> {
        let mut drivers = self.drivers.write();
        if let Some(existing) = drivers.iter().find(|d| d.matches(&descriptor.id)) {
            return Err(RegistryError::Duplicate {
                id: descriptor.id,
                existing: existing.name.clone(),
            });
        }

        self.bus.register(descriptor.id, &descriptor.name)?;
        info!("Registered driver {} for {}", descriptor.name, descriptor.id);
        drivers.push(descriptor);
        Ok(())
    }

    /// Remove the descriptor for `id` and release its transport claim
    ///
    /// Returns false if nothing was registered for `id`.
    pub fn unregister(&self, id: DeviceId) -> bool {
        let removed = {
            let mut drivers = self.drivers.write();
            let before = drivers.len();
            drivers.retain(|d| !d.matches(&id));
            before != drivers.len()
        };
        if removed {
            self.bus.unregister(id);
            debug!("Unregistered driver for {}", id);
        }
        removed
    }

    /// First descriptor matching `id`, if any
    pub fn resolve(&self, id: DeviceId) -> Option<Arc<DriverDescriptor>> {
        self.drivers.read().iter().find(|d| d.matches(&id)).cloned()
    }

    /// Registered descriptors in registration order
    pub fn drivers(&self) -> Vec<Arc<DriverDescriptor>> {
        self.drivers.read().clone()
    }

    pub fn len(&self) -> usize {
        self.drivers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.read().is_empty()
    }

    /// Unregister everything, most recent first
    pub fn shutdown(&self) {
        let ids: Vec<DeviceId> = self.drivers.read().iter().rev().map(|d| d.id).collect();
        for id in ids {
            self.unregister(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::LogicalDevice;
    use crate::driver::{DeviceType, Driver};
    use crate::error::DriverError;
    use lgx_transport::mock::MockBus;

    struct Nop;

    impl Driver for Nop {
        fn init(&self, _device: &Arc<LogicalDevice>) -> Result<(), DriverError> {
            Ok(())
        }

        fn exit(&self, _device: &Arc<LogicalDevice>) {}
    }

    fn desc(name: &str, id: DeviceId) -> Arc<DriverDescriptor> {
        Arc::new(DriverDescriptor::new(name, id, DeviceType::Keyboard, Arc::new(Nop)))
    }

    const A: DeviceId = DeviceId::usb(0x046D, 0xC71C);
    const B: DeviceId = DeviceId::bluetooth(0x046D, 0xB30B);
    const C: DeviceId = DeviceId::bluetooth(0x046D, 0xB007);

    #[test]
    fn test_resolve_and_unregister() {
        let bus = MockBus::new();
        let registry = DriverRegistry::new(bus.clone());
        registry.register(desc("a", A)).unwrap();
        registry.register(desc("b", B)).unwrap();

        assert_eq!(registry.resolve(A).unwrap().name, "a");
        assert_eq!(registry.resolve(B).unwrap().name, "b");
        assert!(registry.resolve(C).is_none());

        assert!(registry.unregister(A));
        assert!(registry.resolve(A).is_none());
        assert_eq!(registry.resolve(B).unwrap().name, "b");
        assert_eq!(bus.registered(), vec![B]);
    }

    #[test]
    fn test_duplicate_identity_rejected() {
        let bus = MockBus::new();
        let registry = DriverRegistry::new(bus.clone());
        registry.register(desc("first", A)).unwrap();

        let err = registry.register(desc("second", A)).unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate { ref existing, .. } if existing == "first"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.resolve(A).unwrap().name, "first");
        assert_eq!(bus.registered(), vec![A]);
    }

    #[test]
    fn test_bus_failure_leaves_no_state() {
        let bus = MockBus::new();
        bus.refuse(B);
        let registry = DriverRegistry::new(bus.clone());

        assert!(matches!(
            registry.register(desc("b", B)),
            Err(RegistryError::Transport(_))
        ));
        assert!(registry.is_empty());
        assert!(registry.resolve(B).is_none());
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let bus = MockBus::new();
        let registry = DriverRegistry::new(bus.clone());
        assert!(!registry.unregister(A));
        registry.register(desc("a", A)).unwrap();
        assert!(registry.unregister(A));
        assert!(!registry.unregister(A));
        assert!(bus.registered().is_empty());
    }

    #[test]
    fn test_with_drivers_undoes_partial_registration() {
        let bus = MockBus::new();
        bus.refuse(C);
        let result = DriverRegistry::with_drivers(
            bus.clone(),
            vec![desc("a", A), desc("b", B), desc("c", C)],
        );
        assert!(result.is_err());
        assert!(bus.registered().is_empty());
    }

    #[test]
    fn test_shutdown_releases_all_claims() {
        let bus = MockBus::new();
        let registry =
            DriverRegistry::with_drivers(bus.clone(), vec![desc("a", A), desc("b", B)]).unwrap();
        assert_eq!(registry.drivers().len(), 2);
        registry.shutdown();
        assert!(registry.is_empty());
        assert!(bus.registered().is_empty());
        registry.shutdown();
    }
}
