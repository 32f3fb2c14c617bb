//! Driver capability interface
//!
//! A driver is matched to a physical connection by its identity triple and
//! then driven through three callbacks:
//!
//! - `init` once the connection is delivering reports
//! - `receive` on the input queue's worker thread, once per inbound report
//! - `exit` on detach, after delivery has stopped
//!
//! Descriptors are immutable once registered.

use std::fmt;
use std::sync::Arc;

use lgx_transport::DeviceId;
use serde::{Deserialize, Serialize};

use crate::device::LogicalDevice;
use crate::error::DriverError;

/// Functional role of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// Wireless receiver multiplexing several paired devices
    Receiver,
    Keyboard,
    Mouse,
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceType::Receiver => write!(f, "receiver"),
            DeviceType::Keyboard => write!(f, "keyboard"),
            DeviceType::Mouse => write!(f, "mouse"),
        }
    }
}

/// Callbacks implemented by a device driver
pub trait Driver: Send + Sync {
    /// Bring the device up
    ///
    /// Delivery is already running, so `receive` may be called concurrently.
    /// On error the framework stops delivery and releases the device without
    /// calling `exit`.
    fn init(&self, device: &Arc<LogicalDevice>) -> Result<(), DriverError>;

    /// Tear the device down; delivery has already stopped
    fn exit(&self, device: &Arc<LogicalDevice>);

    /// Handle one inbound report
    ///
    /// Runs on the input queue's worker and may block. `device` is always the
    /// queue owner, so composite drivers demultiplex to their children here.
    fn receive(&self, device: &Arc<LogicalDevice>, data: &[u8]) {
        let _ = (device, data);
    }
}

/// A driver together with the identity it handles
#[derive(Clone)]
pub struct DriverDescriptor {
    pub name: String,
    pub id: DeviceId,
    pub device_type: DeviceType,
    pub driver: Arc<dyn Driver>,
}

impl DriverDescriptor {
    pub fn new(
        name: impl Into<String>,
        id: DeviceId,
        device_type: DeviceType,
        driver: Arc<dyn Driver>,
    ) -> Self {
        Self {
            name: name.into(),
            id,
            device_type,
            driver,
        }
    }

    /// Same driver, matched against a different identity
    pub fn with_id(&self, id: DeviceId) -> Self {
        Self {
            id,
            ..self.clone()
        }
    }

    /// Check if this descriptor handles `id`
    pub fn matches(&self, id: &DeviceId) -> bool {
        self.id == *id
    }
}

impl fmt::Debug for DriverDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverDescriptor")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("device_type", &self.device_type)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nop;

    impl Driver for Nop {
        fn init(&self, _device: &Arc<LogicalDevice>) -> Result<(), DriverError> {
            Ok(())
        }

        fn exit(&self, _device: &Arc<LogicalDevice>) {}
    }

    #[test]
    fn test_matches_whole_triple() {
        let desc = DriverDescriptor::new(
            "nop",
            DeviceId::usb(0x046D, 0xC71C),
            DeviceType::Receiver,
            Arc::new(Nop),
        );
        assert!(desc.matches(&DeviceId::usb(0x046D, 0xC71C)));
        assert!(!desc.matches(&DeviceId::bluetooth(0x046D, 0xC71C)));
        assert!(!desc.matches(&DeviceId::usb(0x046D, 0xC71D)));
    }

    #[test]
    fn test_with_id_keeps_driver() {
        let desc = DriverDescriptor::new(
            "nop",
            DeviceId::bluetooth(0x046D, 0xB30B),
            DeviceType::Keyboard,
            Arc::new(Nop),
        );
        let moved = desc.with_id(DeviceId::bluetooth(0x046D, 0xB30C));
        assert_eq!(moved.name, "nop");
        assert_eq!(moved.device_type, DeviceType::Keyboard);
        assert!(Arc::ptr_eq(&moved.driver, &desc.driver));
        assert!(!moved.matches(&desc.id));
    }

    #[test]
    fn test_device_type_serde() {
        assert_eq!(
            serde_json::to_string(&DeviceType::Receiver).unwrap(),
            "\"receiver\""
        );
        assert_eq!(DeviceType::Mouse.to_string(), "mouse");
    }
}
