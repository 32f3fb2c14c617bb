//! Keyboard and mouse drivers
//!
//! Both functions behave the same at this layer: count reports and publish
//! them. A function device is either attached directly (paired over
//! Bluetooth) or created as a child of the receiver.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use super::EventSender;
use crate::device::LogicalDevice;
use crate::driver::{DeviceType, Driver};
use crate::error::DriverError;

/// Private data of a keyboard or mouse device
#[derive(Debug, Default)]
pub struct FunctionState {
    reports: AtomicU64,
}

impl FunctionState {
    /// Reports received since init
    pub fn reports(&self) -> u64 {
        self.reports.load(Ordering::Relaxed)
    }
}

/// Driver for one input function (keyboard or mouse)
pub struct FunctionDriver {
    device_type: DeviceType,
    events: EventSender,
}

impl FunctionDriver {
    pub fn new(device_type: DeviceType, events: EventSender) -> Self {
        Self {
            device_type,
            events,
        }
    }
}

impl Driver for FunctionDriver {
    fn init(&self, device: &Arc<LogicalDevice>) -> Result<(), DriverError> {
        if device.device_type() != self.device_type {
            return Err(DriverError::Init(format!(
                "{} driver bound to a {} device",
                self.device_type,
                device.device_type()
            )));
        }
        device.set_private_data(Arc::new(FunctionState::default()));
        let via = if device.is_owner() { "direct" } else { "via receiver" };
        info!("{} ready ({})", device.name(), via);
        Ok(())
    }

    fn exit(&self, device: &Arc<LogicalDevice>) {
        if let Some(state) = device.take_private_data::<FunctionState>() {
            debug!("{}: {} reports received", device.name(), state.reports());
        }
    }

    fn receive(&self, device: &Arc<LogicalDevice>, data: &[u8]) {
        if let Some(state) = device.private_data::<FunctionState>() {
            state.reports.fetch_add(1, Ordering::Relaxed);
        }
        self.events.publish(device, data);
    }
}
