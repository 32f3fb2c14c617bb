//! MX5500 USB receiver driver
//!
//! The receiver multiplexes the keyboard and the mouse over one connection.
//! On init it creates one child device per function, aliasing its own
//! queues, so everything the children send goes out through the receiver's
//! output queue. Inbound reports carry the paired device's index in byte 1;
//! reports for an unknown index (the receiver itself uses 0xFF) are
//! published as receiver events.

use std::sync::Arc;

use tracing::{debug, warn};

use super::EventSender;
use crate::config::ReceiverConfig;
use crate::device::LogicalDevice;
use crate::driver::{Driver, DriverDescriptor};
use crate::error::DriverError;

/// Private data of a receiver device: its function children
#[derive(Debug)]
pub struct ReceiverState {
    pub keyboard: Arc<LogicalDevice>,
    pub mouse: Arc<LogicalDevice>,
}

/// Composite driver for the receiver
pub struct Mx5500Receiver {
    keyboard: Arc<DriverDescriptor>,
    mouse: Arc<DriverDescriptor>,
    routing: ReceiverConfig,
    events: EventSender,
}

impl Mx5500Receiver {
    /// `keyboard` and `mouse` drive the children
    pub fn new(
        keyboard: Arc<DriverDescriptor>,
        mouse: Arc<DriverDescriptor>,
        routing: ReceiverConfig,
        events: EventSender,
    ) -> Self {
        Self {
            keyboard,
            mouse,
            routing,
            events,
        }
    }

    fn release_child(child: &Arc<LogicalDevice>) {
        if let Err(e) = child.destroy() {
            warn!("{}: release failed: {}", child.name(), e);
        }
    }
}

impl Driver for Mx5500Receiver {
    fn init(&self, device: &Arc<LogicalDevice>) -> Result<(), DriverError> {
        let keyboard = LogicalDevice::alias(device, Arc::clone(&self.keyboard));
        let mouse = LogicalDevice::alias(device, Arc::clone(&self.mouse));

        if let Err(e) = self.keyboard.driver.init(&keyboard) {
            Self::release_child(&keyboard);
            Self::release_child(&mouse);
            return Err(e);
        }
        if let Err(e) = self.mouse.driver.init(&mouse) {
            self.keyboard.driver.exit(&keyboard);
            Self::release_child(&keyboard);
            Self::release_child(&mouse);
            return Err(e);
        }

        debug!(
            "{}: children {} and {}",
            device.name(),
            keyboard.name(),
            mouse.name()
        );
        device.set_private_data(Arc::new(ReceiverState { keyboard, mouse }));
        Ok(())
    }

    fn exit(&self, device: &Arc<LogicalDevice>) {
        let Some(state) = device.take_private_data::<ReceiverState>() else {
            return;
        };
        self.mouse.driver.exit(&state.mouse);
        self.keyboard.driver.exit(&state.keyboard);
        Self::release_child(&state.mouse);
        Self::release_child(&state.keyboard);
    }

    fn receive(&self, device: &Arc<LogicalDevice>, data: &[u8]) {
        let Some(state) = device.private_data::<ReceiverState>() else {
            debug!("{}: report before init, ignored", device.name());
            return;
        };
        match data.get(1).copied() {
            Some(index) if index == self.routing.keyboard_index => {
                self.keyboard.driver.receive(&state.keyboard, data)
            }
            Some(index) if index == self.routing.mouse_index => {
                self.mouse.driver.receive(&state.mouse, data)
            }
            _ => self.events.publish(device, data),
        }
    }
}
