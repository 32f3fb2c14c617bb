//! Built-in drivers for the MX5500 desktop set
//!
//! - `mx5500-receiver`: the USB receiver; a composite device that creates a
//!   keyboard and a mouse child sharing its queues and routes inbound
//!   reports to them by device index
//! - `mx5500-keyboard`: the keyboard paired over Bluetooth
//! - `mx-revolution`: the mouse paired over Bluetooth
//!
//! The keyboard and mouse drivers do not decode reports. They publish every
//! report as an [`InputEvent`] on a broadcast channel for consumers.

mod function;
mod receiver;

pub use function::{FunctionDriver, FunctionState};
pub use receiver::{Mx5500Receiver, ReceiverState};

use std::sync::Arc;

use lgx_transport::device_ids;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::config::Config;
use crate::device::LogicalDevice;
use crate::driver::{DeviceType, DriverDescriptor};

pub const RECEIVER_DRIVER: &str = "mx5500-receiver";
pub const KEYBOARD_DRIVER: &str = "mx5500-keyboard";
pub const MOUSE_DRIVER: &str = "mx-revolution";

/// Capacity of the input event broadcast channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A report received by a keyboard, mouse or receiver
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputEvent {
    /// Name of the logical device the report was routed to
    pub device: String,
    pub device_type: DeviceType,
    /// Raw report, report id first
    pub report: Vec<u8>,
}

/// Sender side of the input event channel
#[derive(Clone)]
pub struct EventSender {
    tx: broadcast::Sender<InputEvent>,
}

impl Default for EventSender {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSender {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InputEvent> {
        self.tx.subscribe()
    }

    /// Publish a report received by `device`; dropped if nobody listens
    pub fn publish(&self, device: &LogicalDevice, report: &[u8]) {
        let _ = self.tx.send(InputEvent {
            device: device.name().to_string(),
            device_type: device.device_type(),
            report: report.to_vec(),
        });
    }
}

/// Descriptors for the built-in drivers, identities overridden per `config`
///
/// The receiver is listed first. Its children use the keyboard and mouse
/// descriptors returned alongside it.
pub fn builtin(config: &Config, events: &EventSender) -> Vec<Arc<DriverDescriptor>> {
    let identity = |name: &str, default| config.identity_for(name).unwrap_or(default);

    let keyboard = Arc::new(DriverDescriptor::new(
        KEYBOARD_DRIVER,
        identity(KEYBOARD_DRIVER, device_ids::MX5500_KEYBOARD),
        DeviceType::Keyboard,
        Arc::new(FunctionDriver::new(DeviceType::Keyboard, events.clone())),
    ));
    let mouse = Arc::new(DriverDescriptor::new(
        MOUSE_DRIVER,
        identity(MOUSE_DRIVER, device_ids::MX5500_MOUSE),
        DeviceType::Mouse,
        Arc::new(FunctionDriver::new(DeviceType::Mouse, events.clone())),
    ));
    let receiver = Arc::new(DriverDescriptor::new(
        RECEIVER_DRIVER,
        identity(RECEIVER_DRIVER, device_ids::MX5500_RECEIVER),
        DeviceType::Receiver,
        Arc::new(Mx5500Receiver::new(
            Arc::clone(&keyboard),
            Arc::clone(&mouse),
            config.receiver,
            events.clone(),
        )),
    ));

    vec![receiver, keyboard, mouse]
}

/// The function device of type `wanted` reachable from `device`
///
/// That is `device` itself if it has that type, or the matching child when
/// `device` is a receiver. `None` if neither applies or the receiver is not
/// initialised.
pub fn function_device(
    device: &Arc<LogicalDevice>,
    wanted: DeviceType,
) -> Option<Arc<LogicalDevice>> {
    let found = device.device_type();
    if found == wanted {
        return Some(Arc::clone(device));
    }
    if found != DeviceType::Receiver {
        return None;
    }
    let state = device.private_data::<ReceiverState>()?;
    match wanted {
        DeviceType::Keyboard => Some(Arc::clone(&state.keyboard)),
        DeviceType::Mouse => Some(Arc::clone(&state.mouse)),
        DeviceType::Receiver => None,
    }
}

/// Keyboard device reachable from `device`
pub fn keyboard(device: &Arc<LogicalDevice>) -> Option<Arc<LogicalDevice>> {
    function_device(device, DeviceType::Keyboard)
}

/// Mouse device reachable from `device`
pub fn mouse(device: &Arc<LogicalDevice>) -> Option<Arc<LogicalDevice>> {
    function_device(device, DeviceType::Mouse)
}
