//! Known device identities
//!
//! The MX5500 desktop set pairs a keyboard and an MX Revolution mouse with a
//! USB receiver. Both peripherals can also be paired over Bluetooth directly,
//! in which case they enumerate with their own product ids.

use crate::types::DeviceId;

/// Logitech vendor ID
pub const VENDOR_ID: u16 = 0x046D;

/// MX5500 USB receiver
pub const PID_MX5500_RECEIVER: u16 = 0xC71C;
/// MX5500 keyboard (Bluetooth)
pub const PID_MX5500_KEYBOARD: u16 = 0xB30B;
/// MX Revolution mouse as shipped with the MX5500 (Bluetooth)
pub const PID_MX5500_MOUSE: u16 = 0xB007;

pub const MX5500_RECEIVER: DeviceId = DeviceId::usb(VENDOR_ID, PID_MX5500_RECEIVER);
pub const MX5500_KEYBOARD: DeviceId = DeviceId::bluetooth(VENDOR_ID, PID_MX5500_KEYBOARD);
pub const MX5500_MOUSE: DeviceId = DeviceId::bluetooth(VENDOR_ID, PID_MX5500_MOUSE);
