//! Transport error types

use thiserror::Error;

use crate::types::DeviceId;

/// Errors that can occur during transport operations
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Device disconnected")]
    Disconnected,

    // HID-specific errors
    #[error("HID error: {0}")]
    HidError(String),

    #[error("HID permission denied: {0}")]
    HidPermissionDenied(String),

    #[error("Report descriptor parse failed: {0}")]
    DescriptorParse(String),

    /// The connection has no way to send output reports
    #[error("Connection has no output path")]
    NoOutputPath,

    #[error("Report delivery already started")]
    AlreadyStarted,

    #[error("Identity {0} is already registered")]
    AlreadyRegistered(DeviceId),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<hidapi::HidError> for TransportError {
    fn from(e: hidapi::HidError) -> Self {
        let msg = e.to_string();
        if msg.contains("Permission denied") || msg.contains("EPERM") {
            TransportError::HidPermissionDenied(msg)
        } else {
            TransportError::HidError(msg)
        }
    }
}
