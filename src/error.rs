//! Error types for the driver framework

use lgx_transport::{DeviceId, TransportError};
use thiserror::Error;

/// Why a report was not queued
///
/// Every variant is also logged as a warning at the point of detection;
/// callers on the delivery path are free to ignore it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queue {queue} is full ({capacity} slots), report dropped")]
    Full { queue: String, capacity: usize },

    #[error("Report of {len} bytes exceeds the {max} byte slot size")]
    Oversized { len: usize, max: usize },

    #[error("Queue {0} is closed")]
    Closed(String),
}

/// Deferred-work errors
#[derive(Error, Debug)]
pub enum WorkError {
    #[error("Failed to spawn worker thread {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// `cancel_sync` was called from the worker's own thread
    #[error("Worker {0} cannot wait for itself")]
    CancelFromWorker(String),
}

/// Logical device errors
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Failed to allocate report queue: {0}")]
    QueueAlloc(#[from] WorkError),

    #[error("Invalid queue configuration: {0}")]
    InvalidConfig(String),
}

/// Error returned by a driver's `init`
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Driver initialisation failed: {0}")]
    Init(String),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Driver registry errors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("A driver for {id} is already registered ({existing})")]
    Duplicate { id: DeviceId, existing: String },

    #[error("Transport registration failed: {0}")]
    Transport(#[from] TransportError),
}

/// Failure of the attach sequence
///
/// By the time one of these is returned, every completed attach step has
/// been unwound.
#[derive(Error, Debug)]
pub enum AttachError {
    #[error("Connection {0} is already attached")]
    AlreadyAttached(String),

    #[error("Can't allocate device: {0}")]
    Alloc(#[from] DeviceError),

    #[error("Report descriptor parse failed: {0}")]
    Parse(#[source] TransportError),

    #[error("Transport start failed: {0}")]
    Start(#[source] TransportError),

    #[error("Driver {driver} failed to initialise: {source}")]
    DriverInit {
        driver: String,
        #[source]
        source: DriverError,
    },
}
