//! Physical-connection layer for Logitech extended HID devices
//!
//! This crate is the narrow boundary between the driver framework and the
//! HID transport:
//!
//! - [`Connection`]: one physical link (a hidraw node) that can parse its
//!   report descriptors, start/stop delivering input reports to a callback,
//!   and send raw output reports
//! - [`DriverBus`]: the registration mechanism that tells the transport which
//!   identity triples the framework wants to be handed
//! - [`ConnectionSource`]: enumeration and opening of present connections
//! - [`HidDiscovery`]: hidapi enumeration implementing [`ConnectionSource`]
//!   and [`DriverBus`]
//! - [`MonitoredConnection`]: middleware printing all traffic
//!
//! Report contents are never interpreted here.

pub mod device_ids;
pub mod error;
pub mod mock;
pub mod types;

mod discovery;
mod hid;
mod monitor;
mod reader;

pub use discovery::HidDiscovery;
pub use error::TransportError;
pub use hid::HidConnection;
pub use monitor::{MonitorConfig, MonitoredConnection, TrafficFilter};
pub use reader::ReaderConfig;
pub use types::{Bus, ConnectionInfo, DeviceId};

use std::sync::Arc;

/// Raw-event callback installed by the framework when delivery starts
///
/// Invoked on the transport's delivery thread for every input report.
/// Implementations must not block.
pub type RawEventHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// One physical connection enumerated by the transport
pub trait Connection: Send + Sync {
    /// Identity and path of this connection
    fn info(&self) -> &ConnectionInfo;

    /// Fetch and validate the report descriptors
    fn parse_descriptors(&self) -> Result<(), TransportError>;

    /// Start delivering input reports to `handler`
    ///
    /// Fails with [`TransportError::AlreadyStarted`] if delivery is running.
    fn start_delivery(&self, handler: RawEventHandler) -> Result<(), TransportError>;

    /// Stop delivering input reports
    ///
    /// Blocks until the delivery thread has exited; once this returns the
    /// handler is not invoked again. No-op when delivery is not running.
    fn stop_delivery(&self);

    /// Send one raw output report, report id in the first byte
    ///
    /// Returns the number of bytes written.
    fn send_raw_report(&self, data: &[u8]) -> Result<usize, TransportError>;
}

/// Registration of driver identities with the transport
///
/// The transport only hands connections whose identity triple has been
/// registered to the framework.
pub trait DriverBus: Send + Sync {
    /// Claim connections with this identity on behalf of driver `name`
    fn register(&self, id: DeviceId, name: &str) -> Result<(), TransportError>;

    /// Release a previous claim; no-op if `id` is not registered
    fn unregister(&self, id: DeviceId);
}

/// Enumeration of the physical connections currently present
pub trait ConnectionSource: Send + Sync {
    /// List present connections whose identity has been claimed
    fn list_connections(&self) -> Result<Vec<ConnectionInfo>, TransportError>;

    /// Open a listed connection
    fn open(&self, info: &ConnectionInfo) -> Result<Arc<dyn Connection>, TransportError>;
}
