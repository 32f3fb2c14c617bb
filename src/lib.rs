//! Userspace driver framework for Logitech MX5500 receivers
//!
//! One physical connection (the USB receiver, or a device paired directly
//! over Bluetooth) is bound to a driver and exposed as one or more logical
//! devices. Reports flow through bounded queues drained by per-queue worker
//! threads, so the transport's delivery path never blocks on a driver.
//!
//! ```text
//! transport delivery --> ConnectionController callback --> input ReportQueue
//!                                                              | worker
//!                                                              v
//!                                                        Driver::receive
//! Driver --> LogicalDevice::enqueue_outbound --> output ReportQueue --> send
//! ```

pub mod config;
pub mod device;
pub mod driver;
pub mod drivers;
pub mod error;
pub mod lifecycle;
pub mod queue;
pub mod registry;
pub mod workqueue;

pub use config::Config;
pub use device::{LogicalDevice, Ownership};
pub use driver::{DeviceType, Driver, DriverDescriptor};
pub use error::{AttachError, DeviceError, DriverError, QueueError, RegistryError, WorkError};
pub use lifecycle::{AttachState, ConnectionController, ConnectionMonitor, ControllerConfig};
pub use queue::{QueueConfig, QueueDirection, QueueStats, ReportQueue};
pub use registry::DriverRegistry;
pub use workqueue::DeferredWork;
