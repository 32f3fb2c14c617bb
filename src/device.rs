//! Logical devices
//!
//! A [`LogicalDevice`] is one functional unit bound to a physical connection:
//! a receiver, a keyboard or a mouse. Each device created with
//! [`LogicalDevice::create`] owns an input and an output [`ReportQueue`].
//! A composite device (the receiver) builds its children with
//! [`LogicalDevice::alias`]; children share the parent's queues and
//! connection.
//!
//! Ownership rules:
//!
//! - the input queue always delivers to the owner's driver, which routes to
//!   children itself
//! - only the owner's [`destroy`](LogicalDevice::destroy) frees the queues;
//!   an alias's destroy only validates
//!
//! Every device also carries one slot of driver-private data, stored as a
//! type-erased `Arc` and read back by type.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use lgx_transport::{Connection, ConnectionInfo};
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::driver::{DeviceType, DriverDescriptor};
use crate::error::{DeviceError, QueueError, WorkError};
use crate::queue::{QueueConfig, QueueDirection, QueueStats, ReportQueue};

static NEXT_DEVICE_ID: AtomicU64 = AtomicU64::new(1);

type PrivateData = Arc<dyn Any + Send + Sync>;

/// Whether a device owns its queues or borrows them from another device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    Owner,
    /// Shares the queues of device `owner`
    Alias { owner: u64 },
}

/// One functional unit bound to a physical connection
pub struct LogicalDevice {
    id: u64,
    name: String,
    driver: Arc<DriverDescriptor>,
    connection: Arc<dyn Connection>,
    input: Arc<ReportQueue>,
    output: Arc<ReportQueue>,
    ownership: Ownership,
    private: Mutex<Option<PrivateData>>,
    /// Set while a `destroy` is in progress or has completed
    releasing: AtomicBool,
    destroyed: AtomicBool,
}

impl LogicalDevice {
    /// Allocate a device with its own queue pair
    ///
    /// The input queue hands reports to `driver.receive`, the output queue
    /// to the connection's send primitive.
    pub fn create(
        driver: Arc<DriverDescriptor>,
        connection: Arc<dyn Connection>,
        config: QueueConfig,
    ) -> Result<Arc<Self>, DeviceError> {
        let id = NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed);
        let name = device_name(&driver, connection.info());

        // Filled in once the device exists; the input sink only holds a weak
        // reference so the device can be dropped while its worker is idle.
        let slot: Arc<OnceLock<Weak<LogicalDevice>>> = Arc::new(OnceLock::new());

        let input_slot = Arc::clone(&slot);
        let input_name = name.clone();
        let input = ReportQueue::new(
            format!("{}-{}", driver.name, QueueDirection::Input),
            QueueDirection::Input,
            id,
            config,
            Box::new(move |data: &[u8]| {
                match input_slot.get().and_then(Weak::upgrade) {
                    Some(device) => device.driver.driver.receive(&device, data),
                    None => error!("{}: report for released device dropped", input_name),
                }
            }),
        )?;

        let output_conn = Arc::clone(&connection);
        let output_name = name.clone();
        let output = ReportQueue::new(
            format!("{}-{}", driver.name, QueueDirection::Output),
            QueueDirection::Output,
            id,
            config,
            Box::new(move |data: &[u8]| {
                if let Err(e) = output_conn.send_raw_report(data) {
                    warn!("{}: send failed: {}", output_name, e);
                }
            }),
        )?;

        let device = Arc::new(Self {
            id,
            name,
            driver,
            connection,
            input: Arc::new(input),
            output: Arc::new(output),
            ownership: Ownership::Owner,
            private: Mutex::new(None),
            releasing: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
        });
        let _ = slot.set(Arc::downgrade(&device));

        debug!("device {} ({}) created", device.id, device.name);
        Ok(device)
    }

    /// Build a child device sharing `from`'s queues and connection
    ///
    /// Reports queued by the child go out through the shared output queue.
    /// Inbound reports still reach `from`'s driver only.
    pub fn alias(from: &Arc<LogicalDevice>, driver: Arc<DriverDescriptor>) -> Arc<Self> {
        let id = NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed);
        let owner = match from.ownership {
            Ownership::Owner => from.id,
            Ownership::Alias { owner } => owner,
        };
        let device = Arc::new(Self {
            id,
            name: device_name(&driver, from.connection.info()),
            driver,
            connection: Arc::clone(&from.connection),
            input: Arc::clone(&from.input),
            output: Arc::clone(&from.output),
            ownership: Ownership::Alias { owner },
            private: Mutex::new(None),
            releasing: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
        });
        debug!(
            "device {} ({}) aliases queues of device {}",
            device.id, device.name, owner
        );
        device
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn driver(&self) -> &Arc<DriverDescriptor> {
        &self.driver
    }

    pub fn device_type(&self) -> DeviceType {
        self.driver.device_type
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    pub fn is_owner(&self) -> bool {
        self.ownership == Ownership::Owner
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn input_queue(&self) -> &Arc<ReportQueue> {
        &self.input
    }

    pub fn output_queue(&self) -> &Arc<ReportQueue> {
        &self.output
    }

    /// Counters of the (possibly shared) input and output queues
    pub fn queue_stats(&self) -> (QueueStats, QueueStats) {
        (self.input.stats(), self.output.stats())
    }

    /// Queue a report for sending to the hardware
    pub fn enqueue_outbound(&self, data: &[u8]) -> Result<(), QueueError> {
        self.output.enqueue(data)
    }

    /// Queue a report received from the hardware for the driver
    pub fn enqueue_inbound(&self, data: &[u8]) -> Result<(), QueueError> {
        self.input.enqueue(data)
    }

    /// Replace the driver-private data
    pub fn set_private_data<T: Any + Send + Sync>(&self, data: Arc<T>) {
        *self.private.lock() = Some(data);
    }

    /// Driver-private data, if set and of type `T`
    pub fn private_data<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let data = self.private.lock().clone()?;
        data.downcast::<T>().ok()
    }

    /// Remove and return the driver-private data if it is of type `T`
    ///
    /// Data of another type is left in place.
    pub fn take_private_data<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let mut slot = self.private.lock();
        let data = slot.take()?;
        match data.downcast::<T>() {
            Ok(data) => Some(data),
            Err(other) => {
                *slot = Some(other);
                None
            }
        }
    }

    /// Release the device
    ///
    /// For the owner this closes both queues, waiting for in-flight reports,
    /// and drops the private data. For an alias it only validates: the
    /// shared queues stay alive until the owner is destroyed. Idempotent.
    ///
    /// Both queues are always released, even if the first fails. On error
    /// (e.g. called from the input queue's own worker) the device is not
    /// marked destroyed, so a later call from another thread completes it.
    pub fn destroy(&self) -> Result<(), WorkError> {
        if self.releasing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let input = self.input.release(self.id);
        let output = self.output.release(self.id);
        let released = match (input, output) {
            (Ok(input), Ok(output)) => input && output,
            (Err(e), _) | (_, Err(e)) => {
                warn!("device {} ({}) not fully released: {}", self.id, self.name, e);
                self.releasing.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        if let Ownership::Alias { owner } = self.ownership {
            debug!(
                "device {} ({}) released; queues stay with device {}",
                self.id, self.name, owner
            );
        } else if released {
            debug!("device {} ({}) destroyed", self.id, self.name);
        }

        self.private.lock().take();
        self.destroyed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl fmt::Debug for LogicalDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogicalDevice")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("driver", &self.driver.name)
            .field("ownership", &self.ownership)
            .finish()
    }
}

fn device_name(driver: &DriverDescriptor, info: &ConnectionInfo) -> String {
    format!("{}@{}", driver.name, info.path)
}
