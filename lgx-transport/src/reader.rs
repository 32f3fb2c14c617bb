//! Input report delivery thread
//!
//! Every started connection owns one reader thread that pulls input reports
//! from the HID device and hands them to the framework's raw-event handler.
//! The handler runs on this thread, so it must return quickly: the framework
//! only copies the bytes into a queue here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use hidapi::HidDevice;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::RawEventHandler;

/// Configuration for the reader loop
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Read timeout in milliseconds (how often the shutdown flag is checked when idle)
    pub read_timeout_ms: i32,
    /// Sleep duration on error before retrying
    pub error_sleep_ms: u64,
    /// Size of the read buffer; longer reports are truncated by hidapi
    pub max_report_size: usize,
    /// Name used for the thread and in log lines
    pub name: String,
}

impl ReaderConfig {
    /// Configuration for USB receivers
    pub fn usb(name: impl Into<String>) -> Self {
        Self {
            read_timeout_ms: 5,
            error_sleep_ms: 100,
            max_report_size: 64,
            name: name.into(),
        }
    }

    /// Configuration for Bluetooth devices
    pub fn bluetooth(name: impl Into<String>) -> Self {
        Self {
            read_timeout_ms: 10,
            error_sleep_ms: 100,
            max_report_size: 64,
            name: name.into(),
        }
    }
}

/// A running reader thread
pub struct DeliveryThread {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<HidDevice>>,
    name: String,
}

impl DeliveryThread {
    /// Spawn a reader thread delivering every input report to `handler`
    pub fn spawn(
        device: HidDevice,
        handler: RawEventHandler,
        config: ReaderConfig,
    ) -> Result<Self, TransportError> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = Arc::clone(&shutdown);
        let name = config.name.clone();

        let handle = std::thread::Builder::new()
            .name(format!("{}-reader", config.name))
            .spawn(move || run_reader_loop(device, handler, shutdown_clone, config))
            .map_err(|e| TransportError::Internal(format!("Failed to spawn reader: {e}")))?;

        Ok(Self {
            shutdown,
            handle: Some(handle),
            name,
        })
    }

    /// Stop the thread and wait for it to exit, handing back the device
    ///
    /// After this returns the handler is never invoked again.
    pub fn stop(mut self) -> Option<HidDevice> {
        self.shutdown_and_join()
    }

    fn shutdown_and_join(&mut self) -> Option<HidDevice> {
        self.shutdown.store(true, Ordering::SeqCst);
        let handle = self.handle.take()?;
        if handle.thread().id() == std::thread::current().id() {
            warn!("{} reader asked to stop itself, not joining", self.name);
            return None;
        }
        match handle.join() {
            Ok(device) => Some(device),
            Err(_) => {
                warn!("{} reader thread panicked", self.name);
                None
            }
        }
    }
}

impl Drop for DeliveryThread {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}

/// Reader loop: read with a short timeout, deliver, repeat until shutdown
fn run_reader_loop(
    device: HidDevice,
    handler: RawEventHandler,
    shutdown: Arc<AtomicBool>,
    config: ReaderConfig,
) -> HidDevice {
    debug!("{} reader thread started", config.name);
    let mut buf = vec![0u8; config.max_report_size];

    while !shutdown.load(Ordering::Relaxed) {
        match device.read_timeout(&mut buf, config.read_timeout_ms) {
            Ok(len) if len > 0 => {
                debug!(
                    "{} reader got {} bytes: {:02X?}",
                    config.name,
                    len,
                    &buf[..len.min(16)]
                );
                handler(&buf[..len]);
            }
            Ok(_) => {
                // Timeout, no data
            }
            Err(e) => {
                warn!("{} reader error: {}", config.name, e);
                std::thread::sleep(Duration::from_millis(config.error_sleep_ms));
            }
        }
    }

    debug!("{} reader thread exiting", config.name);
    device
}
