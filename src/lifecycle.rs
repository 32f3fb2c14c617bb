//! Connection lifecycle
//!
//! [`ConnectionController`] takes a physical connection from discovery to a
//! running driver and back:
//!
//! ```text
//! Discovered -> Matched -> Parsed -> TransportStarted -> DriverReady
//!                                                          |
//!                            TornDown <- TransportStopping <-
//! ```
//!
//! Attach steps that fail are unwound in reverse order. A connection nobody
//! has a driver for is "not handled", which is not an error.
//!
//! [`ConnectionMonitor`] drives the controller from periodic enumeration.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use lgx_transport::{
    Connection, ConnectionSource, MonitorConfig, MonitoredConnection, RawEventHandler,
};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::device::LogicalDevice;
use crate::error::AttachError;
use crate::queue::QueueConfig;
use crate::registry::DriverRegistry;

/// Progress of one connection through attach and detach
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AttachState {
    Discovered,
    Matched,
    Parsed,
    TransportStarted,
    DriverReady,
    TransportStopping,
    TornDown,
}

impl fmt::Display for AttachState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Controller settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Geometry of every device's queues
    pub queue: QueueConfig,
    /// Inbound reports with a lower report id are not queued; 0 disables
    pub min_report_id: u8,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            min_report_id: 0x10,
        }
    }
}

struct Attachment {
    state: AttachState,
    connection: Arc<dyn Connection>,
    device: Option<Arc<LogicalDevice>>,
}

/// Attaches drivers to connections and detaches them again
pub struct ConnectionController {
    registry: Arc<DriverRegistry>,
    config: ControllerConfig,
    attachments: Mutex<HashMap<String, Attachment>>,
    /// Serialises attach and detach
    control: Mutex<()>,
}

impl ConnectionController {
    pub fn new(registry: Arc<DriverRegistry>, config: ControllerConfig) -> Self {
        Self {
            registry,
            config,
            attachments: Mutex::new(HashMap::new()),
            control: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &Arc<DriverRegistry> {
        &self.registry
    }

    /// Bind a driver to `connection` and start it
    ///
    /// Returns `Ok(None)` if no registered driver matches the connection.
    /// On error every completed step has been undone: delivery is stopped
    /// and the device released. The driver's `exit` is not called for a
    /// driver whose `init` failed.
    pub fn attach(
        &self,
        connection: Arc<dyn Connection>,
    ) -> Result<Option<Arc<LogicalDevice>>, AttachError> {
        let _control = self.control.lock();
        let info = connection.info().clone();
        let path = info.path.clone();

        if self.attachments.lock().contains_key(&path) {
            return Err(AttachError::AlreadyAttached(path));
        }

        let Some(driver) = self.registry.resolve(info.id) else {
            debug!("{}: no driver for {}, not handled", path, info.id);
            return Ok(None);
        };

        self.attachments.lock().insert(
            path.clone(),
            Attachment {
                state: AttachState::Discovered,
                connection: Arc::clone(&connection),
                device: None,
            },
        );
        self.transition(&path, AttachState::Matched);

        let device = match LogicalDevice::create(
            Arc::clone(&driver),
            Arc::clone(&connection),
            self.config.queue,
        ) {
            Ok(device) => device,
            Err(e) => {
                self.forget(&path);
                return Err(e.into());
            }
        };
        if let Some(attachment) = self.attachments.lock().get_mut(&path) {
            attachment.device = Some(Arc::clone(&device));
        }

        if let Err(e) = connection.parse_descriptors() {
            self.release(&path, &device);
            return Err(AttachError::Parse(e));
        }
        self.transition(&path, AttachState::Parsed);

        let handler = raw_event_handler(
            Arc::downgrade(&device),
            self.config.min_report_id,
            path.clone(),
        );
        if let Err(e) = connection.start_delivery(handler) {
            self.release(&path, &device);
            return Err(AttachError::Start(e));
        }
        self.transition(&path, AttachState::TransportStarted);

        if let Err(source) = driver.driver.init(&device) {
            connection.stop_delivery();
            self.release(&path, &device);
            return Err(AttachError::DriverInit {
                driver: driver.name.clone(),
                source,
            });
        }
        self.transition(&path, AttachState::DriverReady);

        info!("{} attached to {} ({})", driver.name, path, info.id);
        Ok(Some(device))
    }

    /// Stop and release the device attached at `path`
    ///
    /// Delivery is stopped first and reports already queued are handed to
    /// the driver; then the driver's `exit` runs, pending outbound reports
    /// are sent and the device is destroyed. Returns false if nothing is
    /// attached at `path`.
    pub fn detach(&self, path: &str) -> bool {
        let _control = self.control.lock();

        let (connection, device) = {
            let mut attachments = self.attachments.lock();
            let Some(attachment) = attachments.get_mut(path) else {
                return false;
            };
            let Some(device) = attachment.device.clone() else {
                return false;
            };
            attachment.state = AttachState::TransportStopping;
            (Arc::clone(&attachment.connection), device)
        };
        debug!("{}: {}", path, AttachState::TransportStopping);

        connection.stop_delivery();
        device.input_queue().flush();

        device.driver().driver.exit(&device);

        device.output_queue().flush();
        if let Err(e) = device.destroy() {
            error!("{}: failed to release device: {}", path, e);
        }

        self.forget(path);
        info!("{} detached from {}", device.driver().name, path);
        true
    }

    /// Detach everything, returning the number of connections detached
    pub fn detach_all(&self) -> usize {
        self.attached_paths()
            .iter()
            .filter(|path| self.detach(path))
            .count()
    }

    /// Current state of the connection at `path`
    pub fn state(&self, path: &str) -> Option<AttachState> {
        self.attachments.lock().get(path).map(|a| a.state)
    }

    /// Paths with an attachment in progress or complete
    pub fn attached_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.attachments.lock().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Devices that completed attach
    pub fn devices(&self) -> Vec<Arc<LogicalDevice>> {
        let attachments = self.attachments.lock();
        let mut devices: Vec<Arc<LogicalDevice>> = attachments
            .values()
            .filter(|a| a.state == AttachState::DriverReady)
            .filter_map(|a| a.device.clone())
            .collect();
        devices.sort_by_key(|d| d.id());
        devices
    }

    fn transition(&self, path: &str, state: AttachState) {
        if let Some(attachment) = self.attachments.lock().get_mut(path) {
            attachment.state = state;
        }
        debug!("{}: {}", path, state);
    }

    fn release(&self, path: &str, device: &Arc<LogicalDevice>) {
        if let Err(e) = device.destroy() {
            error!("{}: failed to release device: {}", path, e);
        }
        self.forget(path);
    }

    fn forget(&self, path: &str) {
        self.attachments.lock().remove(path);
        debug!("{}: {}", path, AttachState::TornDown);
    }
}

/// Delivery callback: filter by report id and queue for the driver
///
/// Runs on the transport's delivery thread and never blocks.
fn raw_event_handler(
    device: Weak<LogicalDevice>,
    min_report_id: u8,
    path: String,
) -> RawEventHandler {
    Arc::new(move |data: &[u8]| {
        let Some(&report_id) = data.first() else {
            return;
        };
        if report_id < min_report_id {
            return;
        }
        match device.upgrade() {
            Some(device) if !device.is_destroyed() => {
                // Rejections are logged by the queue
                let _ = device.enqueue_inbound(data);
            }
            _ => error!("{}: report for uninitialised device ignored", path),
        }
    })
}

/// Result of one enumeration pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub attached: usize,
    pub detached: usize,
    pub failed: usize,
}

/// Keeps the controller in sync with the connections present
pub struct ConnectionMonitor {
    controller: Arc<ConnectionController>,
    source: Arc<dyn ConnectionSource>,
    traffic: Option<MonitorConfig>,
    /// Paths whose attach failed; not retried until they disappear
    failed: Mutex<HashSet<String>>,
}

impl ConnectionMonitor {
    pub fn new(controller: Arc<ConnectionController>, source: Arc<dyn ConnectionSource>) -> Self {
        Self {
            controller,
            source,
            traffic: None,
            failed: Mutex::new(HashSet::new()),
        }
    }

    /// Wrap every opened connection in the traffic printer
    pub fn with_traffic_monitor(mut self, config: MonitorConfig) -> Self {
        self.traffic = Some(config);
        self
    }

    pub fn controller(&self) -> &Arc<ConnectionController> {
        &self.controller
    }

    /// Attach new connections and detach vanished ones
    pub fn poll_once(&self) -> PollSummary {
        let mut summary = PollSummary::default();

        let present = match self.source.list_connections() {
            Ok(present) => present,
            Err(e) => {
                warn!("Enumeration failed: {}", e);
                return summary;
            }
        };
        let present_paths: HashSet<&str> = present.iter().map(|c| c.path.as_str()).collect();

        self.failed
            .lock()
            .retain(|path| present_paths.contains(path.as_str()));

        for path in self.controller.attached_paths() {
            if !present_paths.contains(path.as_str()) && self.controller.detach(&path) {
                summary.detached += 1;
            }
        }

        let attached: HashSet<String> = self.controller.attached_paths().into_iter().collect();
        for info in &present {
            if attached.contains(&info.path) || self.failed.lock().contains(&info.path) {
                continue;
            }

            let connection = match self.source.open(info) {
                Ok(connection) => connection,
                Err(e) => {
                    warn!("{}: open failed: {}", info.path, e);
                    self.failed.lock().insert(info.path.clone());
                    summary.failed += 1;
                    continue;
                }
            };
            let connection = match &self.traffic {
                Some(config) => MonitoredConnection::wrap(connection, config.clone()),
                None => connection,
            };

            match self.controller.attach(connection) {
                Ok(Some(_)) => summary.attached += 1,
                Ok(None) => {}
                Err(e) => {
                    warn!("{}: attach failed: {}", info.path, e);
                    self.failed.lock().insert(info.path.clone());
                    summary.failed += 1;
                }
            }
        }

        summary
    }

    /// Poll every `period` until `shutdown` completes, then detach everything
    ///
    /// Each pass runs on the blocking pool, since attach and detach join
    /// worker threads.
    pub async fn run_until<F>(self: Arc<Self>, period: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => {
                    let monitor = Arc::clone(&self);
                    match tokio::task::spawn_blocking(move || monitor.poll_once()).await {
                        Ok(summary) if summary != PollSummary::default() => {
                            debug!("Poll: {:?}", summary);
                        }
                        Ok(_) => {}
                        Err(e) => error!("Poll task failed: {}", e),
                    }
                }
            }
        }

        let controller = Arc::clone(&self.controller);
        match tokio::task::spawn_blocking(move || controller.detach_all()).await {
            Ok(n) => info!("Detached {} connection(s)", n),
            Err(e) => error!("Detach task failed: {}", e),
        }
    }
}
