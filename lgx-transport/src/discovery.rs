//! Connection discovery through hidapi enumeration

use std::sync::Arc;

use hidapi::HidApi;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::error::TransportError;
use crate::hid::HidConnection;
use crate::types::{ConnectionInfo, DeviceId};
use crate::{Connection, ConnectionSource, DriverBus};

/// HID discovery for registered identities
///
/// Starts with no claims; the driver registry claims identities through the
/// [`DriverBus`] impl and only those connections are listed.
pub struct HidDiscovery {
    /// Claimed identity triples and the driver name that claimed each
    claimed: RwLock<Vec<(DeviceId, String)>>,
    /// Read buffer size for opened connections
    max_report_size: usize,
}

impl Default for HidDiscovery {
    fn default() -> Self {
        Self::new(64)
    }
}

impl HidDiscovery {
    /// Create a discovery instance opening connections with the given read buffer size
    pub fn new(max_report_size: usize) -> Self {
        Self {
            claimed: RwLock::new(Vec::new()),
            max_report_size,
        }
    }

    /// Name of the driver that claimed `id`, if any
    fn claimant(&self, id: &DeviceId) -> Option<String> {
        self.claimed
            .read()
            .iter()
            .find(|(c, _)| c == id)
            .map(|(_, name)| name.clone())
    }
}

impl ConnectionSource for HidDiscovery {
    /// List currently present connections with a claimed identity
    fn list_connections(&self) -> Result<Vec<ConnectionInfo>, TransportError> {
        let api = HidApi::new()?;
        let mut connections: Vec<ConnectionInfo> = Vec::new();

        for device_info in api.device_list() {
            let info = ConnectionInfo::from_hidapi(device_info);
            let Some(driver) = self.claimant(&info.id) else {
                continue;
            };
            // hidapi lists one entry per top-level collection; the
            // connection is the hidraw node
            if connections.iter().any(|c| c.path == info.path) {
                continue;
            }

            debug!(
                "Found connection: {} iface={} path={} for {}",
                info.id, info.interface_number, info.path, driver
            );
            connections.push(info);
        }

        debug!("Found {} connections", connections.len());
        Ok(connections)
    }

    /// Open a listed connection
    fn open(&self, info: &ConnectionInfo) -> Result<Arc<dyn Connection>, TransportError> {
        let api = HidApi::new()?;
        let device_info = api
            .device_list()
            .find(|d| d.path().to_string_lossy() == info.path)
            .ok_or_else(|| TransportError::DeviceNotFound(info.path.clone()))?;

        let connection = HidConnection::open(&api, device_info, self.max_report_size)?;
        Ok(Arc::new(connection))
    }
}

impl DriverBus for HidDiscovery {
    fn register(&self, id: DeviceId, name: &str) -> Result<(), TransportError> {
        let mut claimed = self.claimed.write();
        if claimed.iter().any(|(c, _)| *c == id) {
            return Err(TransportError::AlreadyRegistered(id));
        }
        info!("Claiming {} for {}", id, name);
        claimed.push((id, name.to_string()));
        Ok(())
    }

    fn unregister(&self, id: DeviceId) {
        let mut claimed = self.claimed.write();
        let before = claimed.len();
        claimed.retain(|(c, _)| *c != id);
        if claimed.len() != before {
            info!("Released {}", id);
        }
    }
}
