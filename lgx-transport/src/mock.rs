//! In-memory connection and bus for tests
//!
//! `MockConnection` records every call made on it and lets a test inject
//! inbound reports as if the transport had received them. `MockBus` records
//! identity claims and can be told to refuse specific identities.
//! `MockSource` stands in for hot-plug enumeration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::TransportError;
use crate::types::{ConnectionInfo, DeviceId};
use crate::{Connection, ConnectionSource, DriverBus, RawEventHandler};

/// Calls recorded by [`MockConnection`], in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    ParseDescriptors,
    StartDelivery,
    StopDelivery,
    Send(Vec<u8>),
}

/// Scriptable in-memory [`Connection`]
pub struct MockConnection {
    info: ConnectionInfo,
    handler: Mutex<Option<RawEventHandler>>,
    calls: Mutex<Vec<MockCall>>,
    fail_parse: AtomicBool,
    fail_start: AtomicBool,
    no_output: AtomicBool,
}

impl MockConnection {
    pub fn new(id: DeviceId, path: &str) -> Arc<Self> {
        Arc::new(Self {
            info: ConnectionInfo::new(id, path),
            handler: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            fail_parse: AtomicBool::new(false),
            fail_start: AtomicBool::new(false),
            no_output: AtomicBool::new(false),
        })
    }

    /// Make `parse_descriptors` fail
    pub fn fail_parse(&self) {
        self.fail_parse.store(true, Ordering::SeqCst);
    }

    /// Make `start_delivery` fail
    pub fn fail_start(&self) {
        self.fail_start.store(true, Ordering::SeqCst);
    }

    /// Make `send_raw_report` fail with [`TransportError::NoOutputPath`]
    pub fn without_output(&self) {
        self.no_output.store(true, Ordering::SeqCst);
    }

    /// Deliver an inbound report to the installed handler
    ///
    /// Returns false if delivery is not running.
    pub fn inject(&self, data: &[u8]) -> bool {
        let handler = self.handler.lock().clone();
        match handler {
            Some(handler) => {
                handler(data);
                true
            }
            None => false,
        }
    }

    pub fn is_delivering(&self) -> bool {
        self.handler.lock().is_some()
    }

    /// All calls made so far
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    /// Payloads passed to `send_raw_report`
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                MockCall::Send(data) => Some(data.clone()),
                _ => None,
            })
            .collect()
    }
}

impl Connection for MockConnection {
    fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    fn parse_descriptors(&self) -> Result<(), TransportError> {
        self.calls.lock().push(MockCall::ParseDescriptors);
        if self.fail_parse.load(Ordering::SeqCst) {
            return Err(TransportError::DescriptorParse("mock parse failure".into()));
        }
        Ok(())
    }

    fn start_delivery(&self, handler: RawEventHandler) -> Result<(), TransportError> {
        self.calls.lock().push(MockCall::StartDelivery);
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(TransportError::HidError("mock start failure".into()));
        }
        let mut slot = self.handler.lock();
        if slot.is_some() {
            return Err(TransportError::AlreadyStarted);
        }
        *slot = Some(handler);
        Ok(())
    }

    fn stop_delivery(&self) {
        self.calls.lock().push(MockCall::StopDelivery);
        self.handler.lock().take();
    }

    fn send_raw_report(&self, data: &[u8]) -> Result<usize, TransportError> {
        if self.no_output.load(Ordering::SeqCst) {
            return Err(TransportError::NoOutputPath);
        }
        self.calls.lock().push(MockCall::Send(data.to_vec()));
        Ok(data.len())
    }
}

/// Recording [`DriverBus`]
#[derive(Default)]
pub struct MockBus {
    registered: Mutex<Vec<DeviceId>>,
    refused: Mutex<Vec<DeviceId>>,
}

impl MockBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make registration of `id` fail
    pub fn refuse(&self, id: DeviceId) {
        self.refused.lock().push(id);
    }

    /// Identities currently registered
    pub fn registered(&self) -> Vec<DeviceId> {
        self.registered.lock().clone()
    }
}

impl DriverBus for MockBus {
    fn register(&self, id: DeviceId, _name: &str) -> Result<(), TransportError> {
        if self.refused.lock().contains(&id) {
            return Err(TransportError::Internal(format!("mock bus refused {id}")));
        }
        let mut registered = self.registered.lock();
        if registered.contains(&id) {
            return Err(TransportError::AlreadyRegistered(id));
        }
        registered.push(id);
        Ok(())
    }

    fn unregister(&self, id: DeviceId) {
        self.registered.lock().retain(|r| *r != id);
    }
}

/// [`ConnectionSource`] over a set of plugged-in mock connections
#[derive(Default)]
pub struct MockSource {
    connections: Mutex<Vec<Arc<MockConnection>>>,
    fail_open: Mutex<Vec<String>>,
}

impl MockSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make a connection present
    pub fn plug(&self, connection: Arc<MockConnection>) {
        self.connections.lock().push(connection);
    }

    /// Remove the connection at `path`
    pub fn unplug(&self, path: &str) {
        self.connections.lock().retain(|c| c.info.path != path);
    }

    /// Make `open` fail for `path`
    pub fn fail_open(&self, path: &str) {
        self.fail_open.lock().push(path.to_string());
    }
}

impl ConnectionSource for MockSource {
    fn list_connections(&self) -> Result<Vec<ConnectionInfo>, TransportError> {
        Ok(self
            .connections
            .lock()
            .iter()
            .map(|c| c.info.clone())
            .collect())
    }

    fn open(&self, info: &ConnectionInfo) -> Result<Arc<dyn Connection>, TransportError> {
        if self.fail_open.lock().contains(&info.path) {
            return Err(TransportError::HidPermissionDenied(info.path.clone()));
        }
        self.connections
            .lock()
            .iter()
            .find(|c| c.info.path == info.path)
            .map(|c| Arc::clone(c) as Arc<dyn Connection>)
            .ok_or_else(|| TransportError::DeviceNotFound(info.path.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_plug_and_unplug() {
        let source = MockSource::new();
        source.plug(MockConnection::new(DeviceId::usb(1, 2), "mock0"));
        source.plug(MockConnection::new(DeviceId::usb(1, 3), "mock1"));
        assert_eq!(source.list_connections().unwrap().len(), 2);

        source.unplug("mock0");
        let listed = source.list_connections().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].path, "mock1");
        assert!(source.open(&listed[0]).is_ok());
        assert!(source
            .open(&ConnectionInfo::new(DeviceId::usb(1, 2), "mock0"))
            .is_err());
    }

    #[test]
    fn test_inject_without_delivery_is_refused() {
        let conn = MockConnection::new(DeviceId::usb(1, 2), "mock0");
        assert!(!conn.inject(&[0x10]));
    }

    #[test]
    fn test_calls_are_recorded_in_order() {
        let conn = MockConnection::new(DeviceId::usb(1, 2), "mock0");
        conn.parse_descriptors().unwrap();
        conn.start_delivery(Arc::new(|_: &[u8]| {})).unwrap();
        conn.send_raw_report(&[1, 2]).unwrap();
        conn.stop_delivery();
        assert_eq!(
            conn.calls(),
            vec![
                MockCall::ParseDescriptors,
                MockCall::StartDelivery,
                MockCall::Send(vec![1, 2]),
                MockCall::StopDelivery,
            ]
        );
        assert!(!conn.is_delivering());
    }

    #[test]
    fn test_double_start_fails() {
        let conn = MockConnection::new(DeviceId::usb(1, 2), "mock0");
        conn.start_delivery(Arc::new(|_: &[u8]| {})).unwrap();
        let err = conn.start_delivery(Arc::new(|_: &[u8]| {})).unwrap_err();
        assert!(matches!(err, TransportError::AlreadyStarted));
    }

    #[test]
    fn test_without_output() {
        let conn = MockConnection::new(DeviceId::usb(1, 2), "mock0");
        conn.without_output();
        let err = conn.send_raw_report(&[1]).unwrap_err();
        assert!(matches!(err, TransportError::NoOutputPath));
    }

    #[test]
    fn test_bus_refusal() {
        let bus = MockBus::new();
        let id = DeviceId::bluetooth(1, 2);
        bus.refuse(id);
        assert!(bus.register(id, "x").is_err());
        assert!(bus.registered().is_empty());
    }
}
