//! End-to-end tests of the driver framework over mock connections
//!
//! These cover the full path: registry -> controller attach -> transport
//! delivery -> report queue -> built-in drivers -> event channel, and the
//! teardown in the other direction.

use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use lgx_driver::drivers::{self, EventSender, InputEvent};
use lgx_driver::{
    AttachError, AttachState, Config, ConnectionController, ConnectionMonitor, DeviceType,
    Driver, DriverDescriptor, DriverError, DriverRegistry, LogicalDevice,
};
use lgx_transport::device_ids;
use lgx_transport::mock::{MockBus, MockCall, MockConnection, MockSource};
use lgx_transport::DeviceId;
use parking_lot::Mutex;
use tokio::sync::broadcast;

const RECEIVER_PATH: &str = "/dev/hidraw0";
const KEYBOARD_PATH: &str = "/dev/hidraw1";

struct Harness {
    bus: Arc<MockBus>,
    registry: Arc<DriverRegistry>,
    controller: Arc<ConnectionController>,
    events: EventSender,
}

fn harness(config: &Config) -> Harness {
    let bus = MockBus::new();
    let events = EventSender::new();
    let registry = Arc::new(
        DriverRegistry::with_drivers(bus.clone(), drivers::builtin(config, &events)).unwrap(),
    );
    let controller = Arc::new(ConnectionController::new(
        Arc::clone(&registry),
        config.controller(),
    ));
    Harness {
        bus,
        registry,
        controller,
        events,
    }
}

fn drain(rx: &mut broadcast::Receiver<InputEvent>) -> Vec<InputEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[test]
fn test_builtin_drivers_claim_their_identities() {
    let h = harness(&Config::default());
    let registered = h.bus.registered();
    assert_eq!(registered.len(), 3);
    assert!(registered.contains(&device_ids::MX5500_RECEIVER));
    assert!(registered.contains(&device_ids::MX5500_KEYBOARD));
    assert!(registered.contains(&device_ids::MX5500_MOUSE));

    // Wrong bus for the receiver's vendor/product is not handled
    let other = DeviceId::bluetooth(0x046D, 0xC71C);
    assert!(h.registry.resolve(other).is_none());

    h.registry.shutdown();
    assert!(h.bus.registered().is_empty());
}

#[test]
fn test_receiver_end_to_end() {
    let h = harness(&Config::default());
    let mut rx = h.events.subscribe();
    let conn = MockConnection::new(device_ids::MX5500_RECEIVER, RECEIVER_PATH);

    let receiver = h.controller.attach(conn.clone()).unwrap().unwrap();
    assert_eq!(h.controller.state(RECEIVER_PATH), Some(AttachState::DriverReady));
    assert_eq!(receiver.device_type(), DeviceType::Receiver);

    // Standard reports below 0x10 never reach the drivers
    conn.inject(&[0x01, 0x00, 0x04, 0x00]);
    conn.inject(&[0x11, 0x01, 0x0A, 0x00]);
    conn.inject(&[0x11, 0x02, 0x0A, 0x00]);
    conn.inject(&[0x10, 0xFF, 0x81, 0x00]);
    receiver.input_queue().flush();

    let received: Vec<(DeviceType, Vec<u8>)> = drain(&mut rx)
        .into_iter()
        .map(|e| (e.device_type, e.report))
        .collect();
    assert_eq!(
        received,
        vec![
            (DeviceType::Keyboard, vec![0x11, 0x01, 0x0A, 0x00]),
            (DeviceType::Mouse, vec![0x11, 0x02, 0x0A, 0x00]),
            (DeviceType::Receiver, vec![0x10, 0xFF, 0x81, 0x00]),
        ]
    );

    // Children talk to the hardware through the receiver's output queue
    let keyboard = drivers::keyboard(&receiver).unwrap();
    keyboard.enqueue_outbound(&[0x10, 0x01, 0x81, 0x0D]).unwrap();
    receiver.output_queue().flush();
    assert_eq!(conn.sent(), vec![vec![0x10, 0x01, 0x81, 0x0D]]);

    assert!(h.controller.detach(RECEIVER_PATH));
    assert!(receiver.is_destroyed());
    assert!(keyboard.is_destroyed());
    assert!(!conn.is_delivering());
    assert_eq!(conn.calls().last(), Some(&MockCall::StopDelivery));
}

#[test]
fn test_direct_keyboard_attach() {
    let h = harness(&Config::default());
    let mut rx = h.events.subscribe();
    let conn = MockConnection::new(device_ids::MX5500_KEYBOARD, KEYBOARD_PATH);

    let keyboard = h.controller.attach(conn.clone()).unwrap().unwrap();
    assert!(keyboard.is_owner());
    assert!(Arc::ptr_eq(&drivers::keyboard(&keyboard).unwrap(), &keyboard));
    assert!(drivers::mouse(&keyboard).is_none());

    conn.inject(&[0x11, 0x01, 0x0A]);
    keyboard.input_queue().flush();
    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].device, format!("mx5500-keyboard@{KEYBOARD_PATH}"));
}

#[test]
fn test_identity_override_retargets_driver() {
    let mut config = Config::default();
    config.identities.push(lgx_driver::config::IdentityOverride {
        driver: drivers::MOUSE_DRIVER.into(),
        id: DeviceId::bluetooth(0x046D, 0xB008),
    });
    let h = harness(&config);

    assert!(h.registry.resolve(device_ids::MX5500_MOUSE).is_none());
    let mouse = h.registry.resolve(DeviceId::bluetooth(0x046D, 0xB008)).unwrap();
    assert_eq!(mouse.name, drivers::MOUSE_DRIVER);
}

#[test]
fn test_min_report_id_zero_forwards_everything() {
    let mut config = Config::default();
    config.delivery.min_report_id = 0;
    let h = harness(&config);
    let mut rx = h.events.subscribe();
    let conn = MockConnection::new(device_ids::MX5500_MOUSE, "/dev/hidraw4");
    let mouse = h.controller.attach(conn.clone()).unwrap().unwrap();

    conn.inject(&[0x02, 0x00, 0x05, 0x00]);
    mouse.input_queue().flush();
    assert_eq!(drain(&mut rx).len(), 1);
}

/// Driver that checks the controller's view of the connection during init
struct StateRecorder {
    controller: OnceLock<Weak<ConnectionController>>,
    seen: Mutex<Option<(Option<AttachState>, bool)>>,
    device: Mutex<Option<Arc<LogicalDevice>>>,
    conn: Arc<MockConnection>,
}

impl Driver for StateRecorder {
    fn init(&self, device: &Arc<LogicalDevice>) -> Result<(), DriverError> {
        let controller = self.controller.get().and_then(Weak::upgrade);
        let state = controller.and_then(|c| c.state(&device.connection().info().path));
        *self.seen.lock() = Some((state, self.conn.is_delivering()));
        *self.device.lock() = Some(Arc::clone(device));
        Err(DriverError::Init("recorder".into()))
    }

    fn exit(&self, _device: &Arc<LogicalDevice>) {
        panic!("exit must not run after a failed init");
    }
}

#[test]
fn test_init_runs_with_transport_started_and_failure_unwinds() {
    let id = DeviceId::usb(0x046D, 0xC52B);
    let conn = MockConnection::new(id, "/dev/hidraw7");
    let recorder = Arc::new(StateRecorder {
        controller: OnceLock::new(),
        seen: Mutex::new(None),
        device: Mutex::new(None),
        conn: conn.clone(),
    });

    let registry = Arc::new(DriverRegistry::new(MockBus::new()));
    registry
        .register(Arc::new(DriverDescriptor::new(
            "recorder",
            id,
            DeviceType::Receiver,
            recorder.clone(),
        )))
        .unwrap();
    let controller = Arc::new(ConnectionController::new(registry, Default::default()));
    recorder.controller.set(Arc::downgrade(&controller)).unwrap();

    let err = controller.attach(conn.clone()).unwrap_err();
    assert!(matches!(err, AttachError::DriverInit { .. }));
    assert_eq!(
        *recorder.seen.lock(),
        Some((Some(AttachState::TransportStarted), true))
    );
    assert!(!conn.is_delivering());
    assert_eq!(controller.state("/dev/hidraw7"), None);
    assert!(controller.devices().is_empty());

    // The half-attached device was released, queues included
    let device = recorder.device.lock().take().unwrap();
    assert!(device.is_destroyed());
    assert!(device.input_queue().is_closed());
    assert!(device.output_queue().is_closed());
    assert!(device.enqueue_outbound(&[0x10]).is_err());
}

#[test]
fn test_monitor_hotplug_cycle() {
    let h = harness(&Config::default());
    let source = MockSource::new();
    let monitor = ConnectionMonitor::new(Arc::clone(&h.controller), source.clone());

    let receiver_conn = MockConnection::new(device_ids::MX5500_RECEIVER, RECEIVER_PATH);
    let keyboard_conn = MockConnection::new(device_ids::MX5500_KEYBOARD, KEYBOARD_PATH);
    source.plug(receiver_conn.clone());
    source.plug(keyboard_conn.clone());

    assert_eq!(monitor.poll_once().attached, 2);
    assert_eq!(h.controller.devices().len(), 2);

    source.unplug(RECEIVER_PATH);
    let summary = monitor.poll_once();
    assert_eq!(summary.detached, 1);
    assert!(!receiver_conn.is_delivering());
    assert!(keyboard_conn.is_delivering());
    assert_eq!(h.controller.attached_paths(), vec![KEYBOARD_PATH.to_string()]);

    assert_eq!(h.controller.detach_all(), 1);
    assert!(!keyboard_conn.is_delivering());
}

#[test]
fn test_open_failure_is_counted_once() {
    let h = harness(&Config::default());
    let source = MockSource::new();
    source.plug(MockConnection::new(device_ids::MX5500_RECEIVER, RECEIVER_PATH));
    source.fail_open(RECEIVER_PATH);
    let monitor = ConnectionMonitor::new(Arc::clone(&h.controller), source.clone());

    assert_eq!(monitor.poll_once().failed, 1);
    assert_eq!(monitor.poll_once().failed, 0);
    assert!(h.controller.devices().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_events_reach_async_subscriber() {
    let h = harness(&Config::default());
    let mut rx = h.events.subscribe();
    let conn = MockConnection::new(device_ids::MX5500_RECEIVER, RECEIVER_PATH);
    let controller = Arc::clone(&h.controller);
    let attach_conn = conn.clone();
    tokio::task::spawn_blocking(move || controller.attach(attach_conn))
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    conn.inject(&[0x11, 0x02, 0x0A, 0x00]);
    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.device_type, DeviceType::Mouse);

    let controller = Arc::clone(&h.controller);
    tokio::task::spawn_blocking(move || controller.detach_all())
        .await
        .unwrap();
}
