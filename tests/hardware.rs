//! Integration tests against a real MX5500 receiver.
//!
//! These tests require the receiver to be plugged in and hidraw access.
//! Run with: cargo test --test hardware -- --ignored --nocapture

use std::sync::Arc;
use std::time::Duration;

use lgx_driver::drivers::{self, EventSender};
use lgx_driver::{AttachState, Config, ConnectionController, DeviceType, DriverRegistry};
use lgx_transport::{device_ids, ConnectionSource, HidDiscovery, TransportError};

fn setup() -> (Arc<HidDiscovery>, Arc<ConnectionController>, EventSender) {
    let config = Config::default();
    let events = EventSender::new();
    let discovery = Arc::new(HidDiscovery::new(config.queue.max_report_size));
    let registry =
        DriverRegistry::with_drivers(discovery.clone(), drivers::builtin(&config, &events))
            .expect("built-in drivers register");
    let controller = Arc::new(ConnectionController::new(
        Arc::new(registry),
        config.controller(),
    ));
    (discovery, controller, events)
}

#[test]
#[ignore] // requires hardware
fn receiver_is_listed() {
    let (discovery, _controller, _events) = setup();
    let connections = discovery.list_connections().expect("enumeration works");
    assert!(
        connections
            .iter()
            .any(|c| c.id == device_ids::MX5500_RECEIVER),
        "No MX5500 receiver found, plug one in"
    );
}

#[test]
#[ignore] // requires hardware
fn receiver_attach_detach_cycle() {
    let (discovery, controller, events) = setup();
    let mut rx = events.subscribe();

    let info = discovery
        .list_connections()
        .unwrap()
        .into_iter()
        .find(|c| c.id == device_ids::MX5500_RECEIVER)
        .expect("No MX5500 receiver found, plug one in");
    let connection = discovery.open(&info).unwrap();

    let receiver = controller.attach(connection).unwrap().unwrap();
    assert_eq!(controller.state(&info.path), Some(AttachState::DriverReady));
    assert!(drivers::keyboard(&receiver).is_some());
    assert!(drivers::mouse(&receiver).is_some());

    // Move the mouse or press a key during this window
    std::thread::sleep(Duration::from_secs(3));
    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        kinds.push(event.device_type);
    }
    println!("received {} events: {:?}", kinds.len(), kinds);
    assert!(kinds.iter().all(|k| matches!(
        k,
        DeviceType::Keyboard | DeviceType::Mouse | DeviceType::Receiver
    )));

    assert!(controller.detach(&info.path));
    assert!(receiver.is_destroyed());
}

#[test]
#[ignore] // requires hardware
fn receiver_accepts_raw_output_report() {
    let (discovery, _controller, _events) = setup();
    let info = discovery
        .list_connections()
        .unwrap()
        .into_iter()
        .find(|c| c.id == device_ids::MX5500_RECEIVER)
        .expect("No MX5500 receiver found, plug one in");
    let connection = discovery.open(&info).unwrap();

    // Short register read of register 0x00 on the receiver itself
    let report = [0x10, 0xFF, 0x81, 0x00, 0x00, 0x00, 0x00];
    match connection.send_raw_report(&report) {
        Ok(written) => assert_eq!(written, report.len()),
        Err(TransportError::NoOutputPath) => panic!("receiver reported no output path"),
        Err(e) => panic!("send failed: {e}"),
    }
}
