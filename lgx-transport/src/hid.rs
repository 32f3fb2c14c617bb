//! hidapi-backed physical connection

use hidapi::{HidApi, HidDevice, HidError};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::TransportError;
use crate::reader::{DeliveryThread, ReaderConfig};
use crate::types::{Bus, ConnectionInfo};
use crate::{Connection, RawEventHandler};

/// Largest report descriptor the HID specification allows
const MAX_REPORT_DESCRIPTOR_SIZE: usize = 4096;

/// Input side of the connection: either parked (not delivering) or owned by
/// a running reader thread.
enum Delivery {
    Idle(HidDevice),
    Running(DeliveryThread),
    /// The reader thread did not hand the device back
    Lost,
}

/// One hidraw node opened through hidapi
///
/// Two handles are opened on the same path: one for output reports and
/// feature requests, one moved into the reader thread while delivery runs.
pub struct HidConnection {
    info: ConnectionInfo,
    output: Mutex<HidDevice>,
    delivery: Mutex<Delivery>,
    max_report_size: usize,
}

impl HidConnection {
    /// Open the hidraw node described by `device_info`
    pub fn open(
        api: &HidApi,
        device_info: &hidapi::DeviceInfo,
        max_report_size: usize,
    ) -> Result<Self, TransportError> {
        let output = device_info.open_device(api)?;
        let input = device_info.open_device(api)?;

        let info = ConnectionInfo::from_hidapi(device_info);

        info!("Opened {} at {}", info.id, info.path);

        Ok(Self {
            info,
            output: Mutex::new(output),
            delivery: Mutex::new(Delivery::Idle(input)),
            max_report_size,
        })
    }

    fn reader_config(&self) -> ReaderConfig {
        let name = format!("{:04x}:{:04x}", self.info.id.vendor, self.info.id.product);
        let mut config = match self.info.id.bus {
            Bus::Bluetooth => ReaderConfig::bluetooth(name),
            _ => ReaderConfig::usb(name),
        };
        config.max_report_size = self.max_report_size;
        config
    }
}

impl Connection for HidConnection {
    fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    fn parse_descriptors(&self) -> Result<(), TransportError> {
        let mut buf = vec![0u8; MAX_REPORT_DESCRIPTOR_SIZE];
        let len = self.output.lock().get_report_descriptor(&mut buf)?;
        if len == 0 {
            return Err(TransportError::DescriptorParse(format!(
                "empty report descriptor on {}",
                self.info.path
            )));
        }
        debug!("{}: report descriptor is {} bytes", self.info.path, len);
        Ok(())
    }

    fn start_delivery(&self, handler: RawEventHandler) -> Result<(), TransportError> {
        let mut delivery = self.delivery.lock();
        let device = match std::mem::replace(&mut *delivery, Delivery::Lost) {
            Delivery::Idle(device) => device,
            Delivery::Running(thread) => {
                *delivery = Delivery::Running(thread);
                return Err(TransportError::AlreadyStarted);
            }
            Delivery::Lost => return Err(TransportError::Disconnected),
        };
        // A failed spawn drops the input handle; the connection can no
        // longer deliver and stays `Lost`.
        let thread = DeliveryThread::spawn(device, handler, self.reader_config())?;
        *delivery = Delivery::Running(thread);
        Ok(())
    }

    fn stop_delivery(&self) {
        let mut delivery = self.delivery.lock();
        if !matches!(*delivery, Delivery::Running(_)) {
            return;
        }
        if let Delivery::Running(thread) = std::mem::replace(&mut *delivery, Delivery::Lost) {
            match thread.stop() {
                Some(device) => *delivery = Delivery::Idle(device),
                None => debug!("{}: input handle lost on stop", self.info.path),
            }
        }
    }

    fn send_raw_report(&self, data: &[u8]) -> Result<usize, TransportError> {
        let device = self.output.lock();
        match device.write(data) {
            Ok(written) => Ok(written),
            Err(e) if is_unsupported(&e) => {
                // The device has no interrupt OUT path. The fallback would be
                // an output-type SET_REPORT; hidapi only exposes the feature
                // variant, so that is the closest request available.
                debug!(
                    "{}: output report unsupported ({}), retrying as SET_REPORT",
                    self.info.path, e
                );
                match device.send_feature_report(data) {
                    Ok(()) => Ok(data.len()),
                    Err(e) if is_unsupported(&e) => Err(TransportError::NoOutputPath),
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Errno texts meaning the request type is not implemented by the device or
/// its transport (ENOSYS, EOPNOTSUPP)
const UNSUPPORTED_ERRORS: &[&str] = &["Function not implemented", "not supported"];

/// Check if a hidapi error means "this kind of request is unsupported"
/// rather than an I/O failure
fn is_unsupported(e: &HidError) -> bool {
    let msg = e.to_string();
    UNSUPPORTED_ERRORS.iter().any(|s| msg.contains(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hid_error(message: &str) -> HidError {
        HidError::HidApiError {
            message: message.to_string(),
        }
    }

    #[test]
    fn test_only_unsupported_errors_fall_back() {
        assert!(is_unsupported(&hid_error("Function not implemented")));
        assert!(is_unsupported(&hid_error("Operation not supported")));
        assert!(!is_unsupported(&hid_error("Broken pipe")));
        assert!(!is_unsupported(&hid_error("No such device")));
        assert!(!is_unsupported(&hid_error("Permission denied")));
    }
}
