//! Common types for the transport layer

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Bus a physical connection was enumerated on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bus {
    Usb,
    Bluetooth,
    I2c,
    Spi,
    Unknown,
}

impl Bus {
    /// Short lowercase name used in logs and config files
    pub fn name(&self) -> &'static str {
        match self {
            Bus::Usb => "usb",
            Bus::Bluetooth => "bluetooth",
            Bus::I2c => "i2c",
            Bus::Spi => "spi",
            Bus::Unknown => "unknown",
        }
    }
}

impl From<hidapi::BusType> for Bus {
    fn from(bus: hidapi::BusType) -> Self {
        match bus {
            hidapi::BusType::Usb => Bus::Usb,
            hidapi::BusType::Bluetooth => Bus::Bluetooth,
            hidapi::BusType::I2c => Bus::I2c,
            hidapi::BusType::Spi => Bus::Spi,
            _ => Bus::Unknown,
        }
    }
}

impl FromStr for Bus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "usb" => Ok(Bus::Usb),
            "bluetooth" | "bt" => Ok(Bus::Bluetooth),
            "i2c" => Ok(Bus::I2c),
            "spi" => Ok(Bus::Spi),
            other => Err(format!("Unknown bus: {other}")),
        }
    }
}

/// Identity triple of a physical connection (bus, vendor, product)
///
/// Drivers are matched against connections by exact equality of all three
/// fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId {
    pub bus: Bus,
    pub vendor: u16,
    pub product: u16,
}

impl DeviceId {
    pub const fn new(bus: Bus, vendor: u16, product: u16) -> Self {
        Self {
            bus,
            vendor,
            product,
        }
    }

    /// USB device identity
    pub const fn usb(vendor: u16, product: u16) -> Self {
        Self::new(Bus::Usb, vendor, product)
    }

    /// Bluetooth device identity
    pub const fn bluetooth(vendor: u16, product: u16) -> Self {
        Self::new(Bus::Bluetooth, vendor, product)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{:04X}:{:04X}",
            self.bus.name(),
            self.vendor,
            self.product
        )
    }
}

/// Parses `bus:VVVV:PPPP` with hexadecimal vendor and product
impl FromStr for DeviceId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 3 {
            return Err(format!("Expected bus:vendor:product, got \"{s}\""));
        }
        let bus = parts[0].parse()?;
        let hex = |p: &str| {
            let p = p.strip_prefix("0x").unwrap_or(p);
            u16::from_str_radix(p, 16).map_err(|e| format!("Invalid id \"{p}\": {e}"))
        };
        Ok(Self::new(bus, hex(parts[1])?, hex(parts[2])?))
    }
}

/// Description of one physical connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    /// Identity triple used for driver matching
    pub id: DeviceId,
    /// Device path or identifier (transport-specific, unique per connection)
    pub path: String,
    /// USB interface number, -1 when not applicable
    pub interface_number: i32,
    /// Serial number if available
    pub serial: Option<String>,
    /// Product name if available
    pub product_name: Option<String>,
}

impl ConnectionInfo {
    pub fn new(id: DeviceId, path: impl Into<String>) -> Self {
        Self {
            id,
            path: path.into(),
            interface_number: -1,
            serial: None,
            product_name: None,
        }
    }

    pub(crate) fn from_hidapi(device_info: &hidapi::DeviceInfo) -> Self {
        Self {
            id: DeviceId::new(
                Bus::from(device_info.bus_type()),
                device_info.vendor_id(),
                device_info.product_id(),
            ),
            path: device_info.path().to_string_lossy().to_string(),
            interface_number: device_info.interface_number(),
            serial: device_info.serial_number().map(|s| s.to_string()),
            product_name: device_info.product_string().map(|s| s.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_display() {
        let id = DeviceId::usb(0x046D, 0xC71C);
        assert_eq!(id.to_string(), "usb:046D:C71C");
    }

    #[test]
    fn test_device_id_parse() {
        let id: DeviceId = "bt:046d:b30b".parse().unwrap();
        assert_eq!(id, DeviceId::bluetooth(0x046D, 0xB30B));

        let id: DeviceId = "usb:0x046D:0xC71C".parse().unwrap();
        assert_eq!(id, DeviceId::usb(0x046D, 0xC71C));
    }

    #[test]
    fn test_device_id_parse_rejects_garbage() {
        assert!("usb:046d".parse::<DeviceId>().is_err());
        assert!("serial:046d:c71c".parse::<DeviceId>().is_err());
        assert!("usb:zzzz:c71c".parse::<DeviceId>().is_err());
    }
}
