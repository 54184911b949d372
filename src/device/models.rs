use std::fmt;

use serde::{Deserialize, Serialize};

/// Transport-level identity of an attached device.
///
/// For the serialport transport this is the port name (`/dev/ttyACM0`, `COM4`),
/// for other transports it is whatever the transport uses to open the device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An attached USB device as reported by the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub id: DeviceId,
    pub vendor_id: u16,
    pub product_id: u16,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

impl DeviceDescriptor {
    pub fn new(id: impl Into<String>, vendor_id: u16, product_id: u16) -> Self {
        Self {
            id: DeviceId::new(id),
            vendor_id,
            product_id,
            serial_number: None,
            manufacturer: None,
            product: None,
        }
    }

    /// `vid:pid` in the usual lowercase hex notation
    pub fn usb_id(&self) -> String {
        format!("{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

/// USB-serial chip families with a known driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChipFamily {
    CdcAcm,
    Ch34x,
    Cp21xx,
    Ftdi,
    Prolific,
}

impl ChipFamily {
    /// Number of logical serial ports a chip of this family exposes
    pub fn port_count(&self, product_id: u16) -> usize {
        match (self, product_id) {
            (ChipFamily::Ftdi, 0x6010) => 2, // FT2232
            (ChipFamily::Ftdi, 0x6011) => 4, // FT4232
            (ChipFamily::Cp21xx, 0xea70) => 2, // CP2105
            (ChipFamily::Cp21xx, 0xea71) => 4, // CP2108
            _ => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChipFamily::CdcAcm => "cdc_acm",
            ChipFamily::Ch34x => "ch34x",
            ChipFamily::Cp21xx => "cp21xx",
            ChipFamily::Ftdi => "ftdi",
            ChipFamily::Prolific => "prolific",
        }
    }
}

impl fmt::Display for ChipFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Binds a vendor/product identity to the driver able to open it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverProfile {
    pub vendor_id: u16,
    pub product_id: u16,
    pub family: ChipFamily,
    /// Pinned port count, overriding what the chip family reports
    pub pinned_ports: Option<usize>,
}

impl DriverProfile {
    pub fn new(vendor_id: u16, product_id: u16, family: ChipFamily) -> Self {
        Self {
            vendor_id,
            product_id,
            family,
            pinned_ports: None,
        }
    }

    pub fn with_ports(mut self, ports: usize) -> Self {
        self.pinned_ports = Some(ports);
        self
    }

    pub fn port_count(&self, device: &DeviceDescriptor) -> usize {
        self.pinned_ports
            .unwrap_or_else(|| self.family.port_count(device.product_id))
    }

    /// Port references this driver offers on `device`, in port order
    pub fn ports(&self, device: &DeviceDescriptor) -> Vec<PortRef> {
        (0..self.port_count(device))
            .map(|index| PortRef {
                device: device.id.clone(),
                index,
            })
            .collect()
    }
}

/// One logical port on a device, not yet opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortRef {
    pub device: DeviceId,
    pub index: usize,
}

/// Result of a successful device match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSelection {
    pub device: DeviceDescriptor,
    pub profile: DriverProfile,
    pub port_count: usize,
    /// Index the scan settled on. Informational only: the session opens port 0.
    pub port_index: usize,
}
