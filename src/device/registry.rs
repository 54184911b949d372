use std::collections::HashMap;

use super::{ChipFamily, DeviceDescriptor, DriverProfile};

/// Vendor/product pairs handled by stock drivers
const KNOWN_CHIPS: &[(u16, u16, ChipFamily)] = &[
    (0x0403, 0x6001, ChipFamily::Ftdi), // FT232R
    (0x0403, 0x6010, ChipFamily::Ftdi), // FT2232
    (0x0403, 0x6011, ChipFamily::Ftdi), // FT4232
    (0x0403, 0x6014, ChipFamily::Ftdi), // FT232H
    (0x0403, 0x6015, ChipFamily::Ftdi), // FT230X
    (0x10c4, 0xea60, ChipFamily::Cp21xx), // CP2102
    (0x10c4, 0xea70, ChipFamily::Cp21xx), // CP2105
    (0x10c4, 0xea71, ChipFamily::Cp21xx), // CP2108
    (0x067b, 0x2303, ChipFamily::Prolific), // PL2303
    (0x1a86, 0x7523, ChipFamily::Ch34x), // CH340
    (0x1a86, 0x5523, ChipFamily::Ch34x), // CH341
];

/// Driver table keyed by (vendor id, product id)
#[derive(Debug, Clone, Default)]
pub struct DriverRegistry {
    profiles: HashMap<(u16, u16), DriverProfile>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stock chip drivers only
    pub fn with_known_chips() -> Self {
        let mut registry = Self::new();
        for &(vid, pid, family) in KNOWN_CHIPS {
            registry.register(vid, pid, DriverProfile::new(vid, pid, family));
        }
        registry
    }

    /// Boards that stock drivers do not recognise
    pub fn custom() -> Self {
        let mut registry = Self::new();
        registry.register_family(0x16d0, 0x087e, ChipFamily::CdcAcm); // Digispark CDC
        registry.register_family(0x16d0, 0x087e, ChipFamily::CdcAcm);
        registry.register_family(0x04d8, 0x00df, ChipFamily::CdcAcm); // MCP2200
        registry.register_family(0x1a86, 0x5523, ChipFamily::Ch34x); // CH341
        registry
    }

    /// Stock chips plus the custom board table
    pub fn default_table() -> Self {
        let mut registry = Self::with_known_chips();
        registry.extend(Self::custom());
        registry
    }

    /// Add or replace the profile for a vendor/product pair. Last write wins.
    pub fn register(&mut self, vendor_id: u16, product_id: u16, profile: DriverProfile) {
        if self.profiles.insert((vendor_id, product_id), profile).is_some() {
            log::debug!(
                "Replaced driver profile for {:04x}:{:04x}",
                vendor_id,
                product_id
            );
        }
    }

    pub fn register_family(&mut self, vendor_id: u16, product_id: u16, family: ChipFamily) {
        self.register(
            vendor_id,
            product_id,
            DriverProfile::new(vendor_id, product_id, family),
        );
    }

    pub fn extend(&mut self, other: DriverRegistry) {
        for ((vid, pid), profile) in other.profiles {
            self.register(vid, pid, profile);
        }
    }

    pub fn lookup(&self, device: &DeviceDescriptor) -> Option<DriverProfile> {
        self.profiles
            .get(&(device.vendor_id, device.product_id))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
