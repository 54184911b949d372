use super::{DeviceDescriptor, DriverRegistry, MatchError, PortSelection, Result};

/// Pick the device/driver/port to open from the attached devices.
///
/// Devices are scanned in the order given. The first device with a registered
/// driver wins and scanning stops. The port index is whatever the scan over
/// that driver's ports last reached, i.e. `ports - 1`; callers still open
/// port 0, so on multi-port chips the index does not name the opened port.
pub fn find_port(devices: &[DeviceDescriptor], registry: &DriverRegistry) -> Result<PortSelection> {
    let mut port_index = 0;

    let matched = devices.iter().find_map(|device| {
        registry.lookup(device).map(|profile| (device, profile))
    });

    let Some((device, profile)) = matched else {
        log::debug!("No registered driver among {} attached devices", devices.len());
        return Err(MatchError::NoDriver);
    };

    let ports = profile.ports(device);
    for port in &ports {
        port_index = port.index;
    }

    // Port 0 is what gets opened, so an empty port list is a shortage as well.
    if ports.len() < port_index || ports.is_empty() {
        return Err(MatchError::PortShortage {
            available: ports.len(),
            required: port_index.max(1),
        });
    }

    log::info!(
        "Matched {} ({}) with {} driver, {} port(s)",
        device.id,
        device.usb_id(),
        profile.family,
        ports.len()
    );

    Ok(PortSelection {
        device: device.clone(),
        profile,
        port_count: ports.len(),
        port_index,
    })
}
