use serial_link::device::{
    find_port, ChipFamily, DeviceDescriptor, DriverProfile, DriverRegistry, MatchError,
};

#[test]
fn empty_device_list_has_no_driver() {
    let registry = DriverRegistry::default_table();
    assert_eq!(find_port(&[], &registry).unwrap_err(), MatchError::NoDriver);
}

#[test]
fn unregistered_devices_have_no_driver() {
    let registry = DriverRegistry::default_table();
    let devices = vec![
        DeviceDescriptor::new("/dev/ttyUSB0", 0xffff, 0xffff),
        DeviceDescriptor::new("/dev/ttyUSB1", 0x16d0, 0x0001),
    ];
    assert_eq!(find_port(&devices, &registry).unwrap_err(), MatchError::NoDriver);
}

#[test]
fn every_custom_pair_matches() {
    let registry = DriverRegistry::default_table();
    for (vid, pid) in [(0x16d0, 0x087e), (0x04d8, 0x00df), (0x1a86, 0x5523)] {
        let device = DeviceDescriptor::new("/dev/ttyACM0", vid, pid);
        let selection = find_port(std::slice::from_ref(&device), &registry)
            .unwrap_or_else(|e| panic!("{:04x}:{:04x} did not match: {}", vid, pid, e));
        assert_eq!(selection.device, device);
        assert_eq!(selection.profile.vendor_id, vid);
        assert_eq!(selection.profile.product_id, pid);
    }
}

#[test]
fn digispark_is_a_single_port_cdc_device() {
    let registry = DriverRegistry::default_table();
    let device = DeviceDescriptor::new("/dev/ttyACM0", 0x16d0, 0x087e);
    let selection = find_port(&[device], &registry).expect("match");
    assert_eq!(selection.profile.family, ChipFamily::CdcAcm);
    assert_eq!(selection.port_count, 1);
    assert_eq!(selection.port_index, 0);
}

#[test]
fn registering_the_same_pair_twice_is_idempotent() {
    let mut registry = DriverRegistry::new();
    registry.register_family(0x16d0, 0x087e, ChipFamily::CdcAcm);
    let once = registry.clone();
    registry.register_family(0x16d0, 0x087e, ChipFamily::CdcAcm);

    assert_eq!(registry.len(), once.len());
    let device = DeviceDescriptor::new("/dev/ttyACM0", 0x16d0, 0x087e);
    assert_eq!(
        find_port(&[device.clone()], &registry).expect("match"),
        find_port(&[device], &once).expect("match"),
    );
}

#[test]
fn first_matching_device_wins() {
    let registry = DriverRegistry::default_table();
    let devices = vec![
        DeviceDescriptor::new("/dev/ttyUSB9", 0xffff, 0xffff),
        DeviceDescriptor::new("/dev/ttyUSB0", 0x1a86, 0x7523),
        DeviceDescriptor::new("/dev/ttyACM0", 0x16d0, 0x087e),
    ];
    let selection = find_port(&devices, &registry).expect("match");
    assert_eq!(selection.device.id.as_str(), "/dev/ttyUSB0");
    assert_eq!(selection.profile.family, ChipFamily::Ch34x);
}

#[test]
fn multi_port_chip_reports_last_port_index() {
    // The index is where the port scan stopped, not the port that gets opened
    let registry = DriverRegistry::default_table();
    let device = DeviceDescriptor::new("/dev/ttyUSB0", 0x0403, 0x6011);
    let selection = find_port(&[device], &registry).expect("match");
    assert_eq!(selection.port_count, 4);
    assert_eq!(selection.port_index, 3);
}

#[test]
fn driver_without_ports_is_a_shortage() {
    let mut registry = DriverRegistry::new();
    registry.register(
        0x16d0,
        0x087e,
        DriverProfile::new(0x16d0, 0x087e, ChipFamily::CdcAcm).with_ports(0),
    );
    let device = DeviceDescriptor::new("/dev/ttyACM0", 0x16d0, 0x087e);
    assert!(matches!(
        find_port(&[device], &registry).unwrap_err(),
        MatchError::PortShortage { available: 0, .. }
    ));
}
