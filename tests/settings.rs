use std::time::Duration;

use serial_link::config::ConfigError;
use serial_link::device::{find_port, ChipFamily, DeviceDescriptor};
use serial_link::AppSettings;

#[test]
fn full_settings_file_parses() {
    let text = r#"
log_level = "debug"

[session]
write_interval_ms = 10
write_timeout_ms = 500
read_timeout_ms = 250
read_buffer_size = 512

[monitor]
poll_interval_ms = 100

[registry]
include_known_chips = false

[[registry.extra]]
vid = 0x2341
pid = 0x0043
family = "cdc_acm"

[[registry.extra]]
vid = 0x0403
pid = 0x6011
family = "ftdi"
ports = 2
"#;
    let settings = AppSettings::from_toml_str(text).expect("parse");
    assert_eq!(settings.log_level, "debug");
    assert_eq!(settings.session.write_interval(), Duration::from_millis(10));
    assert_eq!(settings.session.write_timeout(), Duration::from_millis(500));
    assert_eq!(settings.session.read_timeout(), Duration::from_millis(250));
    assert_eq!(settings.session.read_buffer_size, 512);
    assert_eq!(settings.monitor.poll_interval(), Duration::from_millis(100));

    let registry = settings.registry.build_registry();
    // Custom boards plus two extras, no stock chips
    assert!(registry
        .lookup(&DeviceDescriptor::new("a", 0x10c4, 0xea60))
        .is_none());

    let uno = DeviceDescriptor::new("/dev/ttyACM0", 0x2341, 0x0043);
    let selection = find_port(&[uno], &registry).expect("extra profile");
    assert_eq!(selection.profile.family, ChipFamily::CdcAcm);

    let quad = DeviceDescriptor::new("/dev/ttyUSB0", 0x0403, 0x6011);
    assert_eq!(find_port(&[quad], &registry).expect("pinned").port_count, 2);
}

#[test]
fn partial_sections_keep_defaults() {
    let text = "[session]\nwrite_timeout_ms = 100\n";
    let settings = AppSettings::from_toml_str(text).expect("parse");
    assert_eq!(settings.session.write_timeout(), Duration::from_millis(100));
    assert_eq!(settings.session.read_timeout(), Duration::from_millis(2500));
    assert_eq!(settings.monitor.poll_interval(), Duration::from_millis(500));
    assert!(settings.registry.include_known_chips);
}

#[test]
fn unknown_family_is_a_parse_error() {
    let text = "[[registry.extra]]\nvid = 1\npid = 2\nfamily = \"usb_magic\"\n";
    assert!(matches!(
        AppSettings::from_toml_str(text),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn missing_file_is_a_read_error() {
    let err = AppSettings::load(std::path::Path::new("/nonexistent/serial-link.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
}
