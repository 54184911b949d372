#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use serial_link::config::SessionSettings;
use serial_link::device::{DeviceDescriptor, DriverRegistry};
use serial_link::serial::mock::{MockPortConfig, MockTransport, RecordingDataSink};
use serial_link::serial::{EngineEvent, PayloadSource, SerialSession};
use serial_link::status::RecordingStatusSink;

pub fn digispark() -> DeviceDescriptor {
    DeviceDescriptor::new("/dev/ttyACM0", 0x16d0, 0x087e)
}

pub fn unknown_device() -> DeviceDescriptor {
    DeviceDescriptor::new("/dev/ttyUSB9", 0xffff, 0xffff)
}

/// Short timeouts so shutdown in tests is quick
pub fn fast_settings() -> SessionSettings {
    SessionSettings {
        write_interval_ms: 5,
        write_timeout_ms: 200,
        read_timeout_ms: 20,
        read_buffer_size: 64,
    }
}

pub struct Harness {
    pub transport: Arc<MockTransport>,
    pub status: Arc<RecordingStatusSink>,
    pub data: Arc<RecordingDataSink>,
    pub session: Arc<SerialSession>,
    pub events: mpsc::UnboundedReceiver<EngineEvent>,
}

pub fn harness(devices: Vec<DeviceDescriptor>) -> Harness {
    harness_with(devices, MockPortConfig::default(), Arc::new(|| b"tick".to_vec()))
}

pub fn harness_with(
    devices: Vec<DeviceDescriptor>,
    config: MockPortConfig,
    payload: Arc<dyn PayloadSource>,
) -> Harness {
    let transport = Arc::new(MockTransport::with_devices(devices));
    transport.set_port_config(config);
    let status = Arc::new(RecordingStatusSink::new());
    let data = Arc::new(RecordingDataSink::new());

    let registry = DriverRegistry::default_table();
    let (session, events) = SerialSession::builder(transport.clone(), registry)
        .status_sink(status.clone())
        .data_sink(data.clone())
        .payload(payload)
        .settings(fast_settings())
        .build();

    Harness {
        transport,
        status,
        data,
        session: Arc::new(session),
        events,
    }
}

/// Poll `condition` until it holds, failing the test after two seconds
pub async fn wait_until<F>(what: &str, condition: F)
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
