pub mod matcher;
pub mod models;
pub mod port_monitor;
pub mod registry;

pub use matcher::find_port;
pub use models::*;
pub use port_monitor::{DeviceEvent, DeviceMonitor, PollingDeviceMonitor};
pub use registry::DriverRegistry;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatchError {
    #[error("no driver for device")]
    NoDriver,

    #[error("not enough ports at device (available {available}, required {required})")]
    PortShortage { available: usize, required: usize },
}

pub type Result<T> = std::result::Result<T, MatchError>;
