pub mod bridge;
pub mod config;
pub mod device;
pub mod logging;
pub mod serial;
pub mod status;

pub use bridge::{BridgeEvent, BridgeHandle, EventBridge};
pub use config::AppSettings;
pub use device::{DeviceDescriptor, DeviceEvent, DriverRegistry};
pub use serial::{SerialSession, SessionError, SessionState};
