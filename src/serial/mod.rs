pub mod engine;
pub mod interface;
pub mod mock;
pub mod payload;
pub mod session;

pub use engine::{DataSink, EngineEvent, HexLogSink, IoStats};
pub use interface::SerialportTransport;
pub use payload::{PayloadSource, SensorJsonPayload};
pub use session::{SerialSession, SessionBuilder, SessionState};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::device::{DeviceDescriptor, MatchError};

pub const BAUD_RATE: u32 = 115200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    None,
    Odd,
    Even,
}

/// Serial line configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineParameters {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
}

impl LineParameters {
    /// 115200 8N1. The link never uses anything else.
    pub const FIXED: LineParameters = LineParameters {
        baud_rate: BAUD_RATE,
        data_bits: 8,
        stop_bits: 1,
        parity: Parity::None,
    };
}

#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device unavailable: {0}")]
    Unavailable(String),

    #[error("No port {index} on device ({available} available)")]
    NoSuchPort { index: usize, available: usize },

    #[error("Unsupported line parameters: {0}")]
    Unsupported(String),

    #[error("Communication timeout")]
    Timeout,

    #[error("Port closed")]
    Closed,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialport error: {0}")]
    SerialportError(#[from] serialport::Error),
}

pub type Result<T> = std::result::Result<T, SerialError>;

/// Errors surfaced by the session lifecycle and the I/O engine
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no driver for device")]
    NoDriver,

    #[error("not enough ports at device (available {available}, required {required})")]
    PortShortage { available: usize, required: usize },

    #[error("permission denied for {0}")]
    PermissionDenied(String),

    #[error("open failed: {0}")]
    OpenIo(#[source] SerialError),

    #[error("session already open")]
    AlreadyOpen,

    #[error("session not connected")]
    NotConnected,

    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),

    #[error("write failed: {0}")]
    WriteIo(#[source] SerialError),

    #[error("{0}")]
    TransportFatal(#[source] SerialError),
}

impl From<MatchError> for SessionError {
    fn from(err: MatchError) -> Self {
        match err {
            MatchError::NoDriver => SessionError::NoDriver,
            MatchError::PortShortage {
                available,
                required,
            } => SessionError::PortShortage {
                available,
                required,
            },
        }
    }
}

impl SessionError {
    /// Classify a failed tick write
    pub fn from_write(err: SerialError, timeout: Duration) -> Self {
        match err {
            SerialError::Timeout => SessionError::WriteTimeout(timeout),
            other => SessionError::WriteIo(other),
        }
    }

    /// Human-readable status line for a failed open
    pub fn status_text(&self) -> String {
        match self {
            SessionError::NoDriver => "connection failed: no driver for device".to_string(),
            SessionError::PortShortage { .. } => {
                "connection failed: not enough ports at device".to_string()
            }
            SessionError::PermissionDenied(_) => "permission denied".to_string(),
            SessionError::OpenIo(SerialError::Unavailable(_)) => "open failed".to_string(),
            SessionError::OpenIo(cause) => format!("connection failed: {}", cause),
            SessionError::TransportFatal(cause) => format!("connection lost: {}", cause),
            SessionError::WriteTimeout(_) | SessionError::WriteIo(_) => "noWrite".to_string(),
            other => other.to_string(),
        }
    }
}

/// Access to the attached USB serial devices
pub trait UsbTransport: Send + Sync {
    fn list_devices(&self) -> Result<Vec<DeviceDescriptor>>;

    /// Request a connection to `device`.
    ///
    /// Fails with [`SerialError::PermissionDenied`] when the host refuses
    /// access and [`SerialError::Unavailable`] when the device cannot be
    /// opened for any other reason.
    fn open_device(&self, device: &DeviceDescriptor) -> Result<Box<dyn DeviceConnection>>;
}

/// An open connection to a device, before any port is claimed
pub trait DeviceConnection: Send {
    fn open_port(self: Box<Self>, index: usize) -> Result<Arc<dyn PortHandle>>;
}

/// One opened serial port.
///
/// Reads and writes may run concurrently from different tasks. Writes are not
/// serialised by the handle itself. `close` is idempotent.
#[async_trait]
pub trait PortHandle: Send + Sync {
    fn name(&self) -> &str;

    async fn set_line_parameters(&self, params: LineParameters) -> Result<()>;

    async fn write(&self, data: &[u8], timeout: Duration) -> Result<usize>;

    /// Read whatever is available, up to `max_len` bytes. An expired timeout
    /// yields either an empty buffer or [`SerialError::Timeout`].
    async fn read(&self, max_len: usize, timeout: Duration) -> Result<Vec<u8>>;

    async fn close(&self) -> Result<()>;
}
