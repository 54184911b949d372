use std::io::{Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serialport::{DataBits, FlowControl, SerialPort, SerialPortType, StopBits};

use super::{
    DeviceConnection, LineParameters, Parity, PortHandle, Result, SerialError, UsbTransport,
    BAUD_RATE,
};
use crate::device::{DeviceDescriptor, DeviceId};

const OPEN_TIMEOUT: Duration = Duration::from_millis(1000);

type SharedPort = Arc<Mutex<Option<Box<dyn SerialPort>>>>;

/// Transport over the host's serial port enumeration.
///
/// Each USB serial interface shows up as its own port, so every device
/// exposes exactly one port here.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialportTransport;

impl SerialportTransport {
    pub fn new() -> Self {
        Self
    }
}

impl UsbTransport for SerialportTransport {
    fn list_devices(&self) -> Result<Vec<DeviceDescriptor>> {
        let ports = serialport::available_ports()?;
        let mut devices = Vec::new();

        for port in ports {
            if let SerialPortType::UsbPort(usb_info) = port.port_type {
                devices.push(DeviceDescriptor {
                    id: DeviceId::new(port.port_name),
                    vendor_id: usb_info.vid,
                    product_id: usb_info.pid,
                    serial_number: usb_info.serial_number,
                    manufacturer: usb_info.manufacturer,
                    product: usb_info.product,
                });
            }
        }

        Ok(devices)
    }

    fn open_device(&self, device: &DeviceDescriptor) -> Result<Box<dyn DeviceConnection>> {
        let port_name = device.id.as_str();
        let port = serialport::new(port_name, BAUD_RATE)
            .timeout(OPEN_TIMEOUT)
            .open()
            .map_err(|e| classify_open_error(port_name, e))?;

        log::debug!("Opened device connection on {}", port_name);
        Ok(Box::new(SerialportConnection {
            port_name: port_name.to_string(),
            port,
        }))
    }
}

fn classify_open_error(port_name: &str, err: serialport::Error) -> SerialError {
    match err.kind() {
        serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
            SerialError::PermissionDenied(port_name.to_string())
        }
        serialport::ErrorKind::NoDevice => SerialError::Unavailable(port_name.to_string()),
        _ => SerialError::SerialportError(err),
    }
}

struct SerialportConnection {
    port_name: String,
    port: Box<dyn SerialPort>,
}

impl DeviceConnection for SerialportConnection {
    fn open_port(self: Box<Self>, index: usize) -> Result<Arc<dyn PortHandle>> {
        if index != 0 {
            return Err(SerialError::NoSuchPort {
                index,
                available: 1,
            });
        }

        // Separate handles so a blocked read never holds up a write
        let writer = self.port.try_clone()?;

        Ok(Arc::new(SerialportHandle {
            port_name: self.port_name,
            reader: Arc::new(Mutex::new(Some(self.port))),
            writer: Arc::new(Mutex::new(Some(writer))),
        }))
    }
}

/// Opened serial port; blocking calls run on the blocking thread pool
pub struct SerialportHandle {
    port_name: String,
    reader: SharedPort,
    writer: SharedPort,
}

fn lock(port: &Mutex<Option<Box<dyn SerialPort>>>) -> MutexGuard<'_, Option<Box<dyn SerialPort>>> {
    port.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn map_io(err: std::io::Error) -> SerialError {
    if err.kind() == std::io::ErrorKind::TimedOut {
        SerialError::Timeout
    } else {
        SerialError::IoError(err)
    }
}

fn join_error(err: tokio::task::JoinError) -> SerialError {
    SerialError::IoError(std::io::Error::other(err))
}

#[async_trait]
impl PortHandle for SerialportHandle {
    fn name(&self) -> &str {
        &self.port_name
    }

    async fn set_line_parameters(&self, params: LineParameters) -> Result<()> {
        let data_bits = match params.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            8 => DataBits::Eight,
            n => return Err(SerialError::Unsupported(format!("{} data bits", n))),
        };
        let stop_bits = match params.stop_bits {
            1 => StopBits::One,
            2 => StopBits::Two,
            n => return Err(SerialError::Unsupported(format!("{} stop bits", n))),
        };
        let parity = match params.parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        };

        let mut guard = lock(&self.writer);
        let port = guard.as_mut().ok_or(SerialError::Closed)?;
        port.set_baud_rate(params.baud_rate)?;
        port.set_data_bits(data_bits)?;
        port.set_stop_bits(stop_bits)?;
        port.set_parity(parity)?;
        port.set_flow_control(FlowControl::None)?;

        log::debug!(
            "{}: line parameters {} {}{:?}{}",
            self.port_name,
            params.baud_rate,
            params.data_bits,
            params.parity,
            params.stop_bits
        );
        Ok(())
    }

    async fn write(&self, data: &[u8], timeout: Duration) -> Result<usize> {
        let writer = Arc::clone(&self.writer);
        let data = data.to_vec();

        tokio::task::spawn_blocking(move || -> Result<usize> {
            let mut guard = lock(&writer);
            let port = guard.as_mut().ok_or(SerialError::Closed)?;
            port.set_timeout(timeout)?;
            port.write_all(&data).map_err(map_io)?;
            port.flush().map_err(map_io)?;
            Ok(data.len())
        })
        .await
        .map_err(join_error)?
    }

    async fn read(&self, max_len: usize, timeout: Duration) -> Result<Vec<u8>> {
        let reader = Arc::clone(&self.reader);

        tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
            let mut guard = lock(&reader);
            let port = guard.as_mut().ok_or(SerialError::Closed)?;
            port.set_timeout(timeout)?;

            let mut buffer = vec![0u8; max_len.max(1)];
            match port.read(&mut buffer) {
                Ok(n) => {
                    buffer.truncate(n);
                    Ok(buffer)
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Vec::new()),
                Err(e) => Err(SerialError::IoError(e)),
            }
        })
        .await
        .map_err(join_error)?
    }

    async fn close(&self) -> Result<()> {
        let had_reader = lock(&self.reader).take().is_some();
        let had_writer = lock(&self.writer).take().is_some();

        if had_reader || had_writer {
            log::info!("Closed serial port {}", self.port_name);
        }
        Ok(())
    }
}
