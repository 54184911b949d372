//! In-memory transport for exercising sessions without hardware
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::engine::DataSink;
use super::{DeviceConnection, LineParameters, PortHandle, Result, SerialError, UsbTransport};
use crate::device::{DeviceDescriptor, DeviceId};

const READ_POLL: Duration = Duration::from_millis(2);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
        .is_ok()
}

/// Behaviour applied to ports opened from a [`MockTransport`]
#[derive(Debug, Clone, Default)]
pub struct MockPortConfig {
    /// Time every write spends "on the wire" before completing
    pub write_delay: Duration,
    /// Time every read waits before looking for data
    pub read_delay: Duration,
    /// Number of leading writes that fail with a timeout
    pub write_timeouts: usize,
    /// Number of writes, after the timeouts, that fail with an I/O error
    pub write_errors: usize,
    /// Fail `set_line_parameters` with this message
    pub line_parameter_error: Option<String>,
    /// Fail `close` with this message. The port still ends up closed.
    pub close_error: Option<String>,
}

#[derive(Default)]
struct OpenFailures {
    denied: HashSet<DeviceId>,
    unavailable: HashSet<DeviceId>,
    broken: HashMap<DeviceId, String>,
}

/// Scriptable transport.
///
/// Devices are plugged and unplugged with [`MockTransport::attach`] and
/// [`MockTransport::detach`]; every opened port stays reachable through
/// [`MockTransport::ports`] for inspection.
#[derive(Default)]
pub struct MockTransport {
    devices: Mutex<Vec<DeviceDescriptor>>,
    failures: Mutex<OpenFailures>,
    port_config: Mutex<MockPortConfig>,
    opened: Arc<Mutex<Vec<Arc<MockPort>>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_devices(devices: Vec<DeviceDescriptor>) -> Self {
        let transport = Self::new();
        *lock(&transport.devices) = devices;
        transport
    }

    pub fn attach(&self, device: DeviceDescriptor) {
        lock(&self.devices).push(device);
    }

    pub fn detach(&self, id: &DeviceId) {
        lock(&self.devices).retain(|d| &d.id != id);
    }

    pub fn deny_permission(&self, id: &DeviceId) {
        lock(&self.failures).denied.insert(id.clone());
    }

    /// Opening the device yields no connection, without a permission problem
    pub fn make_unavailable(&self, id: &DeviceId) {
        lock(&self.failures).unavailable.insert(id.clone());
    }

    pub fn fail_open(&self, id: &DeviceId, message: &str) {
        lock(&self.failures)
            .broken
            .insert(id.clone(), message.to_string());
    }

    pub fn set_port_config(&self, config: MockPortConfig) {
        *lock(&self.port_config) = config;
    }

    /// Every port opened so far, oldest first
    pub fn ports(&self) -> Vec<Arc<MockPort>> {
        lock(&self.opened).clone()
    }

    pub fn last_port(&self) -> Option<Arc<MockPort>> {
        lock(&self.opened).last().cloned()
    }
}

impl UsbTransport for MockTransport {
    fn list_devices(&self) -> Result<Vec<DeviceDescriptor>> {
        Ok(lock(&self.devices).clone())
    }

    fn open_device(&self, device: &DeviceDescriptor) -> Result<Box<dyn DeviceConnection>> {
        {
            let failures = lock(&self.failures);
            if failures.denied.contains(&device.id) {
                return Err(SerialError::PermissionDenied(device.id.to_string()));
            }
            if failures.unavailable.contains(&device.id) {
                return Err(SerialError::Unavailable(device.id.to_string()));
            }
            if let Some(message) = failures.broken.get(&device.id) {
                return Err(SerialError::IoError(std::io::Error::other(message.clone())));
            }
        }

        Ok(Box::new(MockConnection {
            device: device.id.clone(),
            config: lock(&self.port_config).clone(),
            opened: Arc::clone(&self.opened),
        }))
    }
}

struct MockConnection {
    device: DeviceId,
    config: MockPortConfig,
    opened: Arc<Mutex<Vec<Arc<MockPort>>>>,
}

impl DeviceConnection for MockConnection {
    fn open_port(self: Box<Self>, index: usize) -> Result<Arc<dyn PortHandle>> {
        let port = Arc::new(MockPort::new(
            format!("{}#{}", self.device, index),
            self.config,
        ));
        lock(&self.opened).push(Arc::clone(&port));
        Ok(port)
    }
}

/// Port handed out by [`MockTransport`], with hooks to script and observe it
#[derive(Debug)]
pub struct MockPort {
    name: String,
    config: MockPortConfig,
    closed: AtomicBool,
    close_calls: AtomicUsize,
    line_parameters: Mutex<Option<LineParameters>>,
    written: Mutex<Vec<Vec<u8>>>,
    inbound: Mutex<VecDeque<Vec<u8>>>,
    fatal: Mutex<Option<String>>,
    write_timeouts_left: AtomicUsize,
    write_errors_left: AtomicUsize,
    write_calls: AtomicUsize,
    read_calls: AtomicUsize,
    writes_in_flight: AtomicUsize,
    max_writes_in_flight: AtomicUsize,
    io_after_close: AtomicUsize,
}

impl MockPort {
    fn new(name: String, config: MockPortConfig) -> Self {
        Self {
            name,
            write_timeouts_left: AtomicUsize::new(config.write_timeouts),
            write_errors_left: AtomicUsize::new(config.write_errors),
            config,
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
            line_parameters: Mutex::new(None),
            written: Mutex::new(Vec::new()),
            inbound: Mutex::new(VecDeque::new()),
            fatal: Mutex::new(None),
            write_calls: AtomicUsize::new(0),
            read_calls: AtomicUsize::new(0),
            writes_in_flight: AtomicUsize::new(0),
            max_writes_in_flight: AtomicUsize::new(0),
            io_after_close: AtomicUsize::new(0),
        }
    }

    /// Queue bytes for the next read
    pub fn push_inbound(&self, data: &[u8]) {
        lock(&self.inbound).push_back(data.to_vec());
    }

    /// Make the next read fail as if the device vanished
    pub fn raise_fatal(&self, message: &str) {
        *lock(&self.fatal) = Some(message.to_string());
    }

    pub fn fail_next_writes(&self, count: usize) {
        self.write_timeouts_left.store(count, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn line_parameters(&self) -> Option<LineParameters> {
        *lock(&self.line_parameters)
    }

    /// Successfully written buffers, in order
    pub fn written(&self) -> Vec<Vec<u8>> {
        lock(&self.written).clone()
    }

    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::SeqCst)
    }

    /// Highest number of writes ever observed running at once
    pub fn max_writes_in_flight(&self) -> usize {
        self.max_writes_in_flight.load(Ordering::SeqCst)
    }

    /// Reads or writes that started or finished after `close`
    pub fn io_after_close(&self) -> usize {
        self.io_after_close.load(Ordering::SeqCst)
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            self.io_after_close.fetch_add(1, Ordering::SeqCst);
            return Err(SerialError::Closed);
        }
        Ok(())
    }

    fn note_finished(&self) {
        if self.is_closed() {
            self.io_after_close.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn take_write_timeout(&self) -> bool {
        take_one(&self.write_timeouts_left)
    }

    fn take_write_error(&self) -> bool {
        take_one(&self.write_errors_left)
    }

    fn pop_inbound(&self, max_len: usize) -> Option<Vec<u8>> {
        let mut inbound = lock(&self.inbound);
        let mut chunk = inbound.pop_front()?;
        if chunk.len() > max_len {
            let rest = chunk.split_off(max_len);
            inbound.push_front(rest);
        }
        Some(chunk)
    }
}

#[async_trait]
impl PortHandle for MockPort {
    fn name(&self) -> &str {
        &self.name
    }

    async fn set_line_parameters(&self, params: LineParameters) -> Result<()> {
        self.check_open()?;
        if let Some(message) = &self.config.line_parameter_error {
            return Err(SerialError::IoError(std::io::Error::other(message.clone())));
        }
        *lock(&self.line_parameters) = Some(params);
        Ok(())
    }

    async fn write(&self, data: &[u8], timeout: Duration) -> Result<usize> {
        self.check_open()?;
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        let in_flight = self.writes_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_writes_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        if !self.config.write_delay.is_zero() {
            tokio::time::sleep(self.config.write_delay.min(timeout)).await;
        }

        let result = if self.take_write_timeout() {
            Err(SerialError::Timeout)
        } else if self.take_write_error() {
            Err(SerialError::IoError(std::io::Error::other("write rejected")))
        } else {
            lock(&self.written).push(data.to_vec());
            Ok(data.len())
        };

        self.writes_in_flight.fetch_sub(1, Ordering::SeqCst);
        self.note_finished();
        result
    }

    async fn read(&self, max_len: usize, timeout: Duration) -> Result<Vec<u8>> {
        self.check_open()?;
        self.read_calls.fetch_add(1, Ordering::SeqCst);

        if !self.config.read_delay.is_zero() {
            tokio::time::sleep(self.config.read_delay).await;
        }

        let deadline = tokio::time::Instant::now() + timeout;
        let result = loop {
            let fatal = lock(&self.fatal).take();
            if let Some(message) = fatal {
                break Err(SerialError::IoError(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    message,
                )));
            }
            if let Some(chunk) = self.pop_inbound(max_len.max(1)) {
                break Ok(chunk);
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                break Ok(Vec::new());
            }
            tokio::time::sleep(READ_POLL.min(deadline - now)).await;
        };

        self.note_finished();
        result
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        match &self.config.close_error {
            Some(message) => Err(SerialError::IoError(std::io::Error::other(message.clone()))),
            None => Ok(()),
        }
    }
}

/// Collects inbound chunks in delivery order
#[derive(Debug, Default)]
pub struct RecordingDataSink {
    chunks: Mutex<Vec<Vec<u8>>>,
}

impl RecordingDataSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunks(&self) -> Vec<Vec<u8>> {
        lock(&self.chunks).clone()
    }

    pub fn bytes(&self) -> Vec<u8> {
        lock(&self.chunks).concat()
    }
}

impl DataSink for RecordingDataSink {
    fn on_data(&self, data: &[u8]) {
        lock(&self.chunks).push(data.to_vec());
    }
}
