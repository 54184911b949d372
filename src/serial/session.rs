use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};

use super::engine::types::WriterToken;
use super::engine::{EngineContext, IoEngine};
use super::{
    DataSink, EngineEvent, HexLogSink, IoStats, LineParameters, PayloadSource, PortHandle,
    SensorJsonPayload, SerialError, SessionError, UsbTransport,
};
use crate::config::SessionSettings;
use crate::device::{find_port, DeviceDescriptor, DriverRegistry};
use crate::status::{LogStatusSink, StatusSink};

/// Connection state of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Closed,
    Opening,
    Connected,
    Closing,
}

/// Everything that exists only while connected
struct Link {
    generation: u64,
    device: DeviceDescriptor,
    port: Arc<dyn PortHandle>,
    writer: Arc<Mutex<WriterToken>>,
    engine: IoEngine,
}

enum Slot {
    Closed,
    Opening,
    Connected(Link),
    Closing,
}

impl Slot {
    fn state(&self) -> SessionState {
        match self {
            Slot::Closed => SessionState::Closed,
            Slot::Opening => SessionState::Opening,
            Slot::Connected(_) => SessionState::Connected,
            Slot::Closing => SessionState::Closing,
        }
    }
}

pub struct SessionBuilder {
    pub transport: Arc<dyn UsbTransport>,
    pub registry: Arc<DriverRegistry>,
    pub status: Arc<dyn StatusSink>,
    pub payload: Arc<dyn PayloadSource>,
    pub data_sink: Arc<dyn DataSink>,
    pub settings: SessionSettings,
}

impl SessionBuilder {
    pub fn new(transport: Arc<dyn UsbTransport>, registry: DriverRegistry) -> Self {
        Self {
            transport,
            registry: Arc::new(registry),
            status: Arc::new(LogStatusSink),
            payload: Arc::new(SensorJsonPayload::default()),
            data_sink: Arc::new(HexLogSink),
            settings: SessionSettings::default(),
        }
    }

    pub fn status_sink(mut self, status: Arc<dyn StatusSink>) -> Self {
        self.status = status;
        self
    }

    pub fn payload(mut self, payload: Arc<dyn PayloadSource>) -> Self {
        self.payload = payload;
        self
    }

    pub fn data_sink(mut self, data_sink: Arc<dyn DataSink>) -> Self {
        self.data_sink = data_sink;
        self
    }

    pub fn settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Build the session together with the receiving end of its engine events
    pub fn build(self) -> (SerialSession, mpsc::UnboundedReceiver<EngineEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let session = SerialSession {
            transport: self.transport,
            registry: self.registry,
            status: self.status,
            payload: self.payload,
            data_sink: self.data_sink,
            settings: self.settings,
            events_tx,
            slot: StdMutex::new(Slot::Closed),
            lifecycle: Mutex::new(()),
            generation: AtomicU64::new(0),
        };
        (session, events_rx)
    }
}

/// The one serial session of the process.
///
/// Open and close are serialised against each other; state queries never
/// wait on them.
pub struct SerialSession {
    transport: Arc<dyn UsbTransport>,
    registry: Arc<DriverRegistry>,
    status: Arc<dyn StatusSink>,
    payload: Arc<dyn PayloadSource>,
    data_sink: Arc<dyn DataSink>,
    settings: SessionSettings,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
    slot: StdMutex<Slot>,
    lifecycle: Mutex<()>,
    generation: AtomicU64,
}

impl SerialSession {
    pub fn builder(transport: Arc<dyn UsbTransport>, registry: DriverRegistry) -> SessionBuilder {
        SessionBuilder::new(transport, registry)
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> SessionState {
        self.slot().state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Generation of the live connection, if any
    pub fn generation(&self) -> Option<u64> {
        match &*self.slot() {
            Slot::Connected(link) => Some(link.generation),
            _ => None,
        }
    }

    pub fn connected_device(&self) -> Option<DeviceDescriptor> {
        match &*self.slot() {
            Slot::Connected(link) => Some(link.device.clone()),
            _ => None,
        }
    }

    pub fn stats(&self) -> Option<IoStats> {
        match &*self.slot() {
            Slot::Connected(link) => Some(link.engine.stats()),
            _ => None,
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Find a matching device, open port 0 at 115200 8N1 and start the loops.
    ///
    /// Fails with [`SessionError::AlreadyOpen`] unless the session is closed.
    /// Every other failure leaves the session closed and is reported to the
    /// status sink before returning.
    pub async fn open(&self) -> Result<(), SessionError> {
        let _lifecycle = self.lifecycle.lock().await;

        {
            let mut slot = self.slot();
            if !matches!(*slot, Slot::Closed) {
                log::debug!("Open rejected, session is {:?}", slot.state());
                return Err(SessionError::AlreadyOpen);
            }
            *slot = Slot::Opening;
        }

        match self.establish().await {
            Ok(link) => {
                log::info!(
                    "Session {} connected to {} ({})",
                    link.generation,
                    link.device.id,
                    link.device.usb_id()
                );
                *self.slot() = Slot::Connected(link);
                self.status.status("connected");
                Ok(())
            }
            Err(e) => {
                log::error!("Connection failed: {}", e);
                *self.slot() = Slot::Closed;
                self.status.status(&e.status_text());
                Err(e)
            }
        }
    }

    async fn establish(&self) -> Result<Link, SessionError> {
        let devices = self.transport.list_devices().map_err(SessionError::OpenIo)?;
        let selection = find_port(&devices, &self.registry)?;

        self.status.status("opening");
        let device = selection.device;

        let connection = self.transport.open_device(&device).map_err(|e| match e {
            SerialError::PermissionDenied(_) => {
                SessionError::PermissionDenied(device.id.to_string())
            }
            other => SessionError::OpenIo(other),
        })?;

        // Port 0 regardless of selection.port_index
        let port = connection.open_port(0).map_err(SessionError::OpenIo)?;

        if let Err(e) = port.set_line_parameters(LineParameters::FIXED).await {
            if let Err(close_err) = port.close().await {
                log::warn!("Closing {} after failed configure: {}", port.name(), close_err);
            }
            return Err(SessionError::OpenIo(e));
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let writer = Arc::new(Mutex::new(WriterToken { open: true }));
        let engine = IoEngine::start(EngineContext {
            generation,
            port: Arc::clone(&port),
            writer: Arc::clone(&writer),
            payload: Arc::clone(&self.payload),
            data_sink: Arc::clone(&self.data_sink),
            events: self.events_tx.clone(),
            settings: self.settings.clone(),
        });

        Ok(Link {
            generation,
            device,
            port,
            writer,
            engine,
        })
    }

    /// Write bytes outside the tick cadence, serialised with the write loop
    pub async fn write(&self, data: &[u8]) -> Result<usize, SessionError> {
        let (port, writer) = match &*self.slot() {
            Slot::Connected(link) => (Arc::clone(&link.port), Arc::clone(&link.writer)),
            _ => return Err(SessionError::NotConnected),
        };

        let token = writer.lock().await;
        if !token.open {
            return Err(SessionError::NotConnected);
        }
        let timeout = self.settings.write_timeout();
        port.write(data, timeout)
            .await
            .map_err(|e| SessionError::from_write(e, timeout))
    }

    /// Tear down the connection if there is one. Never fails; a no-op when
    /// already closed.
    pub async fn close(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        if let Some(link) = self.take_link(|_| true) {
            self.teardown(link).await;
        }
    }

    /// Close only if `generation` is still the live connection.
    ///
    /// Returns whether a connection was torn down.
    pub async fn close_generation(&self, generation: u64) -> bool {
        let _lifecycle = self.lifecycle.lock().await;
        match self.take_link(|link| link.generation == generation) {
            Some(link) => {
                self.teardown(link).await;
                true
            }
            None => {
                log::debug!("Ignoring close for stale session {}", generation);
                false
            }
        }
    }

    /// Move a matching live link out, leaving the slot in `Closing`
    fn take_link(&self, matches: impl Fn(&Link) -> bool) -> Option<Link> {
        let mut slot = self.slot();
        match std::mem::replace(&mut *slot, Slot::Closing) {
            Slot::Connected(link) if matches(&link) => Some(link),
            other => {
                *slot = other;
                None
            }
        }
    }

    async fn teardown(&self, link: Link) {
        self.status.status("disconnecting");

        // Loops first, so nothing touches the port once it is closed
        let stats = link.engine.shutdown().await;

        {
            let mut token = link.writer.lock().await;
            token.open = false;
            if let Err(e) = link.port.close().await {
                log::warn!("Error closing {}: {}", link.port.name(), e);
            }
        }

        log::info!(
            "Session {} closed: {} ticks, {} bytes written, {} write failures, {} bytes read",
            link.generation,
            stats.write_ticks,
            stats.bytes_written,
            stats.write_failures,
            stats.bytes_read
        );

        *self.slot() = Slot::Closed;
        self.status.status("disconnected");
    }
}
