//! Routes attach/detach notifications and engine reports into the session.
//!
//! Every input is turned into a [`BridgeEvent`] and applied by
//! [`EventBridge::handle`], one at a time, so lifecycle calls never overlap
//! and status lines come out in the order the events were handled.
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::device::{DeviceDescriptor, DeviceEvent, DeviceId};
use crate::serial::{EngineEvent, SerialError, SerialSession, SessionError};
use crate::status::StatusSink;

#[derive(Debug)]
pub enum BridgeEvent {
    Device(DeviceEvent),
    Engine(EngineEvent),
    Shutdown,
}

impl From<DeviceEvent> for BridgeEvent {
    fn from(event: DeviceEvent) -> Self {
        BridgeEvent::Device(event)
    }
}

impl From<EngineEvent> for BridgeEvent {
    fn from(event: EngineEvent) -> Self {
        BridgeEvent::Engine(event)
    }
}

/// Tracks the one device of interest and drives the session for it
pub struct EventBridge {
    session: Arc<SerialSession>,
    status: Arc<dyn StatusSink>,
    tracked: Option<DeviceDescriptor>,
}

impl EventBridge {
    pub fn new(session: Arc<SerialSession>, status: Arc<dyn StatusSink>) -> Self {
        Self {
            session,
            status,
            tracked: None,
        }
    }

    pub fn session(&self) -> &Arc<SerialSession> {
        &self.session
    }

    pub fn tracked_device(&self) -> Option<&DeviceDescriptor> {
        self.tracked.as_ref()
    }

    /// Apply one event. Returns `false` once the bridge has shut down.
    pub async fn handle(&mut self, event: BridgeEvent) -> bool {
        match event {
            BridgeEvent::Device(DeviceEvent::Attached(device)) => self.on_attach(device).await,
            BridgeEvent::Device(DeviceEvent::Detached(id)) => self.on_detach(&id).await,
            BridgeEvent::Engine(EngineEvent::WriteFailed { generation, error }) => {
                self.on_write_failed(generation, error)
            }
            BridgeEvent::Engine(EngineEvent::RunError { generation, error }) => {
                self.on_run_error(generation, error).await
            }
            BridgeEvent::Shutdown => {
                self.session.close().await;
                self.tracked = None;
                return false;
            }
        }
        true
    }

    async fn on_attach(&mut self, device: DeviceDescriptor) {
        if let Some(current) = &self.tracked {
            log::debug!(
                "Ignoring attach of {} while tracking {}",
                device.id,
                current.id
            );
            return;
        }

        log::info!("Device attached: {} ({})", device.id, device.usb_id());
        self.tracked = Some(device);

        // Failures are already reported to the status sink by the session
        if let Err(e) = self.session.open().await {
            log::debug!("Open after attach failed: {}", e);
        }
        self.status.status("Device Inserted");
    }

    async fn on_detach(&mut self, id: &DeviceId) {
        match &self.tracked {
            Some(current) if &current.id == id => {}
            _ => {
                log::debug!("Ignoring detach of untracked device {}", id);
                return;
            }
        }

        log::info!("Device detached: {}", id);
        self.tracked = None;
        self.session.close().await;
        self.status.status("Device removed");
    }

    fn on_write_failed(&self, generation: u64, error: SessionError) {
        if self.session.generation() != Some(generation) {
            return;
        }
        self.status.status(&error.status_text());
    }

    async fn on_run_error(&mut self, generation: u64, error: SerialError) {
        if self.session.generation() != Some(generation) {
            log::debug!("Dropping run error from stale session {}: {}", generation, error);
            return;
        }

        let error = SessionError::TransportFatal(error);
        log::error!("Connection lost: {}", error);
        self.status.status(&error.status_text());
        self.session.close_generation(generation).await;
    }

    /// Consume device and engine events until shutdown is signalled or its
    /// sender is dropped; the session is closed on the way out.
    pub async fn run(
        mut self,
        mut devices: mpsc::Receiver<DeviceEvent>,
        mut engine: mpsc::UnboundedReceiver<EngineEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        log::info!("Event bridge started");

        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.changed() => BridgeEvent::Shutdown,
                Some(event) = engine.recv() => BridgeEvent::Engine(event),
                Some(event) = devices.recv() => BridgeEvent::Device(event),
            };

            if !self.handle(event).await {
                break;
            }
        }

        log::info!("Event bridge stopped");
    }

    pub fn spawn(
        self,
        devices: mpsc::Receiver<DeviceEvent>,
        engine: mpsc::UnboundedReceiver<EngineEvent>,
    ) -> BridgeHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(devices, engine, shutdown_rx));
        BridgeHandle { shutdown_tx, task }
    }
}

/// Owner of a spawned bridge
pub struct BridgeHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl BridgeHandle {
    /// Close the session and stop the bridge task
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            log::warn!("Event bridge ended abnormally: {}", e);
        }
    }
}
