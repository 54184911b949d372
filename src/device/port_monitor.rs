use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use super::{DeviceDescriptor, DeviceId};
use crate::serial::UsbTransport;

/// Events emitted by a device monitor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// A USB serial device was attached
    Attached(DeviceDescriptor),
    /// A USB serial device was detached
    Detached(DeviceId),
}

pub type MonitorError = Box<dyn std::error::Error + Send + Sync>;

/// Source of attach/detach notifications
#[async_trait::async_trait]
pub trait DeviceMonitor: Send + Sync {
    /// Start monitoring for device changes
    async fn start(&mut self) -> Result<(), MonitorError>;

    /// Stop monitoring
    async fn stop(&mut self) -> Result<(), MonitorError>;

    /// Get receiver for device events. Can only be taken once.
    fn take_receiver(&mut self) -> Option<mpsc::Receiver<DeviceEvent>>;
}

/// Monitor that diffs the transport's device list on a fixed interval.
///
/// Works anywhere the transport can enumerate, at the cost of up to one
/// interval of latency per event.
pub struct PollingDeviceMonitor {
    transport: Arc<dyn UsbTransport>,
    interval: Duration,
    announce_existing: bool,
    tx: Option<mpsc::Sender<DeviceEvent>>,
    rx: Option<mpsc::Receiver<DeviceEvent>>,
    stop_tx: Option<watch::Sender<bool>>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl PollingDeviceMonitor {
    pub fn new(transport: Arc<dyn UsbTransport>, interval: Duration) -> Self {
        let (tx, rx) = mpsc::channel(100);

        Self {
            transport,
            interval: interval.max(Duration::from_millis(1)),
            announce_existing: true,
            tx: Some(tx),
            rx: Some(rx),
            stop_tx: None,
            task_handle: None,
        }
    }

    /// Whether devices already present at start are reported as attached
    pub fn announce_existing(mut self, announce: bool) -> Self {
        self.announce_existing = announce;
        self
    }

    /// Compute the events turning `known` into `current`, updating `known`
    fn diff(
        known: &mut HashMap<DeviceId, DeviceDescriptor>,
        current: Vec<DeviceDescriptor>,
    ) -> Vec<DeviceEvent> {
        let mut events = Vec::new();

        let present: HashMap<DeviceId, DeviceDescriptor> = current
            .iter()
            .map(|d| (d.id.clone(), d.clone()))
            .collect();

        let mut removed: Vec<DeviceId> = known
            .keys()
            .filter(|id| !present.contains_key(*id))
            .cloned()
            .collect();
        removed.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        for id in removed {
            known.remove(&id);
            events.push(DeviceEvent::Detached(id));
        }

        // Feed order is preserved for attaches
        for device in current {
            if !known.contains_key(&device.id) {
                known.insert(device.id.clone(), device.clone());
                events.push(DeviceEvent::Attached(device));
            }
        }

        events
    }
}

#[async_trait::async_trait]
impl DeviceMonitor for PollingDeviceMonitor {
    async fn start(&mut self) -> Result<(), MonitorError> {
        let tx = self.tx.take().ok_or("Already started")?;
        let (stop_tx, mut stop_rx) = watch::channel(false);
        self.stop_tx = Some(stop_tx);

        let transport = Arc::clone(&self.transport);
        let period = self.interval;

        let mut known = HashMap::new();
        if !self.announce_existing {
            for device in transport.list_devices()? {
                known.insert(device.id.clone(), device);
            }
        }

        let handle = tokio::spawn(async move {
            log::info!("Device monitor started (polling every {:?})", period);
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = stop_rx.changed() => {
                        log::info!("Device monitor stopping");
                        break;
                    }
                    _ = interval.tick() => {
                        let devices = match transport.list_devices() {
                            Ok(devices) => devices,
                            Err(e) => {
                                log::warn!("Device enumeration failed: {}", e);
                                continue;
                            }
                        };

                        for event in Self::diff(&mut known, devices) {
                            log::debug!("Device event: {:?}", event);
                            if tx.send(event).await.is_err() {
                                log::debug!("Device event receiver dropped, stopping monitor");
                                return;
                            }
                        }
                    }
                }
            }
        });

        self.task_handle = Some(handle);
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), MonitorError> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(true);
        }

        if let Some(handle) = self.task_handle.take() {
            handle.await?;
        }

        Ok(())
    }

    fn take_receiver(&mut self) -> Option<mpsc::Receiver<DeviceEvent>> {
        self.rx.take()
    }
}
