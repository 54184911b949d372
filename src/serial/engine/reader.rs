use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use super::types::{DataSink, EngineEvent, IoCounters};
use crate::serial::{PortHandle, SerialError};

pub(crate) struct ReadLoop {
    pub generation: u64,
    pub port: Arc<dyn PortHandle>,
    pub data_tx: mpsc::UnboundedSender<Vec<u8>>,
    pub events: mpsc::UnboundedSender<EngineEvent>,
    pub counters: Arc<IoCounters>,
    pub timeout: Duration,
    pub buffer_size: usize,
}

impl ReadLoop {
    /// Read until shutdown or until the transport fails for good.
    ///
    /// Empty reads and timeouts are idle polls. Any other error ends the
    /// loop and is reported once as a run error, as is losing the data
    /// consumer.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        log::debug!("Read loop {} started on {}", self.generation, self.port.name());

        while !*shutdown.borrow() {
            match self.port.read(self.buffer_size, self.timeout).await {
                Ok(chunk) if chunk.is_empty() => {}
                Ok(chunk) => {
                    self.counters.record_read(chunk.len());
                    if self.data_tx.send(chunk).is_err() {
                        // Delivery task died, most likely a panicking sink
                        log::warn!("Read loop {}: data consumer is gone", self.generation);
                        self.report(SerialError::IoError(std::io::Error::other(
                            "data consumer stopped",
                        )));
                        break;
                    }
                }
                Err(SerialError::Timeout) => {}
                Err(e) => {
                    if *shutdown.borrow() {
                        log::debug!("Read error during shutdown ignored: {}", e);
                        break;
                    }
                    log::error!("Read loop {} terminated: {}", self.generation, e);
                    self.report(e);
                    break;
                }
            }
        }

        log::debug!("Read loop {} stopped", self.generation);
    }

    fn report(&self, error: SerialError) {
        let _ = self.events.send(EngineEvent::RunError {
            generation: self.generation,
            error,
        });
    }
}

/// Hand inbound chunks to the sink in arrival order, off the read task
pub(crate) async fn deliver(
    mut data_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    sink: Arc<dyn DataSink>,
) {
    while let Some(chunk) = data_rx.recv().await {
        sink.on_data(&chunk);
    }
}
