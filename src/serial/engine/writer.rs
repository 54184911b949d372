use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::MissedTickBehavior;

use super::types::{EngineEvent, IoCounters, WriterToken};
use crate::serial::{PayloadSource, PortHandle, SessionError};

pub(crate) struct WriteLoop {
    pub generation: u64,
    pub port: Arc<dyn PortHandle>,
    pub writer: Arc<Mutex<WriterToken>>,
    pub payload: Arc<dyn PayloadSource>,
    pub events: mpsc::UnboundedSender<EngineEvent>,
    pub counters: Arc<IoCounters>,
    pub interval: Duration,
    pub timeout: Duration,
}

impl WriteLoop {
    /// Write one generated payload per tick until shutdown.
    ///
    /// A failed tick is reported and skipped; the payload is not retried.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        log::debug!("Write loop {} started on {}", self.generation, self.port.name());

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }
            if *shutdown.borrow() {
                break;
            }

            let mut line = self.payload.next_payload();
            line.push(b'\n');

            let result = {
                let token = self.writer.lock().await;
                if !token.open {
                    break;
                }
                self.port.write(&line, self.timeout).await
            };

            match result {
                Ok(written) => self.counters.record_write(written),
                Err(e) => {
                    self.counters.record_write_failure();
                    let error = SessionError::from_write(e, self.timeout);
                    log::warn!("Write of {} bytes failed: {}", line.len(), error);
                    let _ = self.events.send(EngineEvent::WriteFailed {
                        generation: self.generation,
                        error,
                    });
                }
            }
        }

        log::debug!("Write loop {} stopped", self.generation);
    }
}
