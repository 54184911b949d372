//! Concurrent read and write loops over one open port
pub mod reader;
pub mod types;
pub mod writer;

pub use types::{DataSink, EngineEvent, HexLogSink, IoStats};

use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::config::SessionSettings;
use crate::serial::{PayloadSource, PortHandle};
use reader::ReadLoop;
use types::{IoCounters, WriterToken};
use writer::WriteLoop;

pub(crate) struct EngineContext {
    pub generation: u64,
    pub port: Arc<dyn PortHandle>,
    pub writer: Arc<Mutex<WriterToken>>,
    pub payload: Arc<dyn PayloadSource>,
    pub data_sink: Arc<dyn DataSink>,
    pub events: mpsc::UnboundedSender<EngineEvent>,
    pub settings: SessionSettings,
}

/// Running loops for one session
pub(crate) struct IoEngine {
    shutdown_tx: watch::Sender<bool>,
    write_task: JoinHandle<()>,
    read_task: JoinHandle<()>,
    delivery_task: JoinHandle<()>,
    counters: Arc<IoCounters>,
}

impl IoEngine {
    pub fn start(ctx: EngineContext) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (data_tx, data_rx) = mpsc::unbounded_channel();
        let counters = Arc::new(IoCounters::default());

        let write_loop = WriteLoop {
            generation: ctx.generation,
            port: Arc::clone(&ctx.port),
            writer: ctx.writer,
            payload: ctx.payload,
            events: ctx.events.clone(),
            counters: Arc::clone(&counters),
            interval: ctx.settings.write_interval(),
            timeout: ctx.settings.write_timeout(),
        };
        let read_loop = ReadLoop {
            generation: ctx.generation,
            port: ctx.port,
            data_tx,
            events: ctx.events,
            counters: Arc::clone(&counters),
            timeout: ctx.settings.read_timeout(),
            buffer_size: ctx.settings.read_buffer_size,
        };

        let write_task = tokio::spawn(write_loop.run(shutdown_rx.clone()));
        let read_task = tokio::spawn(read_loop.run(shutdown_rx));
        let delivery_task = tokio::spawn(reader::deliver(data_rx, ctx.data_sink));

        Self {
            shutdown_tx,
            write_task,
            read_task,
            delivery_task,
            counters,
        }
    }

    pub fn stats(&self) -> IoStats {
        self.counters.snapshot()
    }

    /// Signal both loops and wait for them to finish.
    ///
    /// An in-flight read or write is allowed to complete, so this waits at
    /// most one read/write timeout. Once it returns the loops have released
    /// the port.
    pub async fn shutdown(self) -> IoStats {
        let _ = self.shutdown_tx.send(true);

        if let Err(e) = self.write_task.await {
            log::warn!("Write loop ended abnormally: {}", e);
        }
        if let Err(e) = self.read_task.await {
            log::warn!("Read loop ended abnormally: {}", e);
        }
        // Read loop is gone, so the data channel drains and closes
        if let Err(e) = self.delivery_task.await {
            log::warn!("Data delivery ended abnormally: {}", e);
        }

        self.counters.snapshot()
    }
}
