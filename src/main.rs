use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use serial_link::device::{DeviceMonitor, PollingDeviceMonitor};
use serial_link::serial::{HexLogSink, SensorJsonPayload, SerialportTransport, UsbTransport};
use serial_link::status::ChannelStatusSink;
use serial_link::{AppSettings, EventBridge, SerialSession};

/// Keep one USB serial device connected and stream test data to it
#[derive(Debug, Parser)]
#[command(name = "serial-link", version, about)]
struct Args {
    /// Settings file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter, e.g. "debug" or "serial_link=debug,serial_rcv=debug"
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let settings = match &args.config {
        Some(path) => AppSettings::load(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => AppSettings::default(),
    };

    let filter = args.log_level.as_deref().unwrap_or(&settings.log_level);
    serial_link::logging::init_logging(filter).context("installing logger")?;

    let registry = settings.registry.build_registry();
    log::info!("Driver registry holds {} profiles", registry.len());

    let transport: Arc<dyn UsbTransport> = Arc::new(SerialportTransport::new());

    // Status lines go to their own task, standing in for a UI
    let (status_sink, mut status_rx) = ChannelStatusSink::channel();
    let status_task = tokio::spawn(async move {
        while let Some(line) = status_rx.recv().await {
            log::info!(target: "serial_status", "{}", line);
        }
    });
    let status = Arc::new(status_sink);

    let (session, engine_events) = SerialSession::builder(Arc::clone(&transport), registry)
        .status_sink(status.clone())
        .payload(Arc::new(SensorJsonPayload::default()))
        .data_sink(Arc::new(HexLogSink))
        .settings(settings.session.clone())
        .build();
    let session = Arc::new(session);

    let mut monitor = PollingDeviceMonitor::new(transport, settings.monitor.poll_interval());
    let device_events = monitor
        .take_receiver()
        .context("device monitor receiver already taken")?;
    monitor
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("starting device monitor: {}", e))?;

    let bridge = EventBridge::new(Arc::clone(&session), status).spawn(device_events, engine_events);

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    log::info!("Shutting down");

    if let Err(e) = monitor.stop().await {
        log::warn!("Stopping device monitor: {}", e);
    }
    bridge.shutdown().await;

    drop(session);
    let _ = status_task.await;
    Ok(())
}
