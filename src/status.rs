//! Human-readable connection status delivery
use std::sync::Mutex;

use tokio::sync::mpsc;

/// Receives status lines in the order the session produces them
pub trait StatusSink: Send + Sync {
    fn status(&self, message: &str);
}

/// Writes status lines to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogStatusSink;

impl StatusSink for LogStatusSink {
    fn status(&self, message: &str) {
        log::info!(target: "serial_status", "{}", message);
    }
}

/// Forwards status lines to another context, e.g. a UI loop
#[derive(Debug, Clone)]
pub struct ChannelStatusSink {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelStatusSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl StatusSink for ChannelStatusSink {
    fn status(&self, message: &str) {
        if self.tx.send(message.to_string()).is_err() {
            log::debug!("Status receiver gone, dropping: {}", message);
        }
    }
}

/// Keeps every status line; handy for inspection and tests
#[derive(Debug, Default)]
pub struct RecordingStatusSink {
    messages: Mutex<Vec<String>>,
}

impl RecordingStatusSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn clear(&self) {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}

impl StatusSink for RecordingStatusSink {
    fn status(&self, message: &str) {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(message.to_string());
    }
}
