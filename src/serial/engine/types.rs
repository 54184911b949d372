//! Shared types for the read/write loops
use std::sync::atomic::{AtomicU64, Ordering};

use crate::serial::{SerialError, SessionError};

/// Reported by the loops to whoever drives the session.
///
/// `generation` identifies the session instance that produced the event so a
/// late report from an earlier session can be told apart.
#[derive(Debug)]
pub enum EngineEvent {
    /// One tick's write failed; the write loop carries on
    WriteFailed { generation: u64, error: SessionError },
    /// The transport failed for good; the read loop has stopped
    RunError { generation: u64, error: SerialError },
}

impl EngineEvent {
    pub fn generation(&self) -> u64 {
        match self {
            EngineEvent::WriteFailed { generation, .. } => *generation,
            EngineEvent::RunError { generation, .. } => *generation,
        }
    }
}

/// Consumer of inbound bytes
pub trait DataSink: Send + Sync {
    fn on_data(&self, data: &[u8]);
}

/// Logs every received chunk hex-encoded
#[derive(Debug, Default, Clone, Copy)]
pub struct HexLogSink;

impl DataSink for HexLogSink {
    fn on_data(&self, data: &[u8]) {
        if !data.is_empty() {
            log::debug!(target: "serial_rcv", "{}", hex::encode(data));
        }
    }
}

/// Exclusive right to write to the port.
///
/// Held for the duration of every write. Closing the session clears `open`
/// while holding it, so nothing can write to a port being closed.
#[derive(Debug)]
pub(crate) struct WriterToken {
    pub open: bool,
}

/// Counters for one session, taken as a snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IoStats {
    pub write_ticks: u64,
    pub bytes_written: u64,
    pub write_failures: u64,
    pub read_chunks: u64,
    pub bytes_read: u64,
}

#[derive(Debug, Default)]
pub(crate) struct IoCounters {
    write_ticks: AtomicU64,
    bytes_written: AtomicU64,
    write_failures: AtomicU64,
    read_chunks: AtomicU64,
    bytes_read: AtomicU64,
}

impl IoCounters {
    pub fn record_write(&self, bytes: usize) {
        self.write_ticks.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_write_failure(&self) {
        self.write_ticks.fetch_add(1, Ordering::Relaxed);
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read(&self, bytes: usize) {
        self.read_chunks.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> IoStats {
        IoStats {
            write_ticks: self.write_ticks.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            read_chunks: self.read_chunks.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
        }
    }
}
