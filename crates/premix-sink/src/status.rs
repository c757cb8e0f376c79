use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use premix_types::{DeviceKind, SinkStatus};

/// Shared playback counters updated by the engines.
///
/// Cloning shares the counters, so a caller can keep a handle and read a
/// snapshot while `play` runs on another thread.
#[derive(Clone, Debug, Default)]
pub struct PlaybackCounters {
    submitted: Arc<AtomicU64>,
    played: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
    bytes_written: Arc<AtomicU64>,
}

impl PlaybackCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_played(&self) {
        self.played.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_bytes(&self, bytes: usize) {
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn played(&self) -> u64 {
        self.played.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Snapshot suitable for logs and JSON output.
    pub fn snapshot(&self, device: &str, kind: DeviceKind) -> SinkStatus {
        SinkStatus {
            device: device.to_string(),
            kind: Some(kind),
            submitted: self.submitted.load(Ordering::Relaxed),
            played: self.played.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }
}
