use serde::{Deserialize, Serialize};

/// Class of output a device renders to.
///
/// Passed to the "now playing" callback so callers can tell real-time output
/// from file rendering.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// Real-time output through a sound card or audio server.
    SoundCard,
    /// Non-real-time output into a file.
    File,
}

impl DeviceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceKind::SoundCard => "sound_card",
            DeviceKind::File => "file",
        }
    }
}

/// Terminal result of a successful `play` call.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlayOutcome {
    /// The input stream ended and every accepted buffer was played (or written).
    Exhausted,
    /// The cancellation token was signalled; pending buffers were abandoned.
    Cancelled,
}

/// Counters reported by an output device after (or during) playback.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SinkStatus {
    /// Registered device name (for example `cpal` or `file`).
    pub device: String,
    /// Output class, if known.
    pub kind: Option<DeviceKind>,
    /// Premix buffers accepted from the producer.
    pub submitted: u64,
    /// Premix buffers whose "now playing" callback fired.
    pub played: u64,
    /// Premix buffers dropped because of transient backend failures.
    pub dropped: u64,
    /// Bytes handed to the backend.
    pub bytes_written: u64,
}

impl SinkStatus {
    /// Buffers accepted but neither played nor dropped yet.
    pub fn in_flight(&self) -> u64 {
        self.submitted
            .saturating_sub(self.played)
            .saturating_sub(self.dropped)
    }
}
