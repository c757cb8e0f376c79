//! Output settings and engine tuning parameters.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use premix_types::DeviceKind;

use crate::error::{Result, SinkError};
use crate::premix::PremixBuffer;

/// Callback fired once per accepted buffer when it reaches audible playback.
pub type BufferPlayingFn = Arc<dyn Fn(DeviceKind, &PremixBuffer) + Send + Sync>;

/// Engine tuning parameters shared by all engine variants.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Sleep granularity of every poll loop; also the cancellation latency bound.
    pub poll_interval: Duration,
    /// Depth of the pending FIFO between writing and dispatching.
    ///
    /// This is the backpressure point: the producer blocks once this many
    /// buffers are written but not yet confirmed played.
    pub pending_depth: usize,
    /// Ring length in seconds of audio for ring-buffer backends.
    pub ring_seconds: f32,
    /// Submission queue depth for header-queue backends.
    pub queue_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1),
            pending_depth: 3,
            ring_seconds: 2.0,
            queue_depth: 4,
        }
    }
}

impl EngineConfig {
    pub(crate) fn poll_interval(&self) -> Duration {
        self.poll_interval.max(Duration::from_micros(1))
    }

    pub(crate) fn pending_depth(&self) -> usize {
        self.pending_depth.max(1)
    }
}

/// Linear PCM layout the sink renders to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PcmFormat {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
}

impl PcmFormat {
    /// Validate and build a format.
    pub fn new(channels: u16, sample_rate: u32, bits_per_sample: u16) -> Result<Self> {
        if !(1..=8).contains(&channels) {
            return Err(SinkError::InvalidFormat(format!(
                "channel count {channels} (expected 1..=8)"
            )));
        }
        if !matches!(bits_per_sample, 8 | 16 | 24 | 32) {
            return Err(SinkError::InvalidFormat(format!(
                "bits per sample {bits_per_sample} (expected 8, 16, 24 or 32)"
            )));
        }
        if sample_rate == 0 {
            return Err(SinkError::InvalidFormat("sample rate 0".to_string()));
        }
        Ok(Self {
            channels,
            sample_rate,
            bits_per_sample,
        })
    }

    pub fn bytes_per_sample(&self) -> usize {
        usize::from(self.bits_per_sample / 8)
    }

    /// Bytes per interleaved frame.
    pub fn block_align(&self) -> usize {
        usize::from(self.channels) * self.bytes_per_sample()
    }

    pub fn byte_rate(&self) -> usize {
        self.sample_rate as usize * self.block_align()
    }

    /// Ring length in bytes for `seconds` of audio, rounded down to whole frames.
    pub fn ring_bytes(&self, seconds: f32) -> usize {
        let secs = if seconds.is_finite() && seconds > 0.0 {
            seconds
        } else {
            2.0
        };
        let frames = (self.sample_rate as f32 * secs).ceil() as usize;
        frames.max(1) * self.block_align()
    }
}

/// Settings used to create an output device.
#[derive(Clone)]
pub struct OutputSettings {
    /// Registered device name (`cpal`, `cpal-queue`, `file`, ...).
    pub device_name: String,
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    /// Target file for file devices; its extension selects the container.
    pub target_path: Option<PathBuf>,
    /// Optional output hardware selector (substring match) for cpal devices.
    pub hardware: Option<String>,
    pub on_buffer_playing: Option<BufferPlayingFn>,
    pub engine: EngineConfig,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            device_name: "cpal".to_string(),
            channels: 2,
            sample_rate: 44_100,
            bits_per_sample: 16,
            target_path: None,
            hardware: None,
            on_buffer_playing: None,
            engine: EngineConfig::default(),
        }
    }
}

impl OutputSettings {
    pub fn pcm_format(&self) -> Result<PcmFormat> {
        PcmFormat::new(self.channels, self.sample_rate, self.bits_per_sample)
    }
}

impl fmt::Debug for OutputSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputSettings")
            .field("device_name", &self.device_name)
            .field("channels", &self.channels)
            .field("sample_rate", &self.sample_rate)
            .field("bits_per_sample", &self.bits_per_sample)
            .field("target_path", &self.target_path)
            .field("hardware", &self.hardware)
            .field("on_buffer_playing", &self.on_buffer_playing.is_some())
            .field("engine", &self.engine)
            .finish()
    }
}
