//! Premix audio output sink.
//!
//! Moves already-mixed ("premix") buffers into a backend's playback buffers
//! and fires a callback when each buffer actually starts playing.
//!
//! Pieces:
//! - [`engine`]: playback synchronization, one engine per backend capability
//! - [`backend`]: capability traits plus the CPAL sound-card backends
//! - [`file`]: WAV and FLAC stream writers
//! - [`registry`]: device names to engine-wrapped backends
//! - [`inspect`]: decode rendered files for verification

pub mod backend;
pub mod cancel;
pub mod config;
pub mod engine;
pub mod error;
pub mod file;
pub mod inspect;
pub mod mix;
pub mod pending;
pub mod premix;
pub mod registry;
pub mod status;

#[cfg(test)]
mod testing;

pub use cancel::CancelToken;
pub use config::{BufferPlayingFn, EngineConfig, OutputSettings, PcmFormat};
pub use engine::Device;
pub use error::{Result, SinkError};
pub use premix::{PremixBuffer, Userdata};
pub use registry::{DeviceRegistry, create_output_device};
pub use status::PlaybackCounters;

pub use premix_types::{DeviceKind, PlayOutcome, SinkStatus};
