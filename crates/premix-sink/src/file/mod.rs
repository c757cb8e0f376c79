//! File outputs, selected by target-path extension.

use std::path::Path;

use crate::config::OutputSettings;
use crate::engine::Device;
use crate::engine::stream::StreamEngine;
use crate::error::{Result, SinkError};

pub mod flac;
pub mod wav;

pub use flac::FlacWriter;
pub use wav::WavWriter;

/// Container written by the file device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileFormat {
    Wav,
    Flac,
}

impl FileFormat {
    /// Pick the container from the lower-cased extension of `path`.
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "wav" => Ok(FileFormat::Wav),
            "flac" => Ok(FileFormat::Flac),
            _ => Err(SinkError::Unsupported(format!(
                "unsupported output format: {}",
                path.display()
            ))),
        }
    }
}

/// Open the stream device for `settings.target_path`.
///
/// The extension is checked before the file is created, so an unsupported
/// target leaves nothing behind.
pub fn open_file_device(name: &str, settings: &OutputSettings) -> Result<Box<dyn Device>> {
    let path = settings
        .target_path
        .as_deref()
        .ok_or_else(|| SinkError::BackendInit("file device needs a target path".to_string()))?;
    let kind = FileFormat::from_path(path)?;
    let format = settings.pcm_format()?;

    let device: Box<dyn Device> = match kind {
        FileFormat::Wav => Box::new(StreamEngine::new(name, WavWriter::create(path, format)?, settings)?),
        FileFormat::Flac => Box::new(StreamEngine::new(name, FlacWriter::create(path, format)?, settings)?),
    };
    tracing::info!(device = name, path = %path.display(), format = ?kind, "file output opened");
    Ok(device)
}
