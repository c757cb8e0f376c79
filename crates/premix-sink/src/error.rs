//! Error taxonomy shared by every engine and backend.

use thiserror::Error;

/// Result type for sink operations.
pub type Result<T> = std::result::Result<T, SinkError>;

#[derive(Debug, Error)]
pub enum SinkError {
    /// No implementation is registered for the requested device or file extension.
    #[error("device not supported: {0}")]
    Unsupported(String),

    /// Device or handle creation failed before playback started.
    #[error("backend init failed: {0}")]
    BackendInit(String),

    /// Channel count, bit depth or sample rate cannot be rendered.
    #[error("invalid output format: {0}")]
    InvalidFormat(String),

    /// A single lock/submit failed; the affected buffer is dropped.
    #[error("transient backend failure: {0}")]
    Transient(String),

    /// The backend reached an unrecoverable state.
    #[error("fatal backend failure: {0}")]
    Fatal(String),

    /// The device was already closed.
    #[error("device closed")]
    Closed,

    /// A rendered file could not be opened or decoded.
    #[error("inspect failed: {0}")]
    Inspect(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SinkError {
    /// Whether the error must terminate the stream rather than drop one buffer.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SinkError::Fatal(_) | SinkError::Io(_) | SinkError::Closed)
    }
}

impl From<cpal::BuildStreamError> for SinkError {
    fn from(err: cpal::BuildStreamError) -> Self {
        SinkError::BackendInit(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for SinkError {
    fn from(err: cpal::PlayStreamError) -> Self {
        SinkError::BackendInit(err.to_string())
    }
}

impl From<cpal::SupportedStreamConfigsError> for SinkError {
    fn from(err: cpal::SupportedStreamConfigsError) -> Self {
        SinkError::BackendInit(err.to_string())
    }
}

impl From<symphonia::core::errors::Error> for SinkError {
    fn from(err: symphonia::core::errors::Error) -> Self {
        match err {
            symphonia::core::errors::Error::IoError(io) => SinkError::Io(io),
            other => SinkError::Inspect(other.to_string()),
        }
    }
}

impl From<cpal::DevicesError> for SinkError {
    fn from(err: cpal::DevicesError) -> Self {
        SinkError::BackendInit(err.to_string())
    }
}
