//! Device registry.
//!
//! Maps device names to providers. Each provider opens its backend and wraps it
//! in the engine matching the backend's capability.

use premix_types::DeviceKind;

use crate::backend::cpal_queue::CpalQueue;
use crate::backend::cpal_ring::CpalRing;
use crate::config::OutputSettings;
use crate::engine::Device;
use crate::engine::header::HeaderQueueEngine;
use crate::engine::ring::RingEngine;
use crate::error::{Result, SinkError};
use crate::file;

/// Something that can open a named output device.
pub trait DeviceProvider: Send + Sync {
    /// Name the device is registered under.
    fn name(&self) -> &str;
    fn kind(&self) -> DeviceKind;
    fn create(&self, settings: &OutputSettings) -> Result<Box<dyn Device>>;
}

/// Sound card through a CPAL stream playing a looping ring.
pub struct CpalRingProvider;

impl DeviceProvider for CpalRingProvider {
    fn name(&self) -> &str {
        "cpal"
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::SoundCard
    }

    fn create(&self, settings: &OutputSettings) -> Result<Box<dyn Device>> {
        let backend = CpalRing::open(settings)?;
        Ok(Box::new(RingEngine::new(self.name(), backend, settings)?))
    }
}

/// Sound card through a CPAL stream fed by submitted headers.
pub struct CpalQueueProvider;

impl DeviceProvider for CpalQueueProvider {
    fn name(&self) -> &str {
        "cpal-queue"
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::SoundCard
    }

    fn create(&self, settings: &OutputSettings) -> Result<Box<dyn Device>> {
        let backend = CpalQueue::open(settings)?;
        Ok(Box::new(HeaderQueueEngine::new(self.name(), backend, settings)?))
    }
}

/// WAV or FLAC file, chosen by the target path extension.
pub struct FileProvider;

impl DeviceProvider for FileProvider {
    fn name(&self) -> &str {
        "file"
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::File
    }

    fn create(&self, settings: &OutputSettings) -> Result<Box<dyn Device>> {
        file::open_file_device(self.name(), settings)
    }
}

pub struct DeviceRegistry {
    providers: Vec<Box<dyn DeviceProvider>>,
}

impl DeviceRegistry {
    /// Create a registry from an explicit provider list.
    pub fn new(providers: Vec<Box<dyn DeviceProvider>>) -> Self {
        Self { providers }
    }

    /// Registry with the built-in devices: `cpal`, `cpal-queue` and `file`.
    pub fn with_defaults() -> Self {
        Self::new(vec![
            Box::new(CpalRingProvider),
            Box::new(CpalQueueProvider),
            Box::new(FileProvider),
        ])
    }

    /// Add a provider; a later registration under the same name wins.
    pub fn register(&mut self, provider: Box<dyn DeviceProvider>) {
        self.providers.retain(|p| p.name() != provider.name());
        self.providers.push(provider);
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub fn kind_of(&self, name: &str) -> Option<DeviceKind> {
        self.find(name).map(|p| p.kind())
    }

    /// Open the device registered as `name`.
    pub fn create(&self, name: &str, settings: &OutputSettings) -> Result<Box<dyn Device>> {
        let provider = self
            .find(name)
            .ok_or_else(|| SinkError::Unsupported(name.to_string()))?;
        tracing::debug!(device = name, kind = provider.kind().as_str(), "creating output device");
        provider.create(settings)
    }

    fn find(&self, name: &str) -> Option<&dyn DeviceProvider> {
        self.providers
            .iter()
            .find(|p| p.name() == name)
            .map(|p| p.as_ref())
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Open `settings.device_name` from the built-in registry.
pub fn create_output_device(settings: &OutputSettings) -> Result<Box<dyn Device>> {
    DeviceRegistry::with_defaults().create(&settings.device_name, settings)
}
