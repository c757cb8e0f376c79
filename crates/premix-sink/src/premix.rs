//! Premix buffers: chunks of already-mixed audio handed to an output device.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Caller-defined metadata carried through to the "now playing" callback.
pub type Userdata = Arc<dyn Any + Send + Sync>;

/// One chunk of mixed audio for a specific row or buffer.
///
/// `data` holds one sample vector per output channel, each `samples_len`
/// frames long, in the nominal range `[-1.0, 1.0]`. The sink never mutates it.
#[derive(Clone, Default)]
pub struct PremixBuffer {
    pub samples_len: usize,
    pub data: Vec<Vec<f32>>,
    pub userdata: Option<Userdata>,
}

impl PremixBuffer {
    pub fn new(data: Vec<Vec<f32>>) -> Self {
        let samples_len = data.iter().map(Vec::len).min().unwrap_or(0);
        Self {
            samples_len,
            data,
            userdata: None,
        }
    }

    /// A buffer of `samples_len` frames of silence.
    pub fn silence(channels: usize, samples_len: usize) -> Self {
        Self::new(vec![vec![0.0; samples_len]; channels])
    }

    pub fn with_userdata<T: Any + Send + Sync>(mut self, userdata: T) -> Self {
        self.userdata = Some(Arc::new(userdata));
        self
    }

    /// Typed access to the attached userdata.
    pub fn userdata<T: Any>(&self) -> Option<&T> {
        self.userdata.as_ref().and_then(|u| u.downcast_ref::<T>())
    }

    pub fn channels(&self) -> usize {
        self.data.len()
    }

    /// Sample for `channel` at `frame`; missing samples read as silence.
    pub fn sample(&self, channel: usize, frame: usize) -> f32 {
        self.data
            .get(channel)
            .and_then(|c| c.get(frame))
            .copied()
            .unwrap_or(0.0)
    }
}

impl fmt::Debug for PremixBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PremixBuffer")
            .field("samples_len", &self.samples_len)
            .field("channels", &self.data.len())
            .field("userdata", &self.userdata.is_some())
            .finish()
    }
}
