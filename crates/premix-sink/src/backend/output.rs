//! CPAL output stream shared by the sound-card backends.
//!
//! A `cpal::Stream` is not `Send`, so it lives on a dedicated output thread for
//! its whole life. The thread reports the result of device setup once, then
//! parks until it is told to stop. Backends only see a [`RenderSource`]: the
//! real-time callback asks it for interleaved `f32` samples and converts them
//! to the device sample format.

use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::Sender;

use crate::backend::device;
use crate::config::PcmFormat;
use crate::error::{Result, SinkError};

/// Producer side of the real-time callback.
///
/// `render` runs on the audio thread: it must fill `out` completely and never block
/// for longer than a short mutex hold.
pub(crate) trait RenderSource: Send + 'static {
    fn render(&mut self, out: &mut [f32]);
}

/// Owner of a running output stream.
pub(crate) struct OutputThread {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl OutputThread {
    /// Open the device, start the stream and return once it is playing.
    pub(crate) fn spawn<S: RenderSource>(
        label: &str,
        needle: Option<String>,
        format: PcmFormat,
        source: S,
    ) -> Result<Self> {
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<()>>(1);
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);

        let handle = thread::Builder::new()
            .name(format!("premix-{label}"))
            .spawn(move || {
                let stream = match open_stream(needle.as_deref(), format, source) {
                    Ok(stream) => stream,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                if let Err(err) = stream.play() {
                    let _ = ready_tx.send(Err(err.into()));
                    return;
                }
                let _ = ready_tx.send(Ok(()));
                // Returns on stop or when the owner goes away.
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| SinkError::BackendInit(format!("spawn output thread: {e}")))?;

        let mut output = Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        };
        match ready_rx.recv() {
            Ok(Ok(())) => Ok(output),
            Ok(Err(err)) => {
                output.stop();
                Err(err)
            }
            Err(_) => {
                output.stop();
                Err(SinkError::BackendInit("output thread exited during setup".to_string()))
            }
        }
    }

    /// Stop the stream and join the output thread. Idempotent.
    pub(crate) fn stop(&mut self) {
        drop(self.stop_tx.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("output thread panicked");
            }
        }
    }
}

impl Drop for OutputThread {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open_stream<S: RenderSource>(needle: Option<&str>, format: PcmFormat, source: S) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = device::pick_device(&host, needle)?;
    let config = device::pick_output_config(&device, format)?;
    let mut stream_config: cpal::StreamConfig = config.clone().into();
    // About 10 ms per callback keeps the play cursor fine-grained.
    if let Some(buf) = device::pick_buffer_size(&config, (format.sample_rate / 100).max(64)) {
        stream_config.buffer_size = buf;
    }
    tracing::info!(
        device = %device.description().map(|d| d.to_string()).unwrap_or_default(),
        rate_hz = stream_config.sample_rate,
        channels = stream_config.channels,
        sample_format = ?config.sample_format(),
        buffer_size = ?stream_config.buffer_size,
        "output stream config"
    );
    build_output_stream(&device, &stream_config, config.sample_format(), source)
}

fn build_output_stream<S: RenderSource>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    source: S,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32, S>(device, config, source),
        cpal::SampleFormat::I16 => build_stream::<i16, S>(device, config, source),
        cpal::SampleFormat::I32 => build_stream::<i32, S>(device, config, source),
        cpal::SampleFormat::U16 => build_stream::<u16, S>(device, config, source),
        other => Err(SinkError::BackendInit(format!(
            "unsupported sample format: {other:?}"
        ))),
    }
}

fn build_stream<T, S>(device: &cpal::Device, config: &cpal::StreamConfig, mut source: S) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
    S: RenderSource,
{
    let mut scratch: Vec<f32> = Vec::new();
    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            // Grows once to the callback size, then stays allocated.
            scratch.resize(data.len(), 0.0);
            source.render(&mut scratch);
            for (dst, sample) in data.iter_mut().zip(scratch.iter()) {
                *dst = <T as cpal::Sample>::from_sample::<f32>(*sample);
            }
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}
