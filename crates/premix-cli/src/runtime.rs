//! Command implementations for the `premix` binary.

use std::f32::consts::TAU;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use crossbeam_channel::Sender;
use premix_sink::backend::device;
use premix_sink::inspect;
use premix_sink::{CancelToken, DeviceKind, DeviceRegistry, PlayOutcome, PremixBuffer, SinkStatus};

use crate::config::RenderConfig;

/// Print sound-card outputs and the registered sink devices.
pub fn list_devices(registry: &DeviceRegistry) -> Result<()> {
    println!("sink devices:");
    for name in registry.names() {
        let kind = registry.kind_of(name).map(DeviceKind::as_str).unwrap_or("unknown");
        println!("  {name} ({kind})");
    }

    let outputs = device::list_devices().context("enumerate sound-card outputs")?;
    println!("sound-card outputs:");
    for info in outputs {
        println!(
            "  {}{}  ch<= {}  {}-{} Hz",
            if info.is_default { "* " } else { "  " },
            info.name,
            info.max_channels,
            info.min_rate,
            info.max_rate
        );
    }
    Ok(())
}

/// Print what a rendered file contains.
pub fn inspect(path: &Path) -> Result<()> {
    let audio = inspect::read_rendered(path).with_context(|| format!("inspect {:?}", path))?;
    let peak = audio.samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
    println!("codec:       {}", audio.codec.as_deref().unwrap_or("unknown"));
    println!("channels:    {}", audio.channels);
    println!("sample rate: {} Hz", audio.sample_rate);
    match audio.bits_per_sample {
        Some(bits) => println!("bit depth:   {bits}"),
        None => println!("bit depth:   unknown"),
    }
    println!("frames:      {}", audio.frames());
    println!("duration:    {} ms", audio.duration_ms());
    println!("peak:        {peak:.4}");
    Ok(())
}

/// Result of a render job.
#[derive(Debug, Clone)]
pub struct RenderReport {
    pub outcome: PlayOutcome,
    pub status: SinkStatus,
}

/// Render a sine tone through the configured device until done or cancelled.
pub fn render(registry: &DeviceRegistry, mut cfg: RenderConfig, cancel: &CancelToken) -> Result<RenderReport> {
    let rows_per_second = cfg.rows_per_second;
    cfg.settings.on_buffer_playing = Some(Arc::new(move |kind: DeviceKind, buf: &PremixBuffer| {
        if let Some(row) = buf.userdata::<usize>() {
            if *row as u32 % rows_per_second == 0 {
                tracing::info!(row, kind = kind.as_str(), "row playing");
            } else {
                tracing::trace!(row, kind = kind.as_str(), "row playing");
            }
        }
    }));

    let device_name = cfg.settings.device_name.clone();
    let mut device = registry
        .create(&device_name, &cfg.settings)
        .with_context(|| format!("open device {device_name}"))?;
    tracing::info!(
        device = device.name(),
        kind = device.kind().as_str(),
        channels = cfg.settings.channels,
        rate_hz = cfg.settings.sample_rate,
        bits = cfg.settings.bits_per_sample,
        "render started"
    );

    let tone = ToneSpec::from_config(&cfg);
    let (tx, rx) = crossbeam_channel::bounded(cfg.settings.engine.pending_depth.max(1));
    let producer_cancel = cancel.clone();
    let producer = thread::Builder::new()
        .name("premix-producer".to_string())
        .spawn(move || produce_rows(tone, tx, &producer_cancel))
        .context("spawn producer thread")?;

    let result = device.play(rx, cancel);
    device.close();
    if producer.join().is_err() {
        tracing::warn!("producer thread panicked");
    }

    let outcome = result.with_context(|| format!("play on {device_name}"))?;
    let status = device.status();
    tracing::info!(
        outcome = ?outcome,
        submitted = status.submitted,
        played = status.played,
        dropped = status.dropped,
        bytes = status.bytes_written,
        "render finished"
    );
    Ok(RenderReport { outcome, status })
}

pub fn print_status_json(status: &SinkStatus) -> Result<()> {
    let json = serde_json::to_string_pretty(status).context("serialize status")?;
    println!("{json}");
    Ok(())
}

/// Test-tone geometry.
#[derive(Debug, Clone, Copy)]
struct ToneSpec {
    channels: usize,
    sample_rate: u32,
    freq: f32,
    total_frames: usize,
    frames_per_row: usize,
}

impl ToneSpec {
    fn from_config(cfg: &RenderConfig) -> Self {
        let rate = cfg.settings.sample_rate;
        Self {
            channels: usize::from(cfg.settings.channels.max(1)),
            sample_rate: rate,
            freq: cfg.freq,
            total_frames: (rate as f32 * cfg.seconds).round() as usize,
            frames_per_row: (rate / cfg.rows_per_second.max(1)).max(1) as usize,
        }
    }

    fn rows(&self) -> usize {
        self.total_frames.div_ceil(self.frames_per_row)
    }

    /// Row `index` as planar samples; the phase runs on across rows.
    fn row(&self, index: usize) -> PremixBuffer {
        let start = index * self.frames_per_row;
        let len = self.frames_per_row.min(self.total_frames.saturating_sub(start));
        let step = self.freq / self.sample_rate as f32;
        let wave: Vec<f32> = (start..start + len)
            .map(|n| 0.5 * (TAU * ((n as f32 * step) % 1.0)).sin())
            .collect();
        PremixBuffer::new(vec![wave; self.channels]).with_userdata(index)
    }
}

fn produce_rows(tone: ToneSpec, tx: Sender<PremixBuffer>, cancel: &CancelToken) {
    for index in 0..tone.rows() {
        if cancel.is_cancelled() {
            tracing::debug!(row = index, "producer cancelled");
            return;
        }
        if tx.send(tone.row(index)).is_err() {
            tracing::debug!(row = index, "device stopped consuming");
            return;
        }
    }
}
