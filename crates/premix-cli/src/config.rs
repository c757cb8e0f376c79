//! Render configuration: optional TOML file merged under CLI flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use premix_sink::{EngineConfig, OutputSettings};
use serde::Deserialize;

use crate::cli::RenderArgs;

/// Render settings loaded from TOML. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub device: Option<String>,
    pub out: Option<PathBuf>,
    pub hardware: Option<String>,
    pub channels: Option<u16>,
    pub sample_rate: Option<u32>,
    pub bits_per_sample: Option<u16>,
    pub seconds: Option<f32>,
    pub freq: Option<f32>,
    pub rows_per_second: Option<u32>,
    pub engine: Option<EngineFileConfig>,
}

/// `[engine]` table.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineFileConfig {
    pub poll_us: Option<u64>,
    pub pending_depth: Option<usize>,
    pub ring_seconds: Option<f32>,
    pub queue_depth: Option<usize>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg =
            toml::from_str::<FileConfig>(&raw).with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }
}

/// Resolved render job.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub settings: OutputSettings,
    pub seconds: f32,
    pub freq: f32,
    pub rows_per_second: u32,
    pub stats_json: bool,
}

impl RenderConfig {
    /// Merge flags over the file config over defaults.
    pub fn resolve(args: &RenderArgs, file: FileConfig) -> Result<Self> {
        let defaults = OutputSettings::default();
        let engine_file = file.engine.unwrap_or_default();
        let engine_defaults = EngineConfig::default();

        let engine = EngineConfig {
            poll_interval: args
                .poll_us
                .or(engine_file.poll_us)
                .map(Duration::from_micros)
                .unwrap_or(engine_defaults.poll_interval),
            pending_depth: args
                .pending_depth
                .or(engine_file.pending_depth)
                .unwrap_or(engine_defaults.pending_depth),
            ring_seconds: engine_file.ring_seconds.unwrap_or(engine_defaults.ring_seconds),
            queue_depth: engine_file.queue_depth.unwrap_or(engine_defaults.queue_depth),
        };

        let settings = OutputSettings {
            device_name: args
                .device
                .clone()
                .or(file.device)
                .unwrap_or(defaults.device_name),
            channels: args.channels.or(file.channels).unwrap_or(defaults.channels),
            sample_rate: args.rate.or(file.sample_rate).unwrap_or(defaults.sample_rate),
            bits_per_sample: args
                .bits
                .or(file.bits_per_sample)
                .unwrap_or(defaults.bits_per_sample),
            target_path: args.out.clone().or(file.out),
            hardware: normalize(args.hardware.clone().or(file.hardware)),
            on_buffer_playing: None,
            engine,
        };

        let seconds = args.seconds.or(file.seconds).unwrap_or(2.0);
        if !seconds.is_finite() || seconds <= 0.0 {
            anyhow::bail!("--seconds must be positive, got {seconds}");
        }
        let rows_per_second = args.rows_per_second.or(file.rows_per_second).unwrap_or(50);
        if rows_per_second == 0 {
            anyhow::bail!("--rows-per-second must be at least 1");
        }

        Ok(Self {
            settings,
            seconds,
            freq: args.freq.or(file.freq).unwrap_or(440.0),
            rows_per_second,
            stats_json: args.stats_json,
        })
    }
}

fn normalize(name: Option<String>) -> Option<String> {
    name.and_then(|name| {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
