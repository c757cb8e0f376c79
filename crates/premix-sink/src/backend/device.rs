//! Output device discovery and selection.
//!
//! Thin wrappers around CPAL for:
//! - listing available output devices
//! - selecting either the default device or a device by substring match
//! - choosing a stream config that renders the requested PCM format as-is

use cpal::traits::{DeviceTrait, HostTrait};

use crate::config::PcmFormat;
use crate::error::{Result, SinkError};

/// Pick the first output device matching `needle` (case-insensitive), or the default device.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    let mut devices: Vec<cpal::Device> = host.output_devices()?.collect();

    if let Some(needle) = needle.filter(|n| !n.trim().is_empty()) {
        if let Some(d) = devices.drain(..).find(|d| {
            d.description()
                .ok()
                .map(|n| matches_device_name(&n.name(), needle))
                .unwrap_or(false)
        }) {
            return Ok(d);
        }
        return Err(SinkError::BackendInit(format!(
            "no output device matched: {needle}"
        )));
    }

    host.default_output_device()
        .ok_or_else(|| SinkError::BackendInit("no default output device".to_string()))
}

/// Choose an output config with exactly the requested channel count and rate.
///
/// The sink never resamples or remaps channels, so ranges that cannot play
/// the format unchanged are skipped. Among the rest, float formats win.
pub fn pick_output_config(device: &cpal::Device, format: PcmFormat) -> Result<cpal::SupportedStreamConfig> {
    let mut best: Option<(u8, cpal::SupportedStreamConfig)> = None;

    for range in device.supported_output_configs()? {
        if !range_supports(
            range.channels(),
            range.min_sample_rate(),
            range.max_sample_rate(),
            format,
        ) {
            continue;
        }
        let rank = sample_format_rank(range.sample_format());
        if rank >= UNSUPPORTED_RANK {
            continue;
        }
        let replace = best.as_ref().is_none_or(|(best_rank, _)| rank < *best_rank);
        if replace {
            best = Some((rank, range.with_sample_rate(format.sample_rate)));
        }
    }

    best.map(|(_, cfg)| cfg).ok_or_else(|| {
        SinkError::BackendInit(format!(
            "no output config for {} channels at {} Hz",
            format.channels, format.sample_rate
        ))
    })
}

/// Stream buffer size near `target_frames`, clamped to what the device allows.
///
/// Returns `None` when the device only supports its default size.
pub fn pick_buffer_size(config: &cpal::SupportedStreamConfig, target_frames: u32) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            Some(cpal::BufferSize::Fixed(target_frames.clamp(*min, (*max).max(*min))))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

fn range_supports(channels: u16, min_rate: u32, max_rate: u32, format: PcmFormat) -> bool {
    channels == format.channels && format.sample_rate >= min_rate && format.sample_rate <= max_rate
}

const UNSUPPORTED_RANK: u8 = 10;

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => UNSUPPORTED_RANK,
    }
}

/// Lightweight output device metadata for `premix list-devices`.
#[derive(Clone, Debug)]
pub struct DeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub max_channels: u16,
    pub min_rate: u32,
    pub max_rate: u32,
}

/// Describe every output device on the default host.
pub fn list_devices() -> Result<Vec<DeviceInfo>> {
    list_device_infos(&cpal::default_host())
}

/// Return device metadata for output selection.
///
/// Devices that report no usable config range are skipped with a warning.
pub fn list_device_infos(host: &cpal::Host) -> Result<Vec<DeviceInfo>> {
    let default_name = host
        .default_output_device()
        .and_then(|d| d.description().ok())
        .map(|d| d.name().to_string());

    let mut out = Vec::new();
    for d in host.output_devices()? {
        let Ok(description) = d.description() else {
            continue;
        };
        let name = description.name().to_string();
        let mut min_rate = u32::MAX;
        let mut max_rate = 0u32;
        let mut max_channels = 0u16;
        if let Ok(ranges) = d.supported_output_configs() {
            for r in ranges {
                min_rate = min_rate.min(r.min_sample_rate());
                max_rate = max_rate.max(r.max_sample_rate());
                max_channels = max_channels.max(r.channels());
            }
        }

        if max_rate == 0 || max_rate < min_rate {
            tracing::warn!(device = %name, "skipping device with no usable output config");
            continue;
        }

        out.push(DeviceInfo {
            is_default: default_name.as_deref() == Some(name.as_str()),
            name,
            max_channels,
            min_rate,
            max_rate,
        });
    }
    Ok(out)
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(channels: u16, rate: u32) -> PcmFormat {
        PcmFormat::new(channels, rate, 16).unwrap()
    }

    #[test]
    fn matches_device_name_is_case_insensitive() {
        assert!(matches_device_name("USB DAC", "dac"));
        assert!(matches_device_name("usb dac", "USB"));
        assert!(!matches_device_name("USB DAC", "speaker"));
        assert!(!matches_device_name("USB DAC", "  "));
    }

    #[test]
    fn range_requires_exact_channels() {
        assert!(range_supports(2, 44_100, 48_000, format(2, 44_100)));
        assert!(!range_supports(6, 44_100, 48_000, format(2, 44_100)));
    }

    #[test]
    fn range_requires_rate_inside_bounds() {
        assert!(range_supports(2, 8_000, 192_000, format(2, 96_000)));
        assert!(!range_supports(2, 44_100, 48_000, format(2, 22_050)));
        assert!(!range_supports(2, 44_100, 48_000, format(2, 96_000)));
    }

    #[test]
    fn float_formats_rank_first() {
        assert!(sample_format_rank(cpal::SampleFormat::F32) < sample_format_rank(cpal::SampleFormat::I16));
        assert!(sample_format_rank(cpal::SampleFormat::I16) < sample_format_rank(cpal::SampleFormat::U16));
        assert_eq!(sample_format_rank(cpal::SampleFormat::U8), UNSUPPORTED_RANK);
    }
}
