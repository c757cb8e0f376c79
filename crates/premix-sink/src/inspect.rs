//! Read rendered files back with Symphonia.
//!
//! Used by `premix inspect` and by tests that check what the file devices wrote.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{Result, SinkError};

/// Decoded contents of a rendered file.
#[derive(Clone, Debug, Default)]
pub struct RenderedAudio {
    pub codec: Option<String>,
    pub channels: usize,
    pub sample_rate: u32,
    pub bits_per_sample: Option<u32>,
    /// Frame count declared by the container, if any.
    pub declared_frames: Option<u64>,
    /// Interleaved samples in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
}

impl RenderedAudio {
    /// Decoded frames.
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels
        }
    }

    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.frames() as u64).saturating_mul(1000) / u64::from(self.sample_rate)
    }

    /// Samples of one channel.
    pub fn channel(&self, index: usize) -> Vec<f32> {
        if index >= self.channels {
            return Vec::new();
        }
        self.samples
            .iter()
            .skip(index)
            .step_by(self.channels)
            .copied()
            .collect()
    }
}

/// Open and fully decode `path`.
pub fn read_rendered(path: &Path) -> Result<RenderedAudio> {
    let file = File::open(path)?;
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| SinkError::Inspect("no default audio track".to_string()))?;
    let track_id = track.id;
    let params: CodecParameters = track.codec_params.clone();
    let channels = params
        .channels
        .ok_or_else(|| SinkError::Inspect("unknown channel count".to_string()))?
        .count();
    let sample_rate = params
        .sample_rate
        .ok_or_else(|| SinkError::Inspect("unknown sample rate".to_string()))?;

    let mut decoder = symphonia::default::get_codecs().make(&params, &DecoderOptions::default())?;
    let mut samples = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };
        if packet.track_id() != track_id {
            continue;
        }
        let decoded = decoder.decode(&packet)?;
        let mut buf = SampleBuffer::<f32>::new(decoded.frames() as u64, *decoded.spec());
        buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buf.samples());
    }

    let rendered = RenderedAudio {
        codec: codec_name(&params),
        channels,
        sample_rate,
        bits_per_sample: params.bits_per_sample,
        declared_frames: params.n_frames,
        samples,
    };
    tracing::debug!(
        path = %path.display(),
        channels,
        sample_rate,
        frames = rendered.frames(),
        "rendered file decoded"
    );
    Ok(rendered)
}

fn codec_name(params: &CodecParameters) -> Option<String> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_PCM_U8 => "PCM_U8",
        CODEC_TYPE_PCM_S16LE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE => "PCM_S24",
        CODEC_TYPE_PCM_S32LE => "PCM_S32",
        _ => return None,
    };
    Some(name.to_string())
}
