//! Interleaving and quantization of premix buffers into backend byte layouts.
//!
//! Premix buffers arrive already split per output channel, so "mixing" here is
//! limited to interleaving frames and converting `f32` samples to the target
//! PCM width. Missing channels render as silence; extra channels are ignored.

use crate::config::PcmFormat;
use crate::premix::PremixBuffer;

/// Flattens premix buffers into interleaved little-endian PCM.
#[derive(Clone, Copy, Debug)]
pub struct Mixer {
    format: PcmFormat,
}

impl Mixer {
    pub fn new(format: PcmFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> PcmFormat {
        self.format
    }

    /// Bytes needed to hold `samples_len` interleaved frames.
    pub fn byte_len(&self, samples_len: usize) -> usize {
        samples_len * self.format.block_align()
    }

    /// Interleave `buf` into a freshly allocated byte vector.
    pub fn flatten(&self, buf: &PremixBuffer) -> Vec<u8> {
        let mut out = vec![0u8; self.byte_len(buf.samples_len)];
        self.flatten_to(buf, &mut out, &mut []);
        out
    }

    /// Interleave `buf` across two destination regions (a ring segment that
    /// wraps splits into a tail region and a head region).
    ///
    /// Returns the number of bytes written; stops early when both regions are full.
    pub fn flatten_to(&self, buf: &PremixBuffer, first: &mut [u8], second: &mut [u8]) -> usize {
        let channels = usize::from(self.format.channels);
        let width = self.format.bytes_per_sample();
        let bits = self.format.bits_per_sample;
        let mut dst = first.iter_mut().chain(second.iter_mut());
        let mut written = 0usize;

        for frame in 0..buf.samples_len {
            for ch in 0..channels {
                let bytes = encode_sample(buf.sample(ch, frame), bits);
                for b in &bytes[..width] {
                    match dst.next() {
                        Some(d) => *d = *b,
                        None => return written,
                    }
                    written += 1;
                }
            }
        }
        written
    }

    /// Per-channel signed integer samples at the target bit depth (FLAC input).
    pub fn flatten_to_ints(&self, buf: &PremixBuffer) -> Vec<Vec<i32>> {
        let bits = self.format.bits_per_sample;
        (0..usize::from(self.format.channels))
            .map(|ch| {
                (0..buf.samples_len)
                    .map(|frame| quantize(buf.sample(ch, frame), bits))
                    .collect()
            })
            .collect()
    }
}

/// Convert a nominal `[-1.0, 1.0]` sample to a signed integer of `bits` width.
pub fn quantize(sample: f32, bits: u16) -> i32 {
    let s = if sample.is_finite() {
        f64::from(sample.clamp(-1.0, 1.0))
    } else {
        0.0
    };
    let max = f64::from((1u32 << (bits.clamp(2, 32) - 1)) - 1);
    (s * max).round() as i32
}

/// Little-endian PCM bytes for one sample; only the first `bits / 8` are meaningful.
///
/// 8-bit PCM is unsigned (offset 128), wider depths are signed.
pub fn encode_sample(sample: f32, bits: u16) -> [u8; 4] {
    let v = quantize(sample, bits);
    if bits == 8 {
        [(v + 128) as u8, 0, 0, 0]
    } else {
        v.to_le_bytes()
    }
}

/// Inverse of [`encode_sample`]: read one little-endian PCM sample as `f32`.
pub fn decode_sample(bytes: &[u8], bits: u16) -> f32 {
    match bits {
        8 => (f32::from(bytes[0]) - 128.0) / 128.0,
        16 => f32::from(i16::from_le_bytes([bytes[0], bytes[1]])) / 32_768.0,
        24 => {
            let v = i32::from_le_bytes([0, bytes[0], bytes[1], bytes[2]]) >> 8;
            v as f32 / 8_388_608.0
        }
        32 => {
            let v = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            (f64::from(v) / 2_147_483_648.0) as f32
        }
        _ => 0.0,
    }
}
