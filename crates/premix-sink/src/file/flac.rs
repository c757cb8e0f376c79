//! FLAC stream writer.
//!
//! Emits the `fLaC` marker, one STREAMINFO block and one frame per premix
//! buffer (split when a buffer exceeds the 16-bit block size field). Frames use
//! the variable blocking strategy, so each header carries the number of its
//! first sample. Subframes are CONSTANT when every sample of the channel is the
//! same and VERBATIM otherwise; no prediction is attempted.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use crate::backend::StreamBackend;
use crate::config::PcmFormat;
use crate::error::{Result, SinkError};
use crate::mix::Mixer;
use crate::premix::PremixBuffer;

const STREAMINFO_POS: u64 = 8;
const STREAMINFO_LEN: usize = 34;
const MIN_BLOCK: u16 = 16;
const MAX_BLOCK: u16 = 65535;
/// Largest rate STREAMINFO can carry (20 bits), restricted to what frame headers can express.
const MAX_SAMPLE_RATE: u32 = 655_350;

const SUBFRAME_CONSTANT: u64 = 0b000000;
const SUBFRAME_VERBATIM: u64 = 0b000001;

/// Running block and frame size statistics for STREAMINFO.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct StreamStats {
    min_block: u16,
    max_block: u16,
    min_frame: u32,
    max_frame: u32,
    total_samples: u64,
}

impl StreamStats {
    fn record(&mut self, block: u16, frame_len: usize) {
        let frame_len = frame_len as u32;
        if self.total_samples == 0 {
            self.min_block = block;
            self.max_block = block;
            self.min_frame = frame_len;
            self.max_frame = frame_len;
        } else {
            self.min_block = self.min_block.min(block);
            self.max_block = self.max_block.max(block);
            self.min_frame = self.min_frame.min(frame_len);
            self.max_frame = self.max_frame.max(frame_len);
        }
        self.total_samples += u64::from(block);
    }
}

pub struct FlacWriter<W: Write + Seek = BufWriter<File>> {
    out: Option<W>,
    mixer: Mixer,
    format: PcmFormat,
    stats: StreamStats,
}

impl FlacWriter {
    /// Create (or truncate) `path` and write the stream header.
    pub fn create(path: &Path, format: PcmFormat) -> Result<Self> {
        check_format(format)?;
        let file = File::create(path)?;
        tracing::debug!(path = %path.display(), "flac output created");
        Self::new(BufWriter::new(file), format)
    }
}

impl<W: Write + Seek + Send> FlacWriter<W> {
    pub fn new(mut out: W, format: PcmFormat) -> Result<Self> {
        check_format(format)?;
        out.write_all(b"fLaC")?;
        // Last-metadata-block flag + type 0 (STREAMINFO), 24-bit length.
        out.write_all(&[0x80, 0, 0, STREAMINFO_LEN as u8])?;
        out.write_all(&streaminfo(format, None))?;
        Ok(Self {
            out: Some(out),
            mixer: Mixer::new(format),
            format,
            stats: StreamStats::default(),
        })
    }

    pub fn get_ref(&self) -> Option<&W> {
        self.out.as_ref()
    }

    fn out(&mut self) -> Result<&mut W> {
        self.out.as_mut().ok_or(SinkError::Closed)
    }
}

fn check_format(format: PcmFormat) -> Result<()> {
    if format.sample_rate > MAX_SAMPLE_RATE {
        return Err(SinkError::InvalidFormat(format!(
            "flac cannot carry a {} Hz sample rate",
            format.sample_rate
        )));
    }
    Ok(())
}

impl<W: Write + Seek + Send> StreamBackend for FlacWriter<W> {
    fn write_frame(&mut self, premix: &PremixBuffer) -> Result<usize> {
        if premix.samples_len == 0 {
            return Ok(0);
        }
        let channels = self.mixer.flatten_to_ints(premix);
        let mut written = 0;
        let mut start = 0;
        while start < premix.samples_len {
            let block = (premix.samples_len - start).min(usize::from(MAX_BLOCK));
            let slices: Vec<&[i32]> = channels.iter().map(|c| &c[start..start + block]).collect();
            let frame = encode_frame(self.format, self.stats.total_samples, &slices);
            self.out()?.write_all(&frame)?;
            self.stats.record(block as u16, frame.len());
            written += frame.len();
            start += block;
        }
        Ok(written)
    }

    /// Patch STREAMINFO with the real block/frame sizes and sample count.
    ///
    /// The byte total is not needed: FLAC records samples, which the writer counts itself.
    fn finalize(&mut self, _total_bytes: u64) -> Result<()> {
        let info = streaminfo(self.format, Some(self.stats));
        let out = self.out()?;
        out.seek(SeekFrom::Start(STREAMINFO_POS))?;
        out.write_all(&info)?;
        out.seek(SeekFrom::End(0))?;
        out.flush()?;
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut out) = self.out.take() {
            if let Err(err) = out.flush() {
                tracing::warn!(error = %err, "flac flush on close failed");
            }
        }
    }
}

/// STREAMINFO body. Before any frame is written the block sizes are the
/// generic 16..65535 range and everything else is unknown (zero).
fn streaminfo(format: PcmFormat, stats: Option<StreamStats>) -> [u8; STREAMINFO_LEN] {
    let (min_block, max_block, min_frame, max_frame, total) = match stats {
        Some(s) if s.total_samples > 0 => {
            let (min_block, max_block) = block_bounds(s.min_block, s.max_block);
            (min_block, max_block, s.min_frame, s.max_frame, s.total_samples)
        }
        _ => (MIN_BLOCK, MAX_BLOCK, 0, 0, 0),
    };

    let mut w = BitWriter::default();
    w.write(u64::from(min_block), 16);
    w.write(u64::from(max_block), 16);
    w.write(u64::from(min_frame), 24);
    w.write(u64::from(max_frame), 24);
    w.write(u64::from(format.sample_rate), 20);
    w.write(u64::from(format.channels - 1), 3);
    w.write(u64::from(format.bits_per_sample - 1), 5);
    w.write(total & 0xF_FFFF_FFFF, 36);
    for _ in 0..4 {
        w.write(0, 32); // MD5 not computed
    }

    let mut out = [0u8; STREAMINFO_LEN];
    out.copy_from_slice(&w.finish());
    out
}

/// Block size bounds advertised in STREAMINFO.
///
/// Decoders require both bounds to be at least 16, even when the last block is
/// shorter. Equal bounds announce a fixed-blocksize stream, which contradicts
/// the variable-blocking frame headers, so uniform blocks get widened bounds.
fn block_bounds(min_block: u16, max_block: u16) -> (u16, u16) {
    let min_block = min_block.max(MIN_BLOCK);
    let max_block = max_block.max(min_block);
    if min_block < max_block {
        (min_block, max_block)
    } else if max_block < MAX_BLOCK {
        (min_block, MAX_BLOCK)
    } else {
        (MIN_BLOCK, MAX_BLOCK)
    }
}

/// Encode one frame holding `channels[c].len()` samples per channel.
fn encode_frame(format: PcmFormat, first_sample: u64, channels: &[&[i32]]) -> Vec<u8> {
    let block = channels.first().map_or(0, |c| c.len());
    let bits = u32::from(format.bits_per_sample);

    let (rate_code, rate_tail) = sample_rate_code(format.sample_rate);
    let mut header = vec![0xFF, 0xF9];
    header.push(0b0111_0000 | rate_code);
    header.push(((format.channels as u8 - 1) << 4) | (sample_size_code(format.bits_per_sample) << 1));
    write_coded_number(&mut header, first_sample);
    header.extend_from_slice(&((block - 1) as u16).to_be_bytes());
    header.extend_from_slice(&rate_tail);
    header.push(crc8(&header));

    let mut w = BitWriter::from_bytes(header);
    for samples in channels {
        let constant = samples.windows(2).all(|pair| pair[0] == pair[1]);
        w.write(0, 1);
        if constant {
            w.write(SUBFRAME_CONSTANT, 6);
            w.write(0, 1);
            w.write_signed(samples[0], bits);
        } else {
            w.write(SUBFRAME_VERBATIM, 6);
            w.write(0, 1);
            for s in samples.iter() {
                w.write_signed(*s, bits);
            }
        }
    }

    let mut frame = w.finish();
    let crc = crc16(&frame);
    frame.extend_from_slice(&crc.to_be_bytes());
    frame
}

/// Frame header rate code plus the bytes that follow the block size for rates
/// outside the fixed table.
fn sample_rate_code(rate: u32) -> (u8, Vec<u8>) {
    let code = match rate {
        88_200 => 0b0001,
        176_400 => 0b0010,
        192_000 => 0b0011,
        8_000 => 0b0100,
        16_000 => 0b0101,
        22_050 => 0b0110,
        24_000 => 0b0111,
        32_000 => 0b1000,
        44_100 => 0b1001,
        48_000 => 0b1010,
        96_000 => 0b1011,
        _ if rate % 1000 == 0 && rate / 1000 <= 0xFF => {
            return (0b1100, vec![(rate / 1000) as u8]);
        }
        _ if rate <= 0xFFFF => return (0b1101, (rate as u16).to_be_bytes().to_vec()),
        _ if rate % 10 == 0 && rate / 10 <= 0xFFFF => {
            return (0b1110, ((rate / 10) as u16).to_be_bytes().to_vec());
        }
        // Take the rate from STREAMINFO.
        _ => 0b0000,
    };
    (code, Vec::new())
}

/// Frame header sample size code.
///
/// 32-bit samples use "from STREAMINFO": the explicit 32-bit code is newer than
/// the decoders in use and is still rejected by them as reserved.
fn sample_size_code(bits: u16) -> u8 {
    match bits {
        8 => 0b001,
        16 => 0b100,
        24 => 0b110,
        _ => 0b000,
    }
}

/// UTF-8 style variable-length number used for frame/sample numbers (up to 36 bits).
fn write_coded_number(out: &mut Vec<u8>, value: u64) {
    if value < 0x80 {
        out.push(value as u8);
        return;
    }
    let width = 64 - value.leading_zeros();
    let len: u32 = match width {
        0..=11 => 2,
        12..=16 => 3,
        17..=21 => 4,
        22..=26 => 5,
        27..=31 => 6,
        _ => 7,
    };
    let lead = (0xFF00u16 >> len) as u8;
    let first_bits = 7 - len;
    let first = (value >> (6 * (len - 1))) as u8 & ((1u16 << first_bits) - 1) as u8;
    out.push(lead | first);
    for i in (0..len - 1).rev() {
        out.push(0x80 | ((value >> (6 * i)) & 0x3F) as u8);
    }
}

fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 { (crc << 1) ^ 0x07 } else { crc << 1 };
        }
    }
    crc
}

fn crc16(data: &[u8]) -> u16 {
    let mut crc = 0u16;
    for byte in data {
        crc ^= u16::from(*byte) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 { (crc << 1) ^ 0x8005 } else { crc << 1 };
        }
    }
    crc
}

/// MSB-first bit packer.
#[derive(Default)]
struct BitWriter {
    bytes: Vec<u8>,
    acc: u64,
    nbits: u32,
}

impl BitWriter {
    fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            acc: 0,
            nbits: 0,
        }
    }

    /// Append the low `bits` bits of `value` (`bits <= 32`).
    fn write(&mut self, value: u64, bits: u32) {
        if bits == 0 {
            return;
        }
        let mask = (1u64 << bits) - 1;
        self.acc = (self.acc << bits) | (value & mask);
        self.nbits += bits;
        while self.nbits >= 8 {
            self.nbits -= 8;
            self.bytes.push((self.acc >> self.nbits) as u8);
        }
        self.acc &= (1u64 << self.nbits) - 1;
    }

    fn write_signed(&mut self, value: i32, bits: u32) {
        self.write(u64::from(value as u32), bits);
    }

    /// Zero-pad to a byte boundary and return the bytes.
    fn finish(mut self) -> Vec<u8> {
        if self.nbits > 0 {
            let pad = 8 - self.nbits;
            self.write(0, pad);
        }
        self.bytes
    }
}
