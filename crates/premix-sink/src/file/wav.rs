//! Canonical RIFF/WAVE linear PCM writer.
//!
//! The 44-byte header is written up front with zero sizes; `finalize` patches
//! the RIFF chunk size (offset 4) and the data chunk size (offset 40).

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use crate::backend::StreamBackend;
use crate::config::PcmFormat;
use crate::error::{Result, SinkError};
use crate::mix::Mixer;
use crate::premix::PremixBuffer;

const CHUNK_SIZE_POS: u64 = 4;
const DATA_SIZE_POS: u64 = 40;
/// Header bytes counted by the RIFF chunk size besides the data itself.
const RIFF_OVERHEAD: u64 = 36;

pub struct WavWriter<W: Write + Seek = BufWriter<File>> {
    out: Option<W>,
    mixer: Mixer,
}

impl WavWriter {
    /// Create (or truncate) `path` and write the header.
    pub fn create(path: &Path, format: PcmFormat) -> Result<Self> {
        let file = File::create(path)?;
        tracing::debug!(path = %path.display(), "wav output created");
        Self::new(BufWriter::new(file), format)
    }
}

impl<W: Write + Seek + Send> WavWriter<W> {
    pub fn new(mut out: W, format: PcmFormat) -> Result<Self> {
        write_header(&mut out, format)?;
        Ok(Self {
            out: Some(out),
            mixer: Mixer::new(format),
        })
    }

    pub fn get_ref(&self) -> Option<&W> {
        self.out.as_ref()
    }

    fn out(&mut self) -> Result<&mut W> {
        self.out.as_mut().ok_or(SinkError::Closed)
    }
}

fn write_header<W: Write>(out: &mut W, format: PcmFormat) -> Result<()> {
    out.write_all(b"RIFF")?;
    out.write_all(&0u32.to_le_bytes())?;
    out.write_all(b"WAVE")?;

    out.write_all(b"fmt ")?;
    out.write_all(&16u32.to_le_bytes())?;
    out.write_all(&1u16.to_le_bytes())?; // PCM
    out.write_all(&format.channels.to_le_bytes())?;
    out.write_all(&format.sample_rate.to_le_bytes())?;
    out.write_all(&(format.byte_rate() as u32).to_le_bytes())?;
    out.write_all(&(format.block_align() as u16).to_le_bytes())?;
    out.write_all(&format.bits_per_sample.to_le_bytes())?;

    out.write_all(b"data")?;
    out.write_all(&0u32.to_le_bytes())?;
    Ok(())
}

impl<W: Write + Seek + Send> StreamBackend for WavWriter<W> {
    fn write_frame(&mut self, premix: &PremixBuffer) -> Result<usize> {
        let bytes = self.mixer.flatten(premix);
        self.out()?.write_all(&bytes)?;
        Ok(bytes.len())
    }

    fn finalize(&mut self, total_bytes: u64) -> Result<()> {
        let max_data = u64::from(u32::MAX) - RIFF_OVERHEAD;
        if total_bytes > max_data {
            tracing::warn!(total_bytes, "wav data exceeds 4 GiB; size fields saturated");
        }
        let data = total_bytes.min(max_data) as u32;
        let chunk = data + RIFF_OVERHEAD as u32;

        let out = self.out()?;
        out.seek(SeekFrom::Start(CHUNK_SIZE_POS))?;
        out.write_all(&chunk.to_le_bytes())?;
        out.seek(SeekFrom::Start(DATA_SIZE_POS))?;
        out.write_all(&data.to_le_bytes())?;
        out.seek(SeekFrom::End(0))?;
        out.flush()?;
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut out) = self.out.take() {
            if let Err(err) = out.flush() {
                tracing::warn!(error = %err, "wav flush on close failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn u32_at(bytes: &[u8], pos: usize) -> u32 {
        u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap())
    }

    fn u16_at(bytes: &[u8], pos: usize) -> u16 {
        u16::from_le_bytes(bytes[pos..pos + 2].try_into().unwrap())
    }

    #[test]
    fn header_layout() {
        let format = PcmFormat::new(2, 44_100, 16).unwrap();
        let writer = WavWriter::new(Cursor::new(Vec::new()), format).unwrap();
        let bytes = writer.get_ref().unwrap().get_ref();
        assert_eq!(bytes.len(), 44);
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..16], b"WAVEfmt ");
        assert_eq!(u32_at(bytes, 16), 16);
        assert_eq!(u16_at(bytes, 20), 1);
        assert_eq!(u16_at(bytes, 22), 2);
        assert_eq!(u32_at(bytes, 24), 44_100);
        assert_eq!(u32_at(bytes, 28), 176_400);
        assert_eq!(u16_at(bytes, 32), 4);
        assert_eq!(u16_at(bytes, 34), 16);
        assert_eq!(&bytes[36..40], b"data");
        assert_eq!(u32_at(bytes, 40), 0);
    }

    #[test]
    fn finalize_patches_sizes_for_two_eight_bit_buffers() {
        let format = PcmFormat::new(1, 8_000, 8).unwrap();
        let mut writer = WavWriter::new(Cursor::new(Vec::new()), format).unwrap();
        let mut total = 0;
        for _ in 0..2 {
            total += writer.write_frame(&PremixBuffer::silence(1, 10)).unwrap() as u64;
        }
        writer.finalize(total).unwrap();

        let bytes = writer.get_ref().unwrap().get_ref();
        assert_eq!(bytes.len(), 64);
        assert_eq!(u32_at(bytes, 4), 56);
        assert_eq!(u32_at(bytes, 40), 20);
        // 8-bit silence is the unsigned midpoint.
        assert!(bytes[44..].iter().all(|b| *b == 128));
    }

    #[test]
    fn writing_continues_after_finalize() {
        let format = PcmFormat::new(1, 8_000, 16).unwrap();
        let mut writer = WavWriter::new(Cursor::new(Vec::new()), format).unwrap();
        writer.write_frame(&PremixBuffer::new(vec![vec![0.5; 3]])).unwrap();
        writer.finalize(6).unwrap();
        writer.write_frame(&PremixBuffer::new(vec![vec![-0.5; 2]])).unwrap();
        writer.finalize(10).unwrap();

        let bytes = writer.get_ref().unwrap().get_ref();
        assert_eq!(bytes.len(), 54);
        assert_eq!(u32_at(bytes, 40), 10);
        assert_eq!(u32_at(bytes, 4), 46);
    }

    #[test]
    fn write_after_close_is_rejected() {
        let format = PcmFormat::new(1, 8_000, 16).unwrap();
        let mut writer = WavWriter::new(Cursor::new(Vec::new()), format).unwrap();
        writer.close();
        writer.close();
        assert!(matches!(
            writer.write_frame(&PremixBuffer::silence(1, 1)),
            Err(SinkError::Closed)
        ));
    }
}
