//! Ring-buffer backend on top of a CPAL output stream.
//!
//! The ring holds interleaved PCM bytes in the output format. The CPAL callback
//! is the hardware play cursor: it decodes bytes at the read position, replaces
//! them with silence and advances. Every time the cursor passes a watched offset
//! the watcher gets one notification.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crossbeam_channel::{Receiver, Sender};

use crate::backend::output::{OutputThread, RenderSource};
use crate::backend::{RingBufferBackend, RingSegment};
use crate::config::{OutputSettings, PcmFormat};
use crate::error::{Result, SinkError};
use crate::mix::decode_sample;

pub struct CpalRing {
    shared: Arc<RingShared>,
    output: Mutex<Option<OutputThread>>,
}

struct RingShared {
    format: PcmFormat,
    ring: Mutex<Vec<u8>>,
    ring_len: usize,
    read_pos: AtomicUsize,
    playing: AtomicBool,
    watches: Mutex<Vec<Watch>>,
}

struct Watch {
    offset: usize,
    tx: Sender<()>,
}

/// Region handed to the writer; copied into the ring on unlock.
pub struct CpalSegment {
    offset: usize,
    first: Vec<u8>,
    second: Vec<u8>,
}

impl RingSegment for CpalSegment {
    fn regions(&mut self) -> (&mut [u8], &mut [u8]) {
        (&mut self.first, &mut self.second)
    }
}

impl CpalRing {
    /// Open the output device and start a stream that plays silence until
    /// [`RingBufferBackend::start_looping`] is called.
    pub fn open(settings: &OutputSettings) -> Result<Self> {
        let format = settings.pcm_format()?;
        let ring = Self::detached(format, format.ring_bytes(settings.engine.ring_seconds));
        let output = OutputThread::spawn(
            "cpal",
            settings.hardware.clone(),
            format,
            RingRender {
                shared: ring.shared.clone(),
            },
        )?;
        *ring.output_slot() = Some(output);
        tracing::info!(ring_len = ring.shared.ring_len, "cpal ring opened");
        Ok(ring)
    }

    /// A ring with no output stream attached.
    fn detached(format: PcmFormat, ring_len: usize) -> Self {
        Self {
            shared: Arc::new(RingShared {
                format,
                ring: Mutex::new(vec![silence_byte(format); ring_len]),
                ring_len,
                read_pos: AtomicUsize::new(0),
                playing: AtomicBool::new(false),
                watches: Mutex::new(Vec::new()),
            }),
            output: Mutex::new(None),
        }
    }

    fn output_slot(&self) -> MutexGuard<'_, Option<OutputThread>> {
        self.output.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl RingBufferBackend for CpalRing {
    type Segment = CpalSegment;

    fn ring_len(&self) -> usize {
        self.shared.ring_len
    }

    fn watch_position(&self, offset: usize) -> Result<Receiver<()>> {
        if offset >= self.shared.ring_len {
            return Err(SinkError::Fatal(format!(
                "watch offset {offset} outside ring of {}",
                self.shared.ring_len
            )));
        }
        let (tx, rx) = crossbeam_channel::unbounded();
        self.shared.watches().push(Watch { offset, tx });
        Ok(rx)
    }

    fn start_looping(&self) -> Result<()> {
        self.shared.ring().fill(silence_byte(self.shared.format));
        self.shared.read_pos.store(0, Ordering::Release);
        self.shared.playing.store(true, Ordering::Release);
        Ok(())
    }

    fn stop(&self) {
        self.shared.playing.store(false, Ordering::Release);
        self.shared.watches().clear();
    }

    fn lock_segment(&self, offset: usize, len: usize) -> Result<CpalSegment> {
        let ring_len = self.shared.ring_len;
        if offset >= ring_len || len > ring_len {
            return Err(SinkError::Transient(format!(
                "lock {offset}+{len} outside ring of {ring_len}"
            )));
        }
        let first = len.min(ring_len - offset);
        Ok(CpalSegment {
            offset,
            first: vec![0; first],
            second: vec![0; len - first],
        })
    }

    fn unlock(&self, segment: CpalSegment) -> Result<()> {
        let mut ring = self.shared.ring();
        let end = segment.offset + segment.first.len();
        if end > ring.len() || segment.second.len() > ring.len() {
            return Err(SinkError::Transient("segment does not fit the ring".to_string()));
        }
        ring[segment.offset..end].copy_from_slice(&segment.first);
        ring[..segment.second.len()].copy_from_slice(&segment.second);
        Ok(())
    }

    fn read_position(&self) -> Result<usize> {
        Ok(self.shared.read_pos.load(Ordering::Acquire))
    }

    fn close(&self) {
        self.stop();
        if let Some(mut output) = self.output_slot().take() {
            output.stop();
            tracing::debug!("cpal ring output stopped");
        }
    }
}

impl RingShared {
    fn ring(&self) -> MutexGuard<'_, Vec<u8>> {
        self.ring.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn watches(&self) -> MutexGuard<'_, Vec<Watch>> {
        self.watches.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Play `out.len()` samples from the ring and advance the cursor.
    fn render(&self, out: &mut [f32]) {
        if !self.playing.load(Ordering::Acquire) || self.ring_len == 0 {
            out.fill(0.0);
            return;
        }
        let bits = self.format.bits_per_sample;
        let width = self.format.bytes_per_sample();
        let silence = silence_byte(self.format);

        let prev = self.read_pos.load(Ordering::Acquire);
        let mut pos = prev;
        {
            let mut ring = self.ring();
            for slot in out.iter_mut() {
                let sample = &mut ring[pos..pos + width];
                *slot = decode_sample(sample, bits);
                sample.fill(silence);
                pos += width;
                if pos >= self.ring_len {
                    pos = 0;
                }
            }
        }
        self.read_pos.store(pos, Ordering::Release);

        let advanced = out.len() * width;
        let mut watches = self.watches();
        watches.retain(|watch| {
            let crossings = crossings(prev, advanced, watch.offset, self.ring_len);
            (0..crossings).all(|_| watch.tx.send(()).is_ok())
        });
    }
}

/// How many times a cursor moving `advanced` bytes forward from `prev` passes
/// `offset` in a ring of `ring_len` bytes. Landing exactly on the offset counts;
/// starting on it does not.
fn crossings(prev: usize, advanced: usize, offset: usize, ring_len: usize) -> usize {
    let ring_len = ring_len as i64;
    let start = prev as i64 - offset as i64;
    let end = start + advanced as i64;
    (end.div_euclid(ring_len) - start.div_euclid(ring_len)) as usize
}

fn silence_byte(format: PcmFormat) -> u8 {
    if format.bits_per_sample == 8 { 128 } else { 0 }
}

struct RingRender {
    shared: Arc<RingShared>,
}

impl RenderSource for RingRender {
    fn render(&mut self, out: &mut [f32]) {
        self.shared.render(out);
    }
}
