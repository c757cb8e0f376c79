//! Ring-buffer engine.
//!
//! Drives backends whose native buffer is a fixed-size circular region with a
//! wraparound notification. Three tasks cooperate during `play`:
//! - **writer**: consumes premix buffers, waits for ring space, locks/fills/unlocks
//!   the next region and pushes `{play_offset, buffer}` into the pending FIFO
//! - **listener**: adds one ring length to `play_base` per wrap notification
//! - **dispatcher** (caller's thread): pops pending records in order and fires the
//!   callback once `play_base + read_position >= play_offset`
//!
//! `write_cursor` and `play_offset` are logical byte offsets that never wrap; they
//! are reduced modulo the ring length only to address the physical ring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, select};
use premix_types::{DeviceKind, PlayOutcome};

use crate::backend::{RingBufferBackend, RingSegment};
use crate::cancel::CancelToken;
use crate::config::{EngineConfig, OutputSettings};
use crate::engine::{Device, Dispatcher, Next, recv_next};
use crate::error::{Result, SinkError};
use crate::mix::Mixer;
use crate::pending::{PendingQueue, Pop};
use crate::premix::PremixBuffer;
use crate::status::PlaybackCounters;

/// Offset watched for wrap notifications.
const WRAP_WATCH_OFFSET: usize = 0;

/// A buffer written into the ring and waiting for playback to reach it.
struct PendingBuffer {
    play_offset: u64,
    premix: PremixBuffer,
}

/// Playback progress derived from wrap notifications plus the backend cursor.
struct PlayCursor {
    play_base: AtomicU64,
    ring_len: u64,
}

impl PlayCursor {
    fn new(ring_len: usize) -> Self {
        Self {
            play_base: AtomicU64::new(0),
            ring_len: ring_len as u64,
        }
    }

    /// Only the listener task calls this.
    fn add_wrap(&self) {
        self.play_base.fetch_add(self.ring_len, Ordering::AcqRel);
    }

    /// Bytes played so far.
    ///
    /// The base is read on both sides of the cursor read; if a wrap was counted in
    /// between, the read is retried. A wrap that has happened but not been counted
    /// yet makes the result smaller than the truth, never larger.
    fn played<B: RingBufferBackend>(&self, backend: &B) -> Result<u64> {
        loop {
            let before = self.play_base.load(Ordering::Acquire);
            let pos = backend.read_position()? as u64;
            let after = self.play_base.load(Ordering::Acquire);
            if before == after {
                return Ok(before + pos.min(self.ring_len.saturating_sub(1)));
            }
        }
    }
}

/// Stops the ring loop when dropped, on every exit path of `play`.
struct LoopGuard<'a, B: RingBufferBackend>(&'a B);

impl<B: RingBufferBackend> Drop for LoopGuard<'_, B> {
    fn drop(&mut self) {
        self.0.stop();
    }
}

pub struct RingEngine<B: RingBufferBackend> {
    name: String,
    backend: B,
    mixer: Mixer,
    config: EngineConfig,
    dispatcher: Dispatcher,
    closed: bool,
}

impl<B: RingBufferBackend> RingEngine<B> {
    pub fn new(name: impl Into<String>, backend: B, settings: &OutputSettings) -> Result<Self> {
        let format = settings.pcm_format()?;
        let ring_len = backend.ring_len();
        if ring_len < format.block_align() || ring_len % format.block_align() != 0 {
            return Err(SinkError::BackendInit(format!(
                "ring of {ring_len} bytes is not a whole number of {}-byte frames",
                format.block_align()
            )));
        }
        Ok(Self {
            name: name.into(),
            backend,
            mixer: Mixer::new(format),
            config: settings.engine.clone(),
            dispatcher: Dispatcher::new(DeviceKind::SoundCard, settings.on_buffer_playing.clone()),
            closed: false,
        })
    }
}

impl<B: RingBufferBackend> Device for RingEngine<B> {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::SoundCard
    }

    fn play(&mut self, input: Receiver<PremixBuffer>, cancel: &CancelToken) -> Result<PlayOutcome> {
        if self.closed {
            return Err(SinkError::Closed);
        }
        let backend = &self.backend;
        let ring_len = backend.ring_len();
        let poll = self.config.poll_interval();

        let wraps = backend.watch_position(WRAP_WATCH_OFFSET)?;
        // Armed before starting so a failed start still drops the watch.
        let _loop = LoopGuard(backend);
        backend.start_looping()?;
        tracing::debug!(device = %self.name, ring_len, "ring looping");

        let cursor = PlayCursor::new(ring_len);
        let pending = PendingQueue::new(self.config.pending_depth());
        let halt = cancel.child();
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);

        let writer = RingWriter {
            backend,
            mixer: self.mixer,
            cursor: &cursor,
            pending: &pending,
            dispatcher: &self.dispatcher,
            ring_len: ring_len as u64,
            block_align: self.mixer.format().block_align() as u64,
            poll,
        };

        let (write_result, dispatch_result) = thread::scope(|s| {
            let writer_halt = halt.clone();
            let writer_task = s.spawn(move || {
                let result = writer.run(&input, &writer_halt);
                writer.pending.close();
                if result.is_err() {
                    writer_halt.cancel();
                }
                result
            });

            let cursor_ref = &cursor;
            s.spawn(move || {
                loop {
                    select! {
                        recv(wraps) -> msg => match msg {
                            Ok(()) => cursor_ref.add_wrap(),
                            Err(_) => break,
                        },
                        recv(done_rx) -> _ => break,
                    }
                }
            });

            let dispatch_result = dispatch_loop(backend, &cursor, &pending, &self.dispatcher, &halt, poll);
            if dispatch_result.is_err() {
                halt.cancel();
            }
            drop(done_tx);

            let write_result = writer_task
                .join()
                .unwrap_or_else(|_| Err(SinkError::Fatal("ring writer panicked".to_string())));
            (write_result, dispatch_result)
        });

        let abandoned = pending.drain();
        if !abandoned.is_empty() {
            tracing::debug!(count = abandoned.len(), "abandoned pending ring buffers");
        }

        write_result?;
        dispatch_result?;
        if cancel.is_cancelled() {
            tracing::info!(device = %self.name, "ring playback cancelled");
            Ok(PlayOutcome::Cancelled)
        } else {
            Ok(PlayOutcome::Exhausted)
        }
    }

    fn counters(&self) -> &PlaybackCounters {
        self.dispatcher.counters()
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.backend.stop();
        self.backend.close();
        tracing::debug!(device = %self.name, "ring device closed");
    }
}

impl<B: RingBufferBackend> Drop for RingEngine<B> {
    fn drop(&mut self) {
        Device::close(self);
    }
}

/// Writer-side state borrowed by the writer task.
struct RingWriter<'a, B: RingBufferBackend> {
    backend: &'a B,
    mixer: Mixer,
    cursor: &'a PlayCursor,
    pending: &'a PendingQueue<PendingBuffer>,
    dispatcher: &'a Dispatcher,
    ring_len: u64,
    block_align: u64,
    poll: std::time::Duration,
}

impl<B: RingBufferBackend> RingWriter<'_, B> {
    fn run(&self, input: &Receiver<PremixBuffer>, halt: &CancelToken) -> Result<()> {
        let mut write_cursor: u64 = 0;

        loop {
            let premix = match recv_next(input, halt, self.poll) {
                Next::Item(premix) => premix,
                Next::Closed | Next::Cancelled | Next::Empty => return Ok(()),
            };
            self.dispatcher.counters().record_submitted();

            let len = self.mixer.byte_len(premix.samples_len) as u64;
            if len > self.ring_len {
                let err = SinkError::Transient(format!(
                    "buffer of {len} bytes exceeds ring of {} bytes",
                    self.ring_len
                ));
                self.dispatcher.drop_buffer(&premix, &err);
                continue;
            }

            if len > 0 {
                let Some(start) = self.wait_for_room(write_cursor, len, halt)? else {
                    return Ok(());
                };
                write_cursor = start;
                if !self.write_segment(&premix, write_cursor, len)? {
                    continue;
                }
                write_cursor += len;
                self.dispatcher.counters().record_bytes(len as usize);
            }

            let record = PendingBuffer {
                play_offset: write_cursor,
                premix,
            };
            if self.pending.push_or_cancel(record, halt, self.poll).is_err() {
                return Ok(());
            }
        }
    }

    /// Wait until `len` bytes at `write_cursor` no longer overlap unplayed audio.
    ///
    /// Returns the (possibly advanced) write offset, or `None` when halted. If
    /// playback has already passed the write cursor (underrun), writing resumes at
    /// the play position so callbacks stay aligned with what is audible.
    fn wait_for_room(&self, mut write_cursor: u64, len: u64, halt: &CancelToken) -> Result<Option<u64>> {
        loop {
            if halt.is_cancelled() {
                return Ok(None);
            }
            let played = self.cursor.played(self.backend)?;
            if played > write_cursor {
                let resumed = played.div_ceil(self.block_align) * self.block_align;
                tracing::debug!(
                    write_cursor,
                    resumed,
                    "ring underrun; resuming at play position"
                );
                write_cursor = resumed;
            }
            if write_cursor + len <= played + self.ring_len {
                return Ok(Some(write_cursor));
            }
            if !halt.sleep(self.poll) {
                return Ok(None);
            }
        }
    }

    /// Lock, fill and unlock one ring region.
    ///
    /// Returns `Ok(false)` when the buffer was dropped after a transient failure.
    fn write_segment(&self, premix: &PremixBuffer, write_cursor: u64, len: u64) -> Result<bool> {
        let offset = (write_cursor % self.ring_len) as usize;
        let mut segment = match self.backend.lock_segment(offset, len as usize) {
            Ok(segment) => segment,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                self.dispatcher.drop_buffer(premix, &err);
                return Ok(false);
            }
        };

        let (first, second) = segment.regions();
        let written = self.mixer.flatten_to(premix, first, second);
        if written as u64 != len {
            tracing::warn!(expected = len, written, "ring segment shorter than buffer");
        }

        match self.backend.unlock(segment) {
            Ok(()) => Ok(true),
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                self.dispatcher.drop_buffer(premix, &err);
                Ok(false)
            }
        }
    }
}

/// Pop pending buffers in order and fire callbacks as playback reaches them.
fn dispatch_loop<B: RingBufferBackend>(
    backend: &B,
    cursor: &PlayCursor,
    pending: &PendingQueue<PendingBuffer>,
    dispatcher: &Dispatcher,
    halt: &CancelToken,
    poll: std::time::Duration,
) -> Result<()> {
    loop {
        let record = match pending.pop_or_cancel(halt, poll) {
            Pop::Item(record) => record,
            Pop::Closed | Pop::Cancelled => return Ok(()),
        };
        loop {
            if cursor.played(backend)? >= record.play_offset {
                dispatcher.fire(&record.premix);
                break;
            }
            if !halt.sleep(poll) {
                return Ok(());
            }
        }
    }
}
