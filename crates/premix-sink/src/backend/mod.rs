//! Backend capability interfaces consumed by the playback engines.
//!
//! A backend implements exactly one of these contracts; the registry pairs it
//! with the matching engine variant at construction time. Native handles
//! (events, hardware buffers, files) stay behind these traits.

use crossbeam_channel::Receiver;

use crate::error::Result;
use crate::premix::PremixBuffer;

pub mod cpal_queue;
pub mod cpal_ring;
pub mod device;
mod output;

/// A locked region of a ring buffer.
///
/// A lock that crosses the end of the ring yields two regions: the tail of the
/// ring first, then its head.
pub trait RingSegment: Send {
    fn regions(&mut self) -> (&mut [u8], &mut [u8]);
}

/// Fixed-size circular buffer with asynchronous wraparound notification.
///
/// Methods take `&self`: the engine calls them concurrently from its writer
/// and dispatcher tasks, and the backend is responsible for its own locking.
pub trait RingBufferBackend: Send + Sync {
    type Segment: RingSegment;

    /// Ring length in bytes (a whole number of frames).
    fn ring_len(&self) -> usize;

    /// Register a notification fired each time the play cursor passes `offset`.
    ///
    /// The cursor starts at 0 when looping starts, so a watch on offset 0 fires
    /// once per wrap and never at start.
    fn watch_position(&self, offset: usize) -> Result<Receiver<()>>;

    /// Reset the ring to silence and start looping from offset 0.
    fn start_looping(&self) -> Result<()>;

    /// Stop looping and release every position watch. Idempotent.
    fn stop(&self);

    /// Lock `len` bytes starting at physical `offset` for writing.
    fn lock_segment(&self, offset: usize, len: usize) -> Result<Self::Segment>;

    /// Commit and release a segment returned by [`RingBufferBackend::lock_segment`].
    fn unlock(&self, segment: Self::Segment) -> Result<()>;

    /// Current physical play cursor, in bytes, in `0..ring_len`.
    fn read_position(&self) -> Result<usize>;

    /// Release device resources. Idempotent.
    fn close(&self);
}

/// Backend accepting discrete buffer submissions with per-submission completion.
pub trait HeaderQueueBackend: Send {
    type Handle: Send;

    /// Submit one buffer of interleaved PCM bytes.
    ///
    /// May block while the backend's own submission queue is full.
    fn submit(&mut self, bytes: Vec<u8>) -> Result<Self::Handle>;

    fn is_finished(&self, handle: &Self::Handle) -> Result<bool>;

    /// Release a handle (finished or abandoned).
    fn release(&mut self, handle: Self::Handle);

    /// Abandon everything submitted and not yet played.
    fn reset(&mut self);

    /// Release device resources. Idempotent.
    fn close(&mut self);
}

/// Unbounded sequential writer without a playback clock (files).
pub trait StreamBackend: Send {
    /// Encode and write one premix buffer; returns the bytes written.
    fn write_frame(&mut self, premix: &PremixBuffer) -> Result<usize>;

    /// Back-patch length fields that depend on the total size and flush.
    ///
    /// May be called more than once; writing can continue afterwards.
    fn finalize(&mut self, total_bytes: u64) -> Result<()>;

    /// Release the underlying file. Idempotent.
    fn close(&mut self);
}
