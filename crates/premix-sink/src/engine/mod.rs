//! Playback synchronization engines.
//!
//! Each engine drives one backend capability and exposes the same [`Device`]
//! contract to the producer:
//! - [`ring::RingEngine`] for circular buffers with wrap notifications
//! - [`header::HeaderQueueEngine`] for submit-and-poll backends
//! - [`stream::StreamEngine`] for file writers without a clock
//!
//! Shared pieces live here: input consumption with cancellation and the
//! dispatcher that fires callbacks and keeps the counters.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use premix_types::{DeviceKind, PlayOutcome, SinkStatus};

use crate::cancel::CancelToken;
use crate::config::BufferPlayingFn;
use crate::error::{Result, SinkError};
use crate::premix::PremixBuffer;
use crate::status::PlaybackCounters;

pub mod header;
pub mod ring;
pub mod stream;

/// An output device: one backend wrapped by its engine.
pub trait Device: Send {
    /// Registered device name.
    fn name(&self) -> &str;

    fn kind(&self) -> DeviceKind;

    /// Consume premix buffers from `input` until it disconnects or `cancel` fires.
    ///
    /// The "now playing" callback fires exactly once per accepted buffer, in
    /// submission order, no earlier than the backend confirms playback.
    fn play(&mut self, input: Receiver<PremixBuffer>, cancel: &CancelToken) -> Result<PlayOutcome>;

    fn counters(&self) -> &PlaybackCounters;

    fn status(&self) -> SinkStatus {
        self.counters().snapshot(self.name(), self.kind())
    }

    /// Release backend resources. Safe to call more than once.
    fn close(&mut self);
}

/// Fires "now playing" callbacks and records outcomes.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    kind: DeviceKind,
    on_playing: Option<BufferPlayingFn>,
    counters: PlaybackCounters,
}

impl Dispatcher {
    pub(crate) fn new(kind: DeviceKind, on_playing: Option<BufferPlayingFn>) -> Self {
        Self {
            kind,
            on_playing,
            counters: PlaybackCounters::new(),
        }
    }

    pub(crate) fn counters(&self) -> &PlaybackCounters {
        &self.counters
    }

    pub(crate) fn fire(&self, premix: &PremixBuffer) {
        self.counters.record_played();
        if let Some(cb) = &self.on_playing {
            cb(self.kind, premix);
        }
    }

    /// Count a buffer lost to a transient failure. The stream continues.
    pub(crate) fn drop_buffer(&self, premix: &PremixBuffer, err: &SinkError) {
        self.counters.record_dropped();
        tracing::warn!(
            frames = premix.samples_len,
            error = %err,
            "buffer dropped"
        );
    }
}

/// Next input item as seen by an engine.
pub(crate) enum Next {
    Item(PremixBuffer),
    /// Producer hung up.
    Closed,
    Cancelled,
    /// Nothing ready right now (non-blocking reads only).
    Empty,
}

/// Block for the next input buffer, observing `cancel` once per `poll`.
pub(crate) fn recv_next(input: &Receiver<PremixBuffer>, cancel: &CancelToken, poll: Duration) -> Next {
    loop {
        if cancel.is_cancelled() {
            return Next::Cancelled;
        }
        match input.recv_timeout(poll) {
            Ok(_) if cancel.is_cancelled() => return Next::Cancelled,
            Ok(buf) => return Next::Item(buf),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return Next::Closed,
        }
    }
}

/// Take the next input buffer if one is ready.
pub(crate) fn try_next(input: &Receiver<PremixBuffer>, cancel: &CancelToken) -> Next {
    if cancel.is_cancelled() {
        return Next::Cancelled;
    }
    match input.try_recv() {
        Ok(buf) => Next::Item(buf),
        Err(TryRecvError::Empty) => Next::Empty,
        Err(TryRecvError::Disconnected) => Next::Closed,
    }
}
