//! Stream engine for writers without a playback clock.
//!
//! Every buffer is encoded and written synchronously and reported as playing
//! right after the write. Length fields are back-patched on stream end and on
//! cancellation.

use crossbeam_channel::Receiver;
use premix_types::{DeviceKind, PlayOutcome};

use crate::backend::StreamBackend;
use crate::cancel::CancelToken;
use crate::config::{EngineConfig, OutputSettings};
use crate::engine::{Device, Dispatcher, Next, recv_next};
use crate::error::{Result, SinkError};
use crate::premix::PremixBuffer;
use crate::status::PlaybackCounters;

pub struct StreamEngine<B: StreamBackend> {
    name: String,
    backend: B,
    config: EngineConfig,
    dispatcher: Dispatcher,
    total_bytes: u64,
    /// Bytes written since the last successful finalize.
    dirty: bool,
    closed: bool,
}

impl<B: StreamBackend> StreamEngine<B> {
    pub fn new(name: impl Into<String>, backend: B, settings: &OutputSettings) -> Result<Self> {
        settings.pcm_format()?;
        Ok(Self {
            name: name.into(),
            backend,
            config: settings.engine.clone(),
            dispatcher: Dispatcher::new(DeviceKind::File, settings.on_buffer_playing.clone()),
            total_bytes: 0,
            dirty: false,
            closed: false,
        })
    }

    /// Total payload bytes written across every `play` call.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    fn finalize(&mut self) -> Result<()> {
        self.backend.finalize(self.total_bytes)?;
        self.dirty = false;
        tracing::debug!(device = %self.name, total_bytes = self.total_bytes, "stream finalized");
        Ok(())
    }

    fn run(&mut self, input: &Receiver<PremixBuffer>, cancel: &CancelToken) -> Result<PlayOutcome> {
        let poll = self.config.poll_interval();
        loop {
            let premix = match recv_next(input, cancel, poll) {
                Next::Item(premix) => premix,
                Next::Closed | Next::Empty => return Ok(PlayOutcome::Exhausted),
                Next::Cancelled => return Ok(PlayOutcome::Cancelled),
            };
            self.dispatcher.counters().record_submitted();
            let written = self.backend.write_frame(&premix)?;
            self.total_bytes += written as u64;
            self.dirty = true;
            self.dispatcher.counters().record_bytes(written);
            self.dispatcher.fire(&premix);
        }
    }
}

impl<B: StreamBackend> Device for StreamEngine<B> {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::File
    }

    fn play(&mut self, input: Receiver<PremixBuffer>, cancel: &CancelToken) -> Result<PlayOutcome> {
        if self.closed {
            return Err(SinkError::Closed);
        }
        match self.run(&input, cancel) {
            Ok(outcome) => {
                self.finalize()?;
                if outcome == PlayOutcome::Cancelled {
                    tracing::info!(device = %self.name, "stream playback cancelled");
                }
                Ok(outcome)
            }
            Err(err) => {
                tracing::error!(device = %self.name, error = %err, "stream write failed");
                if let Err(finalize_err) = self.finalize() {
                    tracing::warn!(error = %finalize_err, "finalize after write failure failed");
                }
                Err(err)
            }
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
        if self.dirty {
            if let Err(err) = self.finalize() {
                tracing::warn!(device = %self.name, error = %err, "finalize on close failed");
            }
        }
        self.backend.close();
        tracing::debug!(device = %self.name, total_bytes = self.total_bytes, "stream device closed");
    }
}

impl<B: StreamBackend> Drop for StreamEngine<B> {
    fn drop(&mut self) {
        Device::close(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockStream, collect_userdata};
    use std::time::Duration;

    fn settings(on: Option<crate::config::BufferPlayingFn>) -> OutputSettings {
        OutputSettings {
            device_name: "mock-stream".to_string(),
            channels: 1,
            sample_rate: 8_000,
            bits_per_sample: 8,
            on_buffer_playing: on,
            engine: EngineConfig {
                poll_interval: Duration::from_micros(200),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn rows(frames: &[usize]) -> Receiver<PremixBuffer> {
        let (tx, rx) = crossbeam_channel::unbounded();
        for (row, n) in frames.iter().enumerate() {
            tx.send(PremixBuffer::silence(1, *n).with_userdata(row)).unwrap();
        }
        rx
    }

    #[test]
    fn writes_fire_callbacks_and_finalize_at_end() {
        let stream = MockStream::new(1);
        let backend_view = stream.clone();
        let (on, seen) = collect_userdata();
        let mut engine = StreamEngine::new("mock-stream", stream, &settings(Some(on))).unwrap();

        let outcome = engine.play(rows(&[10, 0, 10]), &CancelToken::new()).unwrap();
        assert_eq!(outcome, PlayOutcome::Exhausted);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(backend_view.frames(), vec![10, 0, 10]);
        assert_eq!(backend_view.finalized(), vec![20]);
        assert_eq!(engine.total_bytes(), 20);
    }

    #[test]
    fn cancellation_still_finalizes() {
        let stream = MockStream::new(1);
        let backend_view = stream.clone();
        let mut engine = StreamEngine::new("mock-stream", stream, &settings(None)).unwrap();

        let (tx, rx) = crossbeam_channel::unbounded();
        tx.send(PremixBuffer::silence(1, 4)).unwrap();
        let cancel = CancelToken::new();
        let remote = cancel.clone();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            remote.cancel();
        });

        let outcome = engine.play(rx, &cancel).unwrap();
        canceller.join().unwrap();
        drop(tx);
        assert_eq!(outcome, PlayOutcome::Cancelled);
        assert_eq!(backend_view.finalized(), vec![4]);
    }

    #[test]
    fn write_failure_is_fatal_and_finalizes_what_was_written() {
        let stream = MockStream::new(1);
        stream.fail_write(1);
        let backend_view = stream.clone();
        let (on, seen) = collect_userdata();
        let mut engine = StreamEngine::new("mock-stream", stream, &settings(Some(on))).unwrap();

        let err = engine.play(rows(&[5, 5, 5]), &CancelToken::new()).unwrap_err();
        assert!(matches!(err, SinkError::Io(_)));
        assert_eq!(*seen.lock().unwrap(), vec![0]);
        assert_eq!(backend_view.finalized(), vec![5]);
    }

    #[test]
    fn second_play_appends_and_refinalizes() {
        let stream = MockStream::new(1);
        let backend_view = stream.clone();
        let mut engine = StreamEngine::new("mock-stream", stream, &settings(None)).unwrap();

        engine.play(rows(&[3]), &CancelToken::new()).unwrap();
        engine.play(rows(&[4]), &CancelToken::new()).unwrap();
        engine.close();
        engine.close();

        // Close after a finalize with nothing new written does not finalize again.
        assert_eq!(backend_view.finalized(), vec![3, 7]);
        assert_eq!(backend_view.closes(), 1);
    }

    #[test]
    fn drop_finalizes_unfinished_writes() {
        let stream = MockStream::new(1);
        stream.fail_finalize_once();
        let backend_view = stream.clone();
        let mut engine = StreamEngine::new("mock-stream", stream, &settings(None)).unwrap();

        // The finalize at end of play fails, leaving the engine dirty.
        assert!(engine.play(rows(&[6]), &CancelToken::new()).is_err());
        drop(engine);
        assert_eq!(backend_view.finalized(), vec![6]);
        assert_eq!(backend_view.closes(), 1);
    }
}
