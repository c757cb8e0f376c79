//! Header-queue engine.
//!
//! For backends that accept discrete submissions and report completion per
//! submission. Runs on the caller's thread: submit while there is room, poll the
//! oldest outstanding handle, fire its callback once the backend reports it done.

use std::collections::VecDeque;

use crossbeam_channel::Receiver;
use premix_types::{DeviceKind, PlayOutcome};

use crate::backend::HeaderQueueBackend;
use crate::cancel::CancelToken;
use crate::config::{EngineConfig, OutputSettings};
use crate::engine::{Device, Dispatcher, Next, recv_next, try_next};
use crate::error::{Result, SinkError};
use crate::mix::Mixer;
use crate::premix::PremixBuffer;
use crate::status::PlaybackCounters;

pub struct HeaderQueueEngine<B: HeaderQueueBackend> {
    name: String,
    backend: B,
    mixer: Mixer,
    config: EngineConfig,
    dispatcher: Dispatcher,
    closed: bool,
}

impl<B: HeaderQueueBackend> HeaderQueueEngine<B> {
    pub fn new(name: impl Into<String>, backend: B, settings: &OutputSettings) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            backend,
            mixer: Mixer::new(settings.pcm_format()?),
            config: settings.engine.clone(),
            dispatcher: Dispatcher::new(DeviceKind::SoundCard, settings.on_buffer_playing.clone()),
            closed: false,
        })
    }

    /// Abandon everything still queued in the backend.
    fn abandon(&mut self, outstanding: &mut VecDeque<(B::Handle, PremixBuffer)>) {
        self.backend.reset();
        let count = outstanding.len();
        for (handle, _) in outstanding.drain(..) {
            self.backend.release(handle);
        }
        if count > 0 {
            tracing::debug!(device = %self.name, count, "released abandoned headers");
        }
    }

    /// Flatten and submit one buffer. Transient failures drop the buffer.
    fn submit(
        &mut self,
        premix: PremixBuffer,
        outstanding: &mut VecDeque<(B::Handle, PremixBuffer)>,
    ) -> Result<()> {
        self.dispatcher.counters().record_submitted();
        let bytes = self.mixer.flatten(&premix);
        let len = bytes.len();
        match self.backend.submit(bytes) {
            Ok(handle) => {
                self.dispatcher.counters().record_bytes(len);
                outstanding.push_back((handle, premix));
                Ok(())
            }
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                self.dispatcher.drop_buffer(&premix, &err);
                Ok(())
            }
        }
    }

    /// Release and report every finished handle at the head of the queue.
    ///
    /// Later handles that finished first wait for their predecessors.
    fn retire_finished(&mut self, outstanding: &mut VecDeque<(B::Handle, PremixBuffer)>) -> Result<()> {
        while let Some((head, _)) = outstanding.front() {
            match self.backend.is_finished(head) {
                Ok(false) => break,
                Ok(true) => {
                    if let Some((handle, premix)) = outstanding.pop_front() {
                        self.backend.release(handle);
                        self.dispatcher.fire(&premix);
                    }
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    if let Some((handle, premix)) = outstanding.pop_front() {
                        self.backend.release(handle);
                        self.dispatcher.drop_buffer(&premix, &err);
                    }
                }
            }
        }
        Ok(())
    }

    fn run(
        &mut self,
        input: &Receiver<PremixBuffer>,
        cancel: &CancelToken,
        outstanding: &mut VecDeque<(B::Handle, PremixBuffer)>,
    ) -> Result<PlayOutcome> {
        let poll = self.config.poll_interval();
        let depth = self.config.pending_depth();
        let mut input_open = true;

        loop {
            if cancel.is_cancelled() {
                return Ok(PlayOutcome::Cancelled);
            }
            self.retire_finished(outstanding)?;

            if input_open && outstanding.len() < depth {
                let next = if outstanding.is_empty() {
                    recv_next(input, cancel, poll)
                } else {
                    try_next(input, cancel)
                };
                match next {
                    Next::Item(premix) => {
                        self.submit(premix, outstanding)?;
                        continue;
                    }
                    Next::Closed => input_open = false,
                    Next::Cancelled => return Ok(PlayOutcome::Cancelled),
                    Next::Empty => {}
                }
            }

            if !input_open && outstanding.is_empty() {
                return Ok(PlayOutcome::Exhausted);
            }
            if !cancel.sleep(poll) {
                return Ok(PlayOutcome::Cancelled);
            }
        }
    }
}

impl<B: HeaderQueueBackend> Device for HeaderQueueEngine<B> {
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
        let mut outstanding = VecDeque::with_capacity(self.config.pending_depth());
        let result = self.run(&input, cancel, &mut outstanding);
        match &result {
            Ok(PlayOutcome::Exhausted) => {}
            Ok(PlayOutcome::Cancelled) => {
                tracing::info!(device = %self.name, "header playback cancelled");
                self.abandon(&mut outstanding);
            }
            Err(err) => {
                tracing::error!(device = %self.name, error = %err, "header playback failed");
                self.abandon(&mut outstanding);
            }
        }
        result
    }

    fn counters(&self) -> &PlaybackCounters {
        self.dispatcher.counters()
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.backend.close();
        tracing::debug!(device = %self.name, "header device closed");
    }
}

impl<B: HeaderQueueBackend> Drop for HeaderQueueEngine<B> {
    fn drop(&mut self) {
        Device::close(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockQueue, collect_userdata};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    fn settings(on: Option<crate::config::BufferPlayingFn>) -> OutputSettings {
        OutputSettings {
            device_name: "mock-queue".to_string(),
            channels: 2,
            sample_rate: 8_000,
            bits_per_sample: 16,
            on_buffer_playing: on,
            engine: EngineConfig {
                poll_interval: Duration::from_micros(200),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn rows(count: usize) -> Receiver<PremixBuffer> {
        let (tx, rx) = crossbeam_channel::unbounded();
        for row in 0..count {
            tx.send(PremixBuffer::silence(2, 16).with_userdata(row)).unwrap();
        }
        rx
    }

    #[test]
    fn callbacks_follow_submission_order_when_completion_is_reversed() {
        let queue = MockQueue::new();
        let backend_view = queue.clone();
        let observed = Arc::new(Mutex::new(Vec::new()));
        let observed_cb = observed.clone();
        let backend_cb = backend_view.clone();
        let on: crate::config::BufferPlayingFn = Arc::new(move |_: DeviceKind, buf: &PremixBuffer| {
            let row = *buf.userdata::<usize>().unwrap();
            // Handle ids start at 1.
            let finished = backend_cb.is_marked_finished(row as u64 + 1);
            observed_cb.lock().unwrap().push((row, finished));
        });

        let completer_view = backend_view.clone();
        let completer = thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(5);
            while completer_view.submitted() < 3 && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(1));
            }
            for id in [3, 2, 1] {
                completer_view.finish(id);
                thread::sleep(Duration::from_millis(5));
            }
        });

        let mut engine = HeaderQueueEngine::new("mock-queue", queue, &settings(Some(on))).unwrap();
        let outcome = engine.play(rows(3), &CancelToken::new()).unwrap();
        completer.join().unwrap();

        assert_eq!(outcome, PlayOutcome::Exhausted);
        assert_eq!(
            *observed.lock().unwrap(),
            vec![(0, true), (1, true), (2, true)]
        );
        assert_eq!(backend_view.released(), vec![1, 2, 3]);
        assert_eq!(backend_view.outstanding(), 0);
    }

    #[test]
    fn outstanding_handles_are_capped_by_pending_depth() {
        let queue = MockQueue::new();
        queue.finish_after(Duration::from_millis(2));
        let backend_view = queue.clone();
        let (on, seen) = collect_userdata();

        let mut engine = HeaderQueueEngine::new("mock-queue", queue, &settings(Some(on))).unwrap();
        engine.play(rows(10), &CancelToken::new()).unwrap();

        assert_eq!(*seen.lock().unwrap(), (0..10).collect::<Vec<_>>());
        assert!(backend_view.max_outstanding() <= 3);
        assert_eq!(engine.status().played, 10);
        assert_eq!(engine.status().bytes_written, 10 * 16 * 4);
    }

    #[test]
    fn transient_submit_failure_drops_one_buffer() {
        let queue = MockQueue::new();
        queue.finish_after(Duration::ZERO);
        queue.fail_submit(1);
        let (on, seen) = collect_userdata();

        let mut engine = HeaderQueueEngine::new("mock-queue", queue, &settings(Some(on))).unwrap();
        let outcome = engine.play(rows(3), &CancelToken::new()).unwrap();

        assert_eq!(outcome, PlayOutcome::Exhausted);
        assert_eq!(*seen.lock().unwrap(), vec![0, 2]);
        let status = engine.status();
        assert_eq!(status.submitted, 3);
        assert_eq!(status.dropped, 1);
        assert_eq!(status.played, 2);
    }

    #[test]
    fn cancel_resets_and_releases_everything() {
        let queue = MockQueue::new();
        let backend_view = queue.clone();
        let (on, seen) = collect_userdata();
        let mut engine = HeaderQueueEngine::new("mock-queue", queue, &settings(Some(on))).unwrap();

        let (tx, rx) = crossbeam_channel::unbounded();
        for row in 0..8usize {
            tx.send(PremixBuffer::silence(2, 16).with_userdata(row)).unwrap();
        }
        let cancel = CancelToken::new();
        let remote = cancel.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            let at = Instant::now();
            remote.cancel();
            at
        });

        let outcome = engine.play(rx, &cancel).unwrap();
        let returned = Instant::now();
        let cancelled_at = canceller.join().unwrap();
        drop(tx);

        assert_eq!(outcome, PlayOutcome::Cancelled);
        assert!(returned.duration_since(cancelled_at) < Duration::from_millis(100));
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(backend_view.resets(), 1);
        assert_eq!(backend_view.outstanding(), 0);
        assert_eq!(backend_view.released().len(), 3);
    }

    #[test]
    fn fatal_completion_error_releases_handles() {
        let queue = MockQueue::new();
        queue.fail_is_finished();
        let backend_view = queue.clone();
        let mut engine = HeaderQueueEngine::new("mock-queue", queue, &settings(None)).unwrap();

        let err = engine.play(rows(2), &CancelToken::new()).unwrap_err();
        assert!(matches!(err, SinkError::Fatal(_)));
        assert_eq!(backend_view.outstanding(), 0);
    }

    #[test]
    fn close_is_idempotent_and_blocks_play() {
        let queue = MockQueue::new();
        let backend_view = queue.clone();
        let mut engine = HeaderQueueEngine::new("mock-queue", queue, &settings(None)).unwrap();
        engine.close();
        engine.close();
        assert!(matches!(
            engine.play(rows(1), &CancelToken::new()),
            Err(SinkError::Closed)
        ));
        drop(engine);
        assert_eq!(backend_view.closes(), 1);
    }
}
