//! Header-queue backend on top of a CPAL output stream.
//!
//! Each submission becomes a header on a bounded channel drained by the CPAL
//! callback. A header counts as finished once the callback has played its last
//! byte. Headers play strictly in submission order, so completion is a single
//! high-water mark of header ids.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, SendTimeoutError, Sender};

use crate::backend::HeaderQueueBackend;
use crate::backend::output::{OutputThread, RenderSource};
use crate::config::{OutputSettings, PcmFormat};
use crate::error::{Result, SinkError};
use crate::mix::decode_sample;

/// How long `submit` may block on a full queue before the stream is presumed dead.
const SUBMIT_TIMEOUT: Duration = Duration::from_secs(2);

struct Header {
    id: u64,
    bytes: Vec<u8>,
}

pub struct QueueHandle {
    id: u64,
}

struct QueueShared {
    /// Highest header id played to the end (or discarded).
    finished: AtomicU64,
    /// Headers up to this id are skipped by the callback.
    discard_through: AtomicU64,
}

pub struct CpalQueue {
    tx: Sender<Header>,
    /// Receiver clone used to empty the queue on reset.
    pending: Receiver<Header>,
    shared: Arc<QueueShared>,
    next_id: u64,
    output: Option<OutputThread>,
}

impl CpalQueue {
    pub fn open(settings: &OutputSettings) -> Result<Self> {
        let format = settings.pcm_format()?;
        let (mut queue, render) = Self::detached(format, settings.engine.queue_depth);
        queue.output = Some(OutputThread::spawn(
            "cpal-queue",
            settings.hardware.clone(),
            format,
            render,
        )?);
        tracing::info!(queue_depth = settings.engine.queue_depth, "cpal queue opened");
        Ok(queue)
    }

    fn detached(format: PcmFormat, depth: usize) -> (Self, QueueRender) {
        let (tx, rx) = crossbeam_channel::bounded(depth.max(1));
        let shared = Arc::new(QueueShared {
            finished: AtomicU64::new(0),
            discard_through: AtomicU64::new(0),
        });
        let render = QueueRender {
            rx: rx.clone(),
            shared: shared.clone(),
            format,
            current: None,
        };
        let queue = Self {
            tx,
            pending: rx,
            shared,
            next_id: 1,
            output: None,
        };
        (queue, render)
    }
}

impl HeaderQueueBackend for CpalQueue {
    type Handle = QueueHandle;

    fn submit(&mut self, bytes: Vec<u8>) -> Result<QueueHandle> {
        let id = self.next_id;
        match self.tx.send_timeout(Header { id, bytes }, SUBMIT_TIMEOUT) {
            Ok(()) => {
                self.next_id += 1;
                Ok(QueueHandle { id })
            }
            Err(SendTimeoutError::Timeout(_)) => {
                Err(SinkError::Fatal("output stream stopped draining headers".to_string()))
            }
            Err(SendTimeoutError::Disconnected(_)) => {
                Err(SinkError::Fatal("output stream is gone".to_string()))
            }
        }
    }

    fn is_finished(&self, handle: &QueueHandle) -> Result<bool> {
        Ok(self.shared.finished.load(Ordering::Acquire) >= handle.id)
    }

    fn release(&mut self, _handle: QueueHandle) {}

    fn reset(&mut self) {
        let last = self.next_id - 1;
        self.shared.discard_through.fetch_max(last, Ordering::AcqRel);
        let dropped = self.pending.try_iter().count();
        self.shared.finished.fetch_max(last, Ordering::AcqRel);
        tracing::debug!(dropped, "cpal queue reset");
    }

    fn close(&mut self) {
        if let Some(mut output) = self.output.take() {
            output.stop();
            tracing::debug!("cpal queue output stopped");
        }
    }
}

/// Callback side: plays headers in order.
struct QueueRender {
    rx: Receiver<Header>,
    shared: Arc<QueueShared>,
    format: PcmFormat,
    current: Option<(Header, usize)>,
}

impl QueueRender {
    fn discarded(&self, id: u64) -> bool {
        id <= self.shared.discard_through.load(Ordering::Acquire)
    }

    fn finish(&self, id: u64) {
        self.shared.finished.fetch_max(id, Ordering::AcqRel);
    }

    /// Next header with something left to play.
    fn advance(&mut self) -> bool {
        if let Some((header, pos)) = &self.current {
            if *pos < header.bytes.len() && !self.discarded(header.id) {
                return true;
            }
            let id = header.id;
            self.current = None;
            self.finish(id);
        }
        while let Ok(header) = self.rx.try_recv() {
            if header.bytes.is_empty() || self.discarded(header.id) {
                self.finish(header.id);
                continue;
            }
            self.current = Some((header, 0));
            return true;
        }
        false
    }
}

impl RenderSource for QueueRender {
    fn render(&mut self, out: &mut [f32]) {
        let bits = self.format.bits_per_sample;
        let width = self.format.bytes_per_sample();
        for i in 0..out.len() {
            if !self.advance() {
                out[i..].fill(0.0);
                return;
            }
            if let Some((header, pos)) = &mut self.current {
                out[i] = decode_sample(&header.bytes[*pos..*pos + width], bits);
                *pos += width;
            }
        }
        // Report a header that ended exactly at the end of this callback.
        self.advance();
    }
}
