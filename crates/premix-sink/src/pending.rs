//! Bounded FIFO of written-but-unconfirmed buffers.
//!
//! Sits between the ring writer thread and the dispatcher:
//! - the writer pushes one record per written buffer and blocks while the FIFO is full
//! - the dispatcher pops records in order and waits for playback to reach them
//!
//! All blocking waits are bounded by the poll interval so both sides observe
//! cancellation promptly. Shutdown mirrors the sample queues this grew out of:
//! `close()` wakes every waiter, pops keep draining until empty.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::cancel::CancelToken;

/// Result of a cancellable pop.
#[derive(Debug, PartialEq, Eq)]
pub enum Pop<T> {
    Item(T),
    /// Closed by the producer and fully drained.
    Closed,
    Cancelled,
}

pub struct PendingQueue<T> {
    inner: Mutex<PendingInner<T>>,
    cv: Condvar,
    capacity: usize,
}

struct PendingInner<T> {
    queue: VecDeque<T>,
    done: bool,
}

impl<T> PendingQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(PendingInner {
                queue: VecDeque::with_capacity(capacity.max(1)),
                done: false,
            }),
            cv: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    /// Mark the queue finished and wake all waiters. Idempotent.
    pub fn close(&self) {
        let mut g = self.lock();
        g.done = true;
        drop(g);
        self.cv.notify_all();
    }

    /// Push one record, blocking while the queue is full.
    ///
    /// Hands the record back if the queue is closed or `cancel` fires while waiting.
    pub fn push_or_cancel(&self, item: T, cancel: &CancelToken, poll: Duration) -> Result<(), T> {
        let mut g = self.lock();
        while g.queue.len() >= self.capacity && !g.done {
            if cancel.is_cancelled() {
                return Err(item);
            }
            let (ng, _timeout) = self
                .cv
                .wait_timeout(g, poll)
                .unwrap_or_else(|e| e.into_inner());
            g = ng;
        }
        if g.done || cancel.is_cancelled() {
            return Err(item);
        }
        g.queue.push_back(item);
        drop(g);
        self.cv.notify_all();
        Ok(())
    }

    /// Pop the oldest record, blocking until one is available.
    pub fn pop_or_cancel(&self, cancel: &CancelToken, poll: Duration) -> Pop<T> {
        let mut g = self.lock();
        loop {
            if cancel.is_cancelled() {
                return Pop::Cancelled;
            }
            if let Some(item) = g.queue.pop_front() {
                drop(g);
                self.cv.notify_all();
                return Pop::Item(item);
            }
            if g.done {
                return Pop::Closed;
            }
            let (ng, _timeout) = self
                .cv
                .wait_timeout(g, poll)
                .unwrap_or_else(|e| e.into_inner());
            g = ng;
        }
    }

    /// Remove and return everything still queued (abandoned records).
    pub fn drain(&self) -> Vec<T> {
        let mut g = self.lock();
        let out: Vec<T> = g.queue.drain(..).collect();
        drop(g);
        self.cv.notify_all();
        out
    }

    fn lock(&self) -> MutexGuard<'_, PendingInner<T>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
