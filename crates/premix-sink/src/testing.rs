//! In-memory backends for engine tests.
//!
//! Each mock is a cheap handle: the engine owns one clone, the test keeps
//! another to inject failures and inspect what the engine did.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use premix_types::DeviceKind;

use crate::backend::{HeaderQueueBackend, RingBufferBackend, RingSegment, StreamBackend};
use crate::config::BufferPlayingFn;
use crate::error::{Result, SinkError};
use crate::premix::PremixBuffer;

/// Callback that records each buffer's `usize` userdata, in firing order.
pub(crate) fn collect_userdata() -> (BufferPlayingFn, Arc<Mutex<Vec<usize>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_cb = seen.clone();
    let on: BufferPlayingFn = Arc::new(move |_: DeviceKind, buf: &PremixBuffer| {
        if let Some(row) = buf.userdata::<usize>() {
            seen_cb.lock().unwrap().push(*row);
        }
    });
    (on, seen)
}

// ---------------------------------------------------------------------------
// Ring

/// Ring whose play cursor is advanced by a background "player" thread.
///
/// The player advances `step` bytes every `tick` once the first segment has
/// been committed. A `step` of 0 models a stalled device.
#[derive(Clone)]
pub(crate) struct MockRing {
    inner: Arc<RingInner>,
}

struct RingInner {
    ring_len: usize,
    step: usize,
    tick: Duration,
    read_pos: AtomicUsize,
    total_played: AtomicU64,
    playing: AtomicBool,
    primed: AtomicBool,
    wraps: AtomicUsize,
    state: Mutex<RingState>,
    player: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Default)]
struct RingState {
    watches: Vec<(usize, Sender<()>)>,
    lock_calls: usize,
    unlock_calls: usize,
    fail_locks: HashSet<usize>,
    fail_unlocks: HashSet<usize>,
    fail_read: bool,
    fail_start: bool,
    position_reads: usize,
    outstanding: usize,
    lock_log: Vec<(usize, usize, usize)>,
    committed: Vec<usize>,
    stops: usize,
    closes: usize,
}

pub(crate) struct MockSegment {
    first: Vec<u8>,
    second: Vec<u8>,
}

impl RingSegment for MockSegment {
    fn regions(&mut self) -> (&mut [u8], &mut [u8]) {
        (&mut self.first, &mut self.second)
    }
}

impl MockRing {
    pub(crate) fn new(ring_len: usize, step: usize, tick: Duration) -> Self {
        Self {
            inner: Arc::new(RingInner {
                ring_len,
                step,
                tick,
                read_pos: AtomicUsize::new(0),
                total_played: AtomicU64::new(0),
                playing: AtomicBool::new(false),
                primed: AtomicBool::new(false),
                wraps: AtomicUsize::new(0),
                state: Mutex::new(RingState::default()),
                player: Mutex::new(None),
            }),
        }
    }

    /// Fail the `index`-th call to `lock_segment` (0-based).
    pub(crate) fn fail_lock(&self, index: usize) {
        self.inner.state.lock().unwrap().fail_locks.insert(index);
    }

    pub(crate) fn fail_unlock(&self, index: usize) {
        self.inner.state.lock().unwrap().fail_unlocks.insert(index);
    }

    pub(crate) fn fail_read_position(&self) {
        self.inner.state.lock().unwrap().fail_read = true;
    }

    pub(crate) fn fail_start(&self) {
        self.inner.state.lock().unwrap().fail_start = true;
    }

    /// Watches registered and not yet released by `stop`.
    pub(crate) fn watch_count(&self) -> usize {
        self.inner.state.lock().unwrap().watches.len()
    }

    pub(crate) fn position_reads(&self) -> usize {
        self.inner.state.lock().unwrap().position_reads
    }

    /// Bytes the player has really consumed.
    pub(crate) fn total_played(&self) -> u64 {
        self.inner.total_played.load(Ordering::Acquire)
    }

    pub(crate) fn wraps(&self) -> usize {
        self.inner.wraps.load(Ordering::Acquire)
    }

    /// `(offset, first_len, second_len)` for every successful lock.
    pub(crate) fn lock_log(&self) -> Vec<(usize, usize, usize)> {
        self.inner.state.lock().unwrap().lock_log.clone()
    }

    /// Running end offsets of committed segments, assuming they were
    /// contiguous. Underrun catch-up only moves writes later, so these are
    /// lower bounds of the real end offsets.
    pub(crate) fn contiguous_ends(&self) -> Vec<u64> {
        let state = self.inner.state.lock().unwrap();
        let mut end = 0u64;
        state
            .committed
            .iter()
            .map(|len| {
                end += *len as u64;
                end
            })
            .collect()
    }

    pub(crate) fn outstanding_locks(&self) -> usize {
        self.inner.state.lock().unwrap().outstanding
    }

    pub(crate) fn stop_count(&self) -> usize {
        self.inner.state.lock().unwrap().stops
    }

    pub(crate) fn close_count(&self) -> usize {
        self.inner.state.lock().unwrap().closes
    }
}

impl RingInner {
    fn advance(&self) {
        let old = self.read_pos.load(Ordering::Acquire);
        let raw = old + self.step;
        let wrapped = raw >= self.ring_len;
        let new = raw % self.ring_len;

        // Progress is published before the cursor moves, and the cursor before
        // the wrap event, so observers can only lag behind.
        self.total_played.fetch_add(self.step as u64, Ordering::AcqRel);
        self.read_pos.store(new, Ordering::Release);
        if wrapped {
            self.wraps.fetch_add(1, Ordering::AcqRel);
        }

        let state = self.state.lock().unwrap();
        for (offset, tx) in &state.watches {
            let crossed = if wrapped {
                *offset > old || *offset <= new
            } else {
                old < *offset && *offset <= new
            };
            if crossed {
                let _ = tx.send(());
            }
        }
    }
}

impl RingBufferBackend for MockRing {
    type Segment = MockSegment;

    fn ring_len(&self) -> usize {
        self.inner.ring_len
    }

    fn watch_position(&self, offset: usize) -> Result<Receiver<()>> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.inner.state.lock().unwrap().watches.push((offset, tx));
        Ok(rx)
    }

    fn start_looping(&self) -> Result<()> {
        if self.inner.state.lock().unwrap().fail_start {
            return Err(SinkError::Fatal("mock start failure".to_string()));
        }
        self.inner.read_pos.store(0, Ordering::Release);
        self.inner.playing.store(true, Ordering::Release);
        let inner = self.inner.clone();
        let handle = thread::spawn(move || {
            while inner.playing.load(Ordering::Acquire) {
                thread::sleep(inner.tick);
                if inner.step > 0 && inner.primed.load(Ordering::Acquire) {
                    inner.advance();
                }
            }
        });
        *self.inner.player.lock().unwrap() = Some(handle);
        Ok(())
    }

    fn stop(&self) {
        self.inner.playing.store(false, Ordering::Release);
        if let Some(handle) = self.inner.player.lock().unwrap().take() {
            let _ = handle.join();
        }
        let mut state = self.inner.state.lock().unwrap();
        state.watches.clear();
        state.stops += 1;
    }

    fn lock_segment(&self, offset: usize, len: usize) -> Result<MockSegment> {
        let mut state = self.inner.state.lock().unwrap();
        let index = state.lock_calls;
        state.lock_calls += 1;
        if state.fail_locks.contains(&index) {
            return Err(SinkError::Transient("mock lock failure".to_string()));
        }
        let ring_len = self.inner.ring_len;
        if offset >= ring_len || len > ring_len {
            return Err(SinkError::Transient(format!(
                "lock {offset}+{len} outside ring of {ring_len}"
            )));
        }
        let first = len.min(ring_len - offset);
        let second = len - first;
        state.outstanding += 1;
        state.lock_log.push((offset, first, second));
        Ok(MockSegment {
            first: vec![0; first],
            second: vec![0; second],
        })
    }

    fn unlock(&self, segment: MockSegment) -> Result<()> {
        let mut state = self.inner.state.lock().unwrap();
        state.outstanding -= 1;
        let index = state.unlock_calls;
        state.unlock_calls += 1;
        if state.fail_unlocks.contains(&index) {
            return Err(SinkError::Transient("mock unlock failure".to_string()));
        }
        state.committed.push(segment.first.len() + segment.second.len());
        self.inner.primed.store(true, Ordering::Release);
        Ok(())
    }

    fn read_position(&self) -> Result<usize> {
        let mut state = self.inner.state.lock().unwrap();
        state.position_reads += 1;
        if state.fail_read {
            return Err(SinkError::Fatal("mock read position failure".to_string()));
        }
        drop(state);
        Ok(self.inner.read_pos.load(Ordering::Acquire))
    }

    fn close(&self) {
        self.inner.playing.store(false, Ordering::Release);
        self.inner.state.lock().unwrap().closes += 1;
    }
}

// ---------------------------------------------------------------------------
// Header queue

/// Header queue whose completions are driven by the test.
#[derive(Clone)]
pub(crate) struct MockQueue {
    inner: Arc<Mutex<QueueState>>,
}

pub(crate) struct MockHandle {
    id: u64,
}

struct QueueState {
    next_id: u64,
    submit_calls: usize,
    fail_submits: HashSet<usize>,
    fail_finished: bool,
    finish_after: Option<Duration>,
    submitted_at: HashMap<u64, Instant>,
    marked: HashSet<u64>,
    outstanding: usize,
    max_outstanding: usize,
    released: Vec<u64>,
    resets: usize,
    closes: usize,
}

impl MockQueue {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(QueueState {
                next_id: 1,
                submit_calls: 0,
                fail_submits: HashSet::new(),
                fail_finished: false,
                finish_after: None,
                submitted_at: HashMap::new(),
                marked: HashSet::new(),
                outstanding: 0,
                max_outstanding: 0,
                released: Vec::new(),
                resets: 0,
                closes: 0,
            })),
        }
    }

    /// Report every handle finished once it is `delay` old.
    pub(crate) fn finish_after(&self, delay: Duration) {
        self.inner.lock().unwrap().finish_after = Some(delay);
    }

    pub(crate) fn finish(&self, id: u64) {
        self.inner.lock().unwrap().marked.insert(id);
    }

    pub(crate) fn is_marked_finished(&self, id: u64) -> bool {
        self.inner.lock().unwrap().marked.contains(&id)
    }

    pub(crate) fn fail_submit(&self, index: usize) {
        self.inner.lock().unwrap().fail_submits.insert(index);
    }

    pub(crate) fn fail_is_finished(&self) {
        self.inner.lock().unwrap().fail_finished = true;
    }

    pub(crate) fn submitted(&self) -> usize {
        self.inner.lock().unwrap().submitted_at.len()
    }

    pub(crate) fn outstanding(&self) -> usize {
        self.inner.lock().unwrap().outstanding
    }

    pub(crate) fn max_outstanding(&self) -> usize {
        self.inner.lock().unwrap().max_outstanding
    }

    pub(crate) fn released(&self) -> Vec<u64> {
        self.inner.lock().unwrap().released.clone()
    }

    pub(crate) fn resets(&self) -> usize {
        self.inner.lock().unwrap().resets
    }

    pub(crate) fn closes(&self) -> usize {
        self.inner.lock().unwrap().closes
    }
}

impl HeaderQueueBackend for MockQueue {
    type Handle = MockHandle;

    fn submit(&mut self, _bytes: Vec<u8>) -> Result<MockHandle> {
        let mut state = self.inner.lock().unwrap();
        let index = state.submit_calls;
        state.submit_calls += 1;
        if state.fail_submits.contains(&index) {
            return Err(SinkError::Transient("mock submit failure".to_string()));
        }
        let id = state.next_id;
        state.next_id += 1;
        state.submitted_at.insert(id, Instant::now());
        state.outstanding += 1;
        state.max_outstanding = state.max_outstanding.max(state.outstanding);
        Ok(MockHandle { id })
    }

    fn is_finished(&self, handle: &MockHandle) -> Result<bool> {
        let state = self.inner.lock().unwrap();
        if state.fail_finished {
            return Err(SinkError::Fatal("mock completion failure".to_string()));
        }
        let aged = match (state.finish_after, state.submitted_at.get(&handle.id)) {
            (Some(delay), Some(at)) => at.elapsed() >= delay,
            _ => false,
        };
        Ok(aged || state.marked.contains(&handle.id))
    }

    fn release(&mut self, handle: MockHandle) {
        let mut state = self.inner.lock().unwrap();
        state.outstanding -= 1;
        state.released.push(handle.id);
    }

    fn reset(&mut self) {
        self.inner.lock().unwrap().resets += 1;
    }

    fn close(&mut self) {
        self.inner.lock().unwrap().closes += 1;
    }
}

// ---------------------------------------------------------------------------
// Stream

/// Stream writer that records frame sizes and finalize calls.
#[derive(Clone)]
pub(crate) struct MockStream {
    block_align: usize,
    inner: Arc<Mutex<StreamState>>,
}

#[derive(Default)]
struct StreamState {
    frames: Vec<usize>,
    write_calls: usize,
    fail_writes: HashSet<usize>,
    finalized: Vec<u64>,
    fail_finalize_once: bool,
    closes: usize,
}

impl MockStream {
    pub(crate) fn new(block_align: usize) -> Self {
        Self {
            block_align,
            inner: Arc::new(Mutex::new(StreamState::default())),
        }
    }

    pub(crate) fn fail_write(&self, index: usize) {
        self.inner.lock().unwrap().fail_writes.insert(index);
    }

    pub(crate) fn fail_finalize_once(&self) {
        self.inner.lock().unwrap().fail_finalize_once = true;
    }

    pub(crate) fn frames(&self) -> Vec<usize> {
        self.inner.lock().unwrap().frames.clone()
    }

    /// `total_bytes` of every successful finalize.
    pub(crate) fn finalized(&self) -> Vec<u64> {
        self.inner.lock().unwrap().finalized.clone()
    }

    pub(crate) fn closes(&self) -> usize {
        self.inner.lock().unwrap().closes
    }
}

impl StreamBackend for MockStream {
    fn write_frame(&mut self, premix: &PremixBuffer) -> Result<usize> {
        let mut state = self.inner.lock().unwrap();
        let index = state.write_calls;
        state.write_calls += 1;
        if state.fail_writes.contains(&index) {
            return Err(SinkError::Io(std::io::Error::other("mock disk full")));
        }
        state.frames.push(premix.samples_len);
        Ok(premix.samples_len * self.block_align)
    }

    fn finalize(&mut self, total_bytes: u64) -> Result<()> {
        let mut state = self.inner.lock().unwrap();
        if state.fail_finalize_once {
            state.fail_finalize_once = false;
            return Err(SinkError::Io(std::io::Error::other("mock finalize failure")));
        }
        state.finalized.push(total_bytes);
        Ok(())
    }

    fn close(&mut self) {
        self.inner.lock().unwrap().closes += 1;
    }
}
