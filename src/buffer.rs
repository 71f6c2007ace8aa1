//! Buffer primitives (component B): the fixed ring and the object queue.
//!
//! Both variants share the same cursor discipline: a single producer cursor
//! and one cursor per consumer, with writes gated by the slowest consumer so
//! no sample is ever overwritten before every reader has seen it. Suspension
//! is implemented with a [`parking_lot::Condvar`] per buffer rather than a
//! spin loop, so idle workers do not burn CPU while waiting on a neighbor.

use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How often a cancelable wait rechecks the shutdown flag while otherwise
/// blocked, so a worker suspended on a buffer still terminates in bounded
/// time once shutdown is requested.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A consumer's position on a shared buffer, handed out by
/// [`RingBuffer::add_consumer`] / [`ObjectQueue::add_consumer`].
pub type ConsumerId = usize;

// ---------------------------------------------------------------------
// Fixed ring
// ---------------------------------------------------------------------

struct RingState {
    data: Vec<u8>,
    sample_size: usize,
    capacity_samples: u64,
    producer_cursor: u64,
    consumer_cursors: SmallVec<[u64; 4]>,
    consumer_closed: SmallVec<[bool; 4]>,
    producer_closed: bool,
}

impl RingState {
    fn min_active_consumer_cursor(&self) -> u64 {
        self.consumer_cursors
            .iter()
            .zip(self.consumer_closed.iter())
            .filter(|(_, closed)| !**closed)
            .map(|(cursor, _)| *cursor)
            .min()
            .unwrap_or(self.producer_cursor)
    }

    fn available_to_write(&self) -> u64 {
        self.capacity_samples - (self.producer_cursor - self.min_active_consumer_cursor())
    }

    fn available_to_read(&self, consumer: ConsumerId) -> u64 {
        self.producer_cursor - self.consumer_cursors[consumer]
    }

    fn all_consumers_closed(&self) -> bool {
        self.consumer_closed.iter().all(|c| *c)
    }
}

/// Single-producer, multi-consumer ring of fixed-size samples.
///
/// The backing allocation is shared across every fan-out reader: there is
/// one writer and `K` independent read cursors over the same bytes, rather
/// than `K` independent copies, matching the fan-out note in the design
/// notes.
pub struct RingBuffer {
    sample_size: usize,
    state: Mutex<RingState>,
    not_full: Condvar,
    not_empty: Condvar,
}

/// A contiguous, writable view into a [`RingBuffer`]'s backing storage.
///
/// Dropping the guard without calling [`commit`](WriteGuard::commit) commits
/// zero samples, matching the invariant `commit_write <= reserve_write`.
pub struct WriteGuard<'a> {
    ring: &'a RingBuffer,
    guard: parking_lot::MutexGuard<'a, RingState>,
    offset_samples: u64,
    max_samples: u64,
}

impl<'a> WriteGuard<'a> {
    /// The maximum number of samples that may be committed from this guard.
    pub fn capacity(&self) -> usize {
        self.max_samples as usize
    }

    /// A mutable view of the reserved region, sized to `n` samples
    /// (`n <= capacity()`).
    pub fn as_bytes_mut(&mut self, n: usize) -> &mut [u8] {
        assert!(n as u64 <= self.max_samples);
        let start = (self.offset_samples as usize) * self.sample_size_hint();
        let end = start + n * self.sample_size_hint();
        &mut self.guard.data[start..end]
    }

    fn sample_size_hint(&self) -> usize {
        self.guard.sample_size
    }

    /// Commits `n` samples (`n <= capacity()`) as having been written, and
    /// wakes any consumer waiting for more data.
    pub fn commit(self, n: usize) {
        assert!(n as u64 <= self.max_samples);
        let WriteGuard { ring, mut guard, .. } = self;
        guard.producer_cursor += n as u64;
        drop(guard);
        ring.not_empty.notify_all();
    }
}

/// A contiguous, readable view into a [`RingBuffer`]'s backing storage, as
/// seen by one consumer cursor.
pub struct ReadGuard<'a> {
    ring: &'a RingBuffer,
    guard: parking_lot::MutexGuard<'a, RingState>,
    consumer: ConsumerId,
    offset_samples: u64,
    available_samples: u64,
}

impl<'a> ReadGuard<'a> {
    /// The number of samples available to read in this view.
    pub fn len(&self) -> usize {
        self.available_samples as usize
    }

    /// `true` if there is nothing to read right now.
    pub fn is_empty(&self) -> bool {
        self.available_samples == 0
    }

    /// A view of up to `n` available samples (`n <= len()`).
    pub fn as_bytes(&self, n: usize) -> &[u8] {
        assert!(n as u64 <= self.available_samples);
        let start = (self.offset_samples as usize) * self.guard.sample_size;
        let end = start + n * self.guard.sample_size;
        &self.guard.data[start..end]
    }

    /// Advances this consumer's cursor by `n` samples (`n <= len()`) and
    /// wakes a producer that may have been waiting for space.
    pub fn advance(self, n: usize) {
        assert!(n as u64 <= self.available_samples);
        let ReadGuard { ring, mut guard, consumer, .. } = self;
        guard.consumer_cursors[consumer] += n as u64;
        drop(guard);
        ring.not_full.notify_all();
    }
}

/// Returned by a blocking read when the upstream producer has closed and no
/// more data will ever arrive; this is normal end-of-stream, never surfaced
/// to the user, only to the reading block.
pub struct Closed;

impl RingBuffer {
    /// Creates a new ring sized for `capacity_samples` samples of
    /// `sample_size` bytes each.
    pub fn new(sample_size: usize, capacity_samples: usize) -> Arc<Self> {
        Arc::new(Self {
            sample_size,
            state: Mutex::new(RingState {
                data: vec![0u8; sample_size * capacity_samples],
                sample_size,
                capacity_samples: capacity_samples as u64,
                producer_cursor: 0,
                consumer_cursors: SmallVec::new(),
                consumer_closed: SmallVec::new(),
                producer_closed: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        })
    }

    /// The size in bytes of one sample.
    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    /// Registers a new fan-out consumer, returning its cursor id.
    pub fn add_consumer(&self) -> ConsumerId {
        let mut state = self.state.lock();
        state.consumer_cursors.push(state.producer_cursor);
        state.consumer_closed.push(false);
        state.consumer_cursors.len() - 1
    }

    /// Reserves up to `max_samples` contiguous samples for writing, blocking
    /// until at least one sample of space is available. Returns `None` if
    /// every consumer has closed (there is no one left to read a write).
    pub fn reserve_write(&self, max_samples: usize) -> Option<WriteGuard<'_>> {
        let mut guard = self.state.lock();
        loop {
            if guard.all_consumers_closed() && !guard.consumer_cursors.is_empty() {
                return None;
            }
            let avail = guard.available_to_write();
            if avail > 0 {
                let capacity = guard.capacity_samples;
                let phys_offset = guard.producer_cursor % capacity.max(1);
                let to_end = capacity - phys_offset;
                let n = avail.min(to_end).min(max_samples as u64);
                if n > 0 {
                    let offset_samples = guard.producer_cursor % capacity.max(1);
                    return Some(WriteGuard {
                        ring: self,
                        guard,
                        offset_samples,
                        max_samples: n,
                    });
                }
            }
            self.not_full.wait(&mut guard);
        }
    }

    /// Like [`reserve_write`](Self::reserve_write), but also wakes on
    /// `shutdown` being set, returning `None` in that case. This is the
    /// scheduler's writer suspension point: a worker blocked here for want of
    /// downstream space still observes a shutdown request in bounded time.
    pub fn reserve_write_cancelable(
        &self,
        max_samples: usize,
        shutdown: &AtomicBool,
    ) -> Option<WriteGuard<'_>> {
        let mut guard = self.state.lock();
        loop {
            if shutdown.load(Ordering::Relaxed) {
                return None;
            }
            if guard.all_consumers_closed() && !guard.consumer_cursors.is_empty() {
                return None;
            }
            let avail = guard.available_to_write();
            if avail > 0 {
                let capacity = guard.capacity_samples;
                let phys_offset = guard.producer_cursor % capacity.max(1);
                let to_end = capacity - phys_offset;
                let n = avail.min(to_end).min(max_samples as u64);
                if n > 0 {
                    return Some(WriteGuard {
                        ring: self,
                        guard,
                        offset_samples: phys_offset,
                        max_samples: n,
                    });
                }
            }
            self.not_full.wait_for(&mut guard, CANCEL_POLL_INTERVAL);
        }
    }

    /// Closes the producer side, waking every blocked consumer so it can
    /// observe end-of-stream.
    pub fn close_producer(&self) {
        let mut state = self.state.lock();
        state.producer_closed = true;
        drop(state);
        self.not_empty.notify_all();
    }

    /// Marks one consumer as closed, waking a producer that may have been
    /// blocked waiting for that consumer to advance.
    pub fn close_consumer(&self, consumer: ConsumerId) {
        let mut state = self.state.lock();
        state.consumer_closed[consumer] = true;
        drop(state);
        self.not_full.notify_all();
    }

    /// Peeks up to `max_samples` contiguous samples for `consumer`, blocking
    /// until data is available or the producer closes. Returns
    /// `Err(Closed)` once the producer has closed and nothing is left to
    /// read.
    pub fn peek_read(
        &self,
        consumer: ConsumerId,
        max_samples: usize,
    ) -> Result<ReadGuard<'_>, Closed> {
        let mut guard = self.state.lock();
        loop {
            let avail = guard.available_to_read(consumer);
            if avail > 0 {
                let capacity = guard.capacity_samples;
                let phys_offset = guard.consumer_cursors[consumer] % capacity.max(1);
                let to_end = capacity - phys_offset;
                let n = avail.min(to_end).min(max_samples as u64);
                if n > 0 {
                    return Ok(ReadGuard {
                        ring: self,
                        guard,
                        consumer,
                        offset_samples: phys_offset,
                        available_samples: n,
                    });
                }
            }
            if guard.producer_closed {
                return Err(Closed);
            }
            self.not_empty.wait(&mut guard);
        }
    }

    /// Like [`peek_read`](Self::peek_read), but blocks until at least
    /// `min_samples` are available rather than just one -- the scheduler's
    /// way of honoring a block's declared `min_input`. Returns fewer than
    /// `min_samples` only once the producer has closed and that is all that
    /// remains; also wakes on `shutdown` being set, returning `Err(Closed)`
    /// in that case since no further progress is possible either way.
    pub fn peek_read_min_cancelable(
        &self,
        consumer: ConsumerId,
        min_samples: usize,
        max_samples: usize,
        shutdown: &AtomicBool,
    ) -> Result<ReadGuard<'_>, Closed> {
        let mut guard = self.state.lock();
        loop {
            let avail = guard.available_to_read(consumer);
            let threshold = (min_samples as u64).max(1);
            if avail >= threshold || (avail > 0 && guard.producer_closed) {
                let capacity = guard.capacity_samples;
                let phys_offset = guard.consumer_cursors[consumer] % capacity.max(1);
                let to_end = capacity - phys_offset;
                let n = avail.min(to_end).min(max_samples as u64);
                if n > 0 {
                    return Ok(ReadGuard {
                        ring: self,
                        guard,
                        consumer,
                        offset_samples: phys_offset,
                        available_samples: n,
                    });
                }
            }
            if avail == 0 && guard.producer_closed {
                return Err(Closed);
            }
            if shutdown.load(Ordering::Relaxed) {
                return Err(Closed);
            }
            self.not_empty.wait_for(&mut guard, CANCEL_POLL_INTERVAL);
        }
    }
}

// ---------------------------------------------------------------------
// Object queue
// ---------------------------------------------------------------------

struct ObjectQueueState {
    objects: VecDeque<Arc<[u8]>>,
    base_index: u64,
    producer_index: u64,
    consumer_indices: SmallVec<[u64; 4]>,
    consumer_closed: SmallVec<[bool; 4]>,
    producer_closed: bool,
    capacity: usize,
}

impl ObjectQueueState {
    fn min_active_consumer_index(&self) -> u64 {
        self.consumer_indices
            .iter()
            .zip(self.consumer_closed.iter())
            .filter(|(_, closed)| !**closed)
            .map(|(idx, _)| *idx)
            .min()
            .unwrap_or(self.producer_index)
    }

    fn all_consumers_closed(&self) -> bool {
        self.consumer_closed.iter().all(|c| *c)
    }

    fn garbage_collect(&mut self) {
        let floor = self.min_active_consumer_index();
        while self.base_index < floor {
            self.objects.pop_front();
            self.base_index += 1;
        }
    }
}

/// Single-producer, multi-consumer queue of framed, variable-sized objects.
/// Shares the same back-pressure and shutdown semantics as [`RingBuffer`];
/// the unit of flow control is objects rather than bytes.
pub struct ObjectQueue {
    state: Mutex<ObjectQueueState>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl ObjectQueue {
    /// Creates a queue that will hold at most `capacity` unconsumed objects.
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ObjectQueueState {
                objects: VecDeque::with_capacity(capacity),
                base_index: 0,
                producer_index: 0,
                consumer_indices: SmallVec::new(),
                consumer_closed: SmallVec::new(),
                producer_closed: false,
                capacity,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        })
    }

    /// Registers a new fan-out consumer, returning its cursor id.
    pub fn add_consumer(&self) -> ConsumerId {
        let mut state = self.state.lock();
        state.consumer_indices.push(state.producer_index);
        state.consumer_closed.push(false);
        state.consumer_indices.len() - 1
    }

    /// Pushes a single framed object, blocking until there is capacity.
    /// Returns `false` if every consumer has closed (no one left to read).
    pub fn push(&self, object: Vec<u8>) -> bool {
        let mut state = self.state.lock();
        loop {
            if state.all_consumers_closed() && !state.consumer_indices.is_empty() {
                return false;
            }
            let in_flight = state.producer_index - state.base_index;
            if (in_flight as usize) < state.capacity {
                state.objects.push_back(Arc::from(object.into_boxed_slice()));
                state.producer_index += 1;
                drop(state);
                self.not_empty.notify_all();
                return true;
            }
            self.not_full.wait(&mut state);
        }
    }

    /// Like [`push`](Self::push), but also wakes on `shutdown` being set,
    /// returning `false` in that case.
    pub fn push_cancelable(&self, object: Vec<u8>, shutdown: &AtomicBool) -> bool {
        let mut state = self.state.lock();
        loop {
            if shutdown.load(Ordering::Relaxed) {
                return false;
            }
            if state.all_consumers_closed() && !state.consumer_indices.is_empty() {
                return false;
            }
            let in_flight = state.producer_index - state.base_index;
            if (in_flight as usize) < state.capacity {
                state.objects.push_back(Arc::from(object.into_boxed_slice()));
                state.producer_index += 1;
                drop(state);
                self.not_empty.notify_all();
                return true;
            }
            self.not_full.wait_for(&mut state, CANCEL_POLL_INTERVAL);
        }
    }

    /// Closes the producer side.
    pub fn close_producer(&self) {
        let mut state = self.state.lock();
        state.producer_closed = true;
        drop(state);
        self.not_empty.notify_all();
    }

    /// Marks one consumer as closed.
    pub fn close_consumer(&self, consumer: ConsumerId) {
        let mut state = self.state.lock();
        state.consumer_closed[consumer] = true;
        state.garbage_collect();
        drop(state);
        self.not_full.notify_all();
    }

    /// Pops the next object for `consumer`, blocking until one is available
    /// or the producer closes with nothing left to read.
    pub fn pop(&self, consumer: ConsumerId) -> Result<Arc<[u8]>, Closed> {
        let mut state = self.state.lock();
        loop {
            let idx = state.consumer_indices[consumer];
            if idx < state.producer_index {
                let object = state.objects[(idx - state.base_index) as usize].clone();
                state.consumer_indices[consumer] += 1;
                state.garbage_collect();
                drop(state);
                self.not_full.notify_all();
                return Ok(object);
            }
            if state.producer_closed {
                return Err(Closed);
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Pops up to `max_count` queued objects for `consumer` in production
    /// order, blocking until at least one is available, the producer closes,
    /// or `shutdown` is set. Mirrors [`RingBuffer::peek_read_min_cancelable`]
    /// for the object-queue transport.
    pub fn pop_batch_cancelable(
        &self,
        consumer: ConsumerId,
        max_count: usize,
        shutdown: &AtomicBool,
    ) -> Result<Vec<Arc<[u8]>>, Closed> {
        let mut state = self.state.lock();
        loop {
            let idx = state.consumer_indices[consumer];
            let available = (state.producer_index - idx) as usize;
            if available > 0 {
                let n = available.min(max_count.max(1));
                let mut batch = Vec::with_capacity(n);
                for i in 0..n {
                    batch.push(state.objects[(idx - state.base_index) as usize + i].clone());
                }
                state.consumer_indices[consumer] += n as u64;
                state.garbage_collect();
                drop(state);
                self.not_full.notify_all();
                return Ok(batch);
            }
            if state.producer_closed {
                return Err(Closed);
            }
            if shutdown.load(Ordering::Relaxed) {
                return Err(Closed);
            }
            self.not_empty.wait_for(&mut state, CANCEL_POLL_INTERVAL);
        }
    }
}
