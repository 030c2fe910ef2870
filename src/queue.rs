//! Fixed-capacity FIFO shared between the input poller and the consumer loop.
//!
//! One [`Mutex`] guards head, tail, and length together, so the queue stays
//! consistent with any number of producers even though the capture pipeline
//! only ever runs one. Neither [`BoundedEventQueue::push`] nor
//! [`BoundedEventQueue::pop`] blocks: a full queue rejects, an empty queue
//! answers `None`. The [`Condvar`] only serves [`BoundedEventQueue::pop_timeout`].
//!
//! Overflow drops data. Under burst load (a paste into a 10-slot queue, say)
//! the newest bytes are rejected, or with [`BoundedEventQueue::push_overwrite`]
//! the oldest are evicted. Both are counted in [`BoundedEventQueue::dropped`].

use crate::event::KeyEvent;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;

pub const DEFAULT_CAPACITY: usize = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue capacity must be at least 1")]
    ZeroCapacity,
}

/// Returned by [`BoundedEventQueue::push`] when no slot is free. Carries the
/// rejected value back to the caller.
#[derive(Error, PartialEq, Eq)]
#[error("queue full")]
pub struct QueueFull<T>(pub T);

impl<T> fmt::Debug for QueueFull<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("QueueFull(..)")
    }
}

impl<T> QueueFull<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

struct Ring<T> {
    slots: Box<[Option<T>]>,
    head: usize,
    tail: usize,
    len: usize,
}

impl<T> Ring<T> {
    fn with_capacity(capacity: usize) -> Self {
        let slots = (0..capacity).map(|_| None).collect::<Vec<_>>();
        Self {
            slots: slots.into_boxed_slice(),
            head: 0,
            tail: 0,
            len: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    fn push_back(&mut self, value: T) {
        debug_assert!(!self.is_full());
        self.slots[self.tail] = Some(value);
        self.tail = (self.tail + 1) % self.capacity();
        self.len += 1;
    }

    fn pop_front(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let value = self.slots[self.head].take();
        self.head = (self.head + 1) % self.capacity();
        self.len -= 1;
        value
    }
}

pub struct BoundedEventQueue<T = KeyEvent> {
    ring: Mutex<Ring<T>>,
    not_empty: Condvar,
    dropped: AtomicU64,
}

impl<T> fmt::Debug for BoundedEventQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ring = self.lock();
        f.debug_struct("BoundedEventQueue")
            .field("capacity", &ring.capacity())
            .field("len", &ring.len)
            .field("head", &ring.head)
            .field("tail", &ring.tail)
            .field("dropped", &self.dropped())
            .finish()
    }
}

impl<T> BoundedEventQueue<T> {
    pub fn new(capacity: usize) -> Result<Self, QueueError> {
        if capacity == 0 {
            return Err(QueueError::ZeroCapacity);
        }
        Ok(Self {
            ring: Mutex::new(Ring::with_capacity(capacity)),
            not_empty: Condvar::new(),
            dropped: AtomicU64::new(0),
        })
    }

    // A panic while holding the lock cannot leave the ring half-updated:
    // every mutation finishes before anything that could panic runs.
    fn lock(&self) -> MutexGuard<'_, Ring<T>> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append at the tail, or hand the value back if every slot is taken.
    pub fn push(&self, value: T) -> Result<(), QueueFull<T>> {
        let mut ring = self.lock();
        if ring.is_full() {
            drop(ring);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(QueueFull(value));
        }
        ring.push_back(value);
        drop(ring);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Append at the tail, evicting the oldest element if the queue is full.
    /// Returns the evicted element.
    pub fn push_overwrite(&self, value: T) -> Option<T> {
        let mut ring = self.lock();
        let evicted = if ring.is_full() {
            ring.pop_front()
        } else {
            None
        };
        ring.push_back(value);
        drop(ring);
        if evicted.is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.not_empty.notify_one();
        evicted
    }

    /// Remove from the head. `None` means empty; this never waits.
    pub fn pop(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Like [`pop`](Self::pop), but waits up to `timeout` for a value to arrive.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut ring = self.lock();
        loop {
            if let Some(value) = ring.pop_front() {
                return Some(value);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            ring = self
                .not_empty
                .wait_timeout(ring, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.lock().is_full()
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity()
    }

    /// Events rejected by `push` or evicted by `push_overwrite` so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
