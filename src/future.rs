//! Single-assignment result slot bridging an async producer to a blocking consumer
//!
//! The storage stack comes up on its own worker; the bootstrap thread must
//! block until the handle exists. [`AsyncResult`] is that bridge: the
//! producer fulfills it exactly once, the consumer blocks on it with bounded
//! condvar waits per poll cycle. No cancellation — once awaited, the caller
//! commits to waiting until fulfillment (or the optional deadline).

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::FulfillError;

enum Slot<T> {
    Empty,
    Fulfilled(T),
    Taken,
}

struct Inner<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

/// A single-assignment slot. Clone it to hand one side to the producer;
/// a single consumer awaits the value.
pub struct AsyncResult<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for AsyncResult<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for AsyncResult<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> AsyncResult<T> {
    /// Create an empty future.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                slot: Mutex::new(Slot::Empty),
                ready: Condvar::new(),
            }),
        }
    }

    /// Fulfill the future. Callable exactly once across all clones; a second
    /// call fails with [`FulfillError::AlreadyFulfilled`] and the first
    /// value is kept.
    pub fn fulfill(&self, value: T) -> Result<(), FulfillError> {
        let mut slot = self.inner.slot.lock().unwrap();
        match *slot {
            Slot::Empty => {
                *slot = Slot::Fulfilled(value);
                self.inner.ready.notify_all();
                Ok(())
            }
            _ => Err(FulfillError::AlreadyFulfilled),
        }
    }

    /// Whether a value has been fulfilled and not yet consumed.
    pub fn is_fulfilled(&self) -> bool {
        matches!(*self.inner.slot.lock().unwrap(), Slot::Fulfilled(_))
    }

    /// Block until the producer fulfills the future, waiting at most
    /// `poll_interval` per cycle. Only returns once the value is available;
    /// the producer runs concurrently and is never blocked on this thread.
    pub fn await_blocking(self, poll_interval: Duration) -> T {
        let mut slot = self.inner.slot.lock().unwrap();
        loop {
            if let Some(value) = take_fulfilled(&mut slot) {
                return value;
            }
            let (guard, _timed_out) = self
                .inner
                .ready
                .wait_timeout(slot, poll_interval)
                .unwrap();
            slot = guard;
        }
    }

    /// Like [`await_blocking`](Self::await_blocking) but gives up after
    /// `timeout`, returning `None` if the future is still unfulfilled.
    pub fn await_with_deadline(self, poll_interval: Duration, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.inner.slot.lock().unwrap();
        loop {
            if let Some(value) = take_fulfilled(&mut slot) {
                return Some(value);
            }
            if Instant::now() >= deadline {
                return None;
            }
            let (guard, _timed_out) = self
                .inner
                .ready
                .wait_timeout(slot, poll_interval)
                .unwrap();
            slot = guard;
        }
    }
}

fn take_fulfilled<T>(slot: &mut std::sync::MutexGuard<'_, Slot<T>>) -> Option<T> {
    if matches!(**slot, Slot::Fulfilled(_)) {
        match std::mem::replace(&mut **slot, Slot::Taken) {
            Slot::Fulfilled(value) => Some(value),
            _ => unreachable!(),
        }
    } else {
        None
    }
}
