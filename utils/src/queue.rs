//! A thread-safe FIFO queue whose consumers block until an item is available.

use std::{
    collections::VecDeque,
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};
use thiserror::Error;

/// Returned by [BlockingQueue::push] when the item could not be enqueued.
///
/// The rejected item is handed back to the caller.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PushError<T> {
    /// The queue is at capacity.
    #[error("queue full")]
    Full(T),
    /// The queue has been closed.
    #[error("queue closed")]
    Closed(T),
}

impl<T> PushError<T> {
    /// Recover the rejected item.
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(item) | Self::Closed(item) => item,
        }
    }
}

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// A FIFO queue shared between producers and consumers.
///
/// Consumers calling [BlockingQueue::wait_and_pop] are suspended until an item is
/// pushed or the queue is closed. Closing does not discard queued items: consumers
/// keep receiving them until the queue is empty, and only then observe `None`.
///
/// A bounded queue additionally suspends producers calling
/// [BlockingQueue::push_wait] while it is full.
pub struct BlockingQueue<T> {
    state: Mutex<State<T>>,
    capacity: Option<usize>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BlockingQueue<T> {
    /// Create an unbounded queue.
    pub fn new() -> Self {
        Self::with_capacity(None)
    }

    /// Create a queue holding at most `capacity` items.
    pub fn bounded(capacity: usize) -> Self {
        Self::with_capacity(Some(capacity))
    }

    fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::new(),
                closed: false,
            }),
            capacity,
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_full(&self, state: &State<T>) -> bool {
        self.capacity
            .is_some_and(|capacity| state.items.len() >= capacity)
    }

    /// Enqueue `item` without blocking.
    pub fn push(&self, item: T) -> Result<(), PushError<T>> {
        let mut state = self.lock();
        if state.closed {
            return Err(PushError::Closed(item));
        }
        if self.is_full(&state) {
            return Err(PushError::Full(item));
        }
        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Enqueue `item`, waiting for space if the queue is full.
    ///
    /// Fails only if the queue is (or becomes) closed.
    pub fn push_wait(&self, item: T) -> Result<(), PushError<T>> {
        let mut state = self.lock();
        while !state.closed && self.is_full(&state) {
            state = self
                .not_full
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if state.closed {
            return Err(PushError::Closed(item));
        }
        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Dequeue the oldest item without blocking.
    pub fn pop(&self) -> Option<T> {
        let item = self.lock().items.pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Dequeue the oldest item, waiting until one is available.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub fn wait_and_pop(&self) -> Option<T> {
        let mut state = self.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Some(item);
            }
            if state.closed {
                return None;
            }
            state = self
                .not_empty
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [BlockingQueue::wait_and_pop], but gives up after `timeout`.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Some(item);
            }
            let now = Instant::now();
            if state.closed || now >= deadline {
                return None;
            }
            state = self
                .not_empty
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Reject further pushes and wake every waiter.
    ///
    /// Items already queued remain available to consumers.
    pub fn close(&self) {
        self.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Returns whether [BlockingQueue::close] has been called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Returns whether no items are queued.
    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }
}
