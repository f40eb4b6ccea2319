//! The merge point shared by every branch of one reduction.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Mutex, PoisonError,
};

/// Collects the partial results of every leaf of a reduction.
///
/// Branches only ever [merge](Accumulator::merge) into it; the combined value can
/// only be read by consuming the accumulator, which requires every branch
/// borrowing it to have finished.
#[derive(Debug)]
pub struct Accumulator<R> {
    value: Mutex<Option<R>>,
    merges: AtomicUsize,
}

impl<R> Accumulator<R> {
    /// Create an accumulator seeded with `identity`.
    pub fn new(identity: R) -> Self {
        Self {
            value: Mutex::new(Some(identity)),
            merges: AtomicUsize::new(0),
        }
    }

    /// Combine `partial` into the accumulated value with `reduce_op`.
    ///
    /// The read, combine, and write happen as one step with respect to other
    /// merges. Because `reduce_op` is commutative and associative, the order in
    /// which branches merge does not affect the final value.
    pub fn merge<RD>(&self, partial: R, reduce_op: &RD)
    where
        RD: Fn(R, R) -> R,
    {
        let mut value = self.value.lock().unwrap_or_else(PoisonError::into_inner);
        *value = match value.take() {
            Some(current) => Some(reduce_op(current, partial)),
            // A previous merge panicked midway; the reduction is already failed.
            None => None,
        };
        self.merges.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of merges performed so far.
    pub fn merges(&self) -> usize {
        self.merges.load(Ordering::Relaxed)
    }

    /// Consume the accumulator and return the combined value.
    ///
    /// Returns `None` only if a merge panicked.
    pub fn into_inner(self) -> Option<R> {
        self.value
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
