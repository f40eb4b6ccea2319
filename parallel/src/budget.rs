//! Bound the number of concurrently forked branches.

use prometheus_client::metrics::gauge::Gauge;
use std::{
    num::NonZeroUsize,
    sync::atomic::{AtomicUsize, Ordering},
};

/// Tracks how many forked branches are active and refuses reservations that
/// would exceed the configured capacity.
///
/// The live counter starts at zero (the caller of a reduction is not counted)
/// and is only ever changed by [ThreadBudget::try_acquire] and
/// [ThreadBudget::release]. Acquisition is a single compare-and-swap loop, so
/// concurrent callers can never push the counter past capacity, not even
/// transiently.
#[derive(Debug)]
pub struct ThreadBudget {
    capacity: usize,
    live: AtomicUsize,
    peak: AtomicUsize,
    in_use: Option<Gauge>,
}

impl ThreadBudget {
    /// Create a budget permitting at most `capacity` active branches.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            capacity: capacity.get(),
            live: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            in_use: None,
        }
    }

    /// Create a budget that mirrors every change of its live counter into `in_use`.
    ///
    /// The gauge may be shared by many budgets (one per concurrent reduction), in
    /// which case it reports their combined use.
    pub fn instrumented(capacity: NonZeroUsize, in_use: Gauge) -> Self {
        Self {
            in_use: Some(in_use),
            ..Self::new(capacity)
        }
    }

    /// Maximum number of units that may be held at once.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of units currently held.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Number of units that could be acquired right now.
    pub fn available(&self) -> usize {
        self.capacity.saturating_sub(self.live())
    }

    /// Highest value the live counter has reached.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }

    /// Atomically reserve `n` units.
    ///
    /// Returns `false` and leaves the budget untouched if the reservation would
    /// exceed capacity. Every `true` must be matched by exactly one
    /// [ThreadBudget::release] of the same `n` (prefer [ThreadBudget::reserve]).
    pub fn try_acquire(&self, n: usize) -> bool {
        let capacity = self.capacity;
        let result = self
            .live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                live.checked_add(n).filter(|next| *next <= capacity)
            });
        let Ok(previous) = result else {
            return false;
        };
        self.peak.fetch_max(previous + n, Ordering::AcqRel);
        if let Some(gauge) = &self.in_use {
            gauge.inc_by(n as i64);
        }
        true
    }

    /// Return `n` previously acquired units.
    pub fn release(&self, n: usize) {
        let previous = self.live.fetch_sub(n, Ordering::AcqRel);
        debug_assert!(previous >= n, "released more units than were acquired");
        if let Some(gauge) = &self.in_use {
            gauge.dec_by(n as i64);
        }
    }

    /// Reserve `n` units for the lifetime of the returned [Reservation].
    ///
    /// The units are released when the reservation is dropped, including during
    /// unwinding.
    pub fn reserve(&self, n: usize) -> Option<Reservation<'_>> {
        self.try_acquire(n).then_some(Reservation {
            budget: self,
            units: n,
        })
    }
}

/// Units held on a [ThreadBudget], released on drop.
#[must_use = "dropping a reservation releases it immediately"]
#[derive(Debug)]
pub struct Reservation<'a> {
    budget: &'a ThreadBudget,
    units: usize,
}

impl Reservation<'_> {
    /// Number of units held.
    pub fn units(&self) -> usize {
        self.units
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.budget.release(self.units);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};

    fn budget(capacity: usize) -> ThreadBudget {
        ThreadBudget::new(NonZeroUsize::new(capacity).unwrap())
    }

    #[test]
    fn test_acquire_within_capacity() {
        let budget = budget(4);
        assert!(budget.try_acquire(2));
        assert!(budget.try_acquire(2));
        assert_eq!(budget.live(), 4);
        assert_eq!(budget.available(), 0);

        // Full budget leaves state untouched on failure
        assert!(!budget.try_acquire(1));
        assert_eq!(budget.live(), 4);

        budget.release(2);
        budget.release(2);
        assert_eq!(budget.live(), 0);
        assert_eq!(budget.peak(), 4);
    }

    #[test]
    fn test_capacity_one_refuses_pairs() {
        let budget = budget(1);
        assert!(!budget.try_acquire(2));
        assert!(budget.reserve(2).is_none());
        assert_eq!(budget.live(), 0);
        assert_eq!(budget.peak(), 0);
    }

    #[test]
    fn test_reservation_releases_on_drop() {
        let budget = budget(2);
        {
            let reservation = budget.reserve(2).unwrap();
            assert_eq!(reservation.units(), 2);
            assert_eq!(budget.live(), 2);
            assert!(budget.reserve(1).is_none());
        }
        assert_eq!(budget.live(), 0);
    }

    #[test]
    fn test_reservation_releases_on_panic() {
        let budget = budget(2);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _reservation = budget.reserve(2).unwrap();
            panic!("boom");
        }));
        assert!(result.is_err());
        assert_eq!(budget.live(), 0);
    }

    #[test]
    fn test_gauge_tracks_live() {
        let gauge = Gauge::default();
        let budget = ThreadBudget::instrumented(NonZeroUsize::new(8).unwrap(), gauge.clone());
        let first = budget.reserve(2).unwrap();
        let second = budget.reserve(4).unwrap();
        assert_eq!(gauge.get(), 6);
        drop(first);
        assert_eq!(gauge.get(), 4);
        drop(second);
        assert_eq!(gauge.get(), 0);
    }

    #[test]
    fn test_concurrent_acquire_never_exceeds_capacity() {
        let budget = Arc::new(budget(6));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let budget = budget.clone();
                thread::spawn(move || {
                    for _ in 0..10_000 {
                        if let Some(_reservation) = budget.reserve(2) {
                            assert!(budget.live() <= budget.capacity());
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(budget.peak() <= 6);
        assert_eq!(budget.live(), 0);
    }
}
