//! Reduce slices with an adaptive, budget-bounded fork-join engine.
//!
//! This crate provides the [`Strategy`] trait, which abstracts over sequential and fork-join
//! execution of fold operations. This allows algorithms to be written once and executed either
//! sequentially or in parallel depending on the chosen strategy.
//!
//! # Overview
//!
//! A reduction folds a slice into a single value with three operations:
//!
//! - `identity`: produces the starting value of every partial result
//! - `fold_op`: folds one element into a partial result: `(acc, &item) -> acc`
//! - `reduce_op`: merges two partial results: `(acc1, acc2) -> acc`
//!
//! `reduce_op` must be commutative and associative. [`ForkJoin`] merges partial results in
//! whatever order its branches finish.
//!
//! Two implementations are provided:
//!
//! - [`Sequential`]: Folds the whole slice on the current thread
//! - [`ForkJoin`]: Recursively splits the slice while a [`ThreadBudget`] permits, running the
//!   pieces on a rayon thread pool and reducing small (or budget-starved) ranges sequentially
//!
//! The building blocks of [`ForkJoin`] are public so they can be tested and reused on their own:
//! [`ThreadBudget`], [`Partitioner`], [`LeafReducer`], and [`Accumulator`].
//!
//! # Example
//!
//! ```
//! use fission_parallel::{Config, ForkJoin, Sequential, Strategy};
//!
//! fn sum_of_squares<S: Strategy>(strategy: &S, data: &[i64]) -> i64 {
//!     strategy
//!         .fold(data, || 0i64, |acc, &x| acc + x * x, |a, b| a + b)
//!         .unwrap()
//! }
//!
//! let data: Vec<i64> = (1..=100).collect();
//! let expected = sum_of_squares(&Sequential, &data);
//! assert_eq!(expected, 338_350);
//! assert_eq!(sum_of_squares(&ForkJoin::global(Config::default()), &data), expected);
//! ```

use core::fmt;
use std::{convert::Infallible, num::NonZeroUsize};

mod accumulator;
pub use accumulator::Accumulator;
mod budget;
pub use budget::{Reservation, ThreadBudget};
mod engine;
pub use engine::{ForkJoin, Report};
mod error;
pub use error::Error;
mod leaf;
pub use leaf::LeafReducer;
mod metrics;
pub use metrics::Metrics;
mod partition;
pub use partition::{Partitioner, Policy, Range, Retention, Split};
pub mod signal;
pub use signal::{Signal, Signaler};

/// Configuration for a [ForkJoin] engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Ranges of at most this many elements are never split.
    ///
    /// Smaller values create more branches (more scheduling overhead), larger values
    /// leave workers idle.
    pub min_chunk: NonZeroUsize,

    /// Maximum number of forked branches active at once within one reduction.
    ///
    /// This is independent of the number of threads in the pool, though it is
    /// typically sized to the number of available cores. A value of `1` disables
    /// forking entirely.
    pub max_parallelism: NonZeroUsize,

    /// Whether a splitting branch keeps part of its range for itself.
    pub policy: Policy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            min_chunk: NonZeroUsize::new(10).expect("value must be non-zero"),
            max_parallelism: NonZeroUsize::new(8).expect("value must be non-zero"),
            policy: Policy::PureFork,
        }
    }
}

/// A strategy for executing fold operations.
///
/// This trait abstracts over sequential and parallel execution, allowing algorithms
/// to be written generically and then executed with different strategies depending
/// on the use case (e.g., sequential for testing/debugging, parallel for production).
pub trait Strategy: Clone + Send + Sync + fmt::Debug + 'static {
    /// Reduces a slice to a single value with a fallible fold operation.
    ///
    /// # Arguments
    ///
    /// - `items`: The slice to fold over
    /// - `identity`: A closure that produces the identity value for the fold
    /// - `fold_op`: Combines an accumulator with a single item: `(acc, &item) -> Result<acc, E>`
    /// - `reduce_op`: Combines two accumulators: `(acc1, acc2) -> acc`
    ///
    /// Returns [Error::Leaf] with the failing range if `fold_op` fails. No partial
    /// result is returned on failure.
    ///
    /// # Examples
    ///
    /// ```
    /// use fission_parallel::{Error, Sequential, Strategy};
    ///
    /// let data = vec![1u8, 2, 200, 100];
    /// let result = Sequential.try_fold(
    ///     &data,
    ///     || 0u8,
    ///     |acc, &x| acc.checked_add(x).ok_or("overflow"),
    ///     |a, b| a.saturating_add(b),
    /// );
    /// assert!(matches!(result, Err(Error::Leaf { error: "overflow", .. })));
    /// ```
    fn try_fold<T, R, E, ID, F, RD>(
        &self,
        items: &[T],
        identity: ID,
        fold_op: F,
        reduce_op: RD,
    ) -> Result<R, Error<E>>
    where
        T: Sync,
        R: Send,
        E: Send,
        ID: Fn() -> R + Send + Sync,
        F: Fn(R, &T) -> Result<R, E> + Send + Sync,
        RD: Fn(R, R) -> R + Send + Sync;

    /// Reduces a slice to a single value using fold and reduce operations.
    ///
    /// # Examples
    ///
    /// ## Sum of Elements
    ///
    /// ```
    /// use fission_parallel::{Strategy, Sequential};
    ///
    /// let numbers = vec![1, 2, 3, 4, 5];
    ///
    /// let sum = Sequential.fold(
    ///     &numbers,
    ///     || 0,                    // identity
    ///     |acc, &n| acc + n,       // fold: add each number
    ///     |a, b| a + b,            // reduce: combine partial sums
    /// );
    ///
    /// assert_eq!(sum.unwrap(), 15);
    /// ```
    fn fold<T, R, ID, F, RD>(
        &self,
        items: &[T],
        identity: ID,
        fold_op: F,
        reduce_op: RD,
    ) -> Result<R, Error>
    where
        T: Sync,
        R: Send,
        ID: Fn() -> R + Send + Sync,
        F: Fn(R, &T) -> R + Send + Sync,
        RD: Fn(R, R) -> R + Send + Sync,
    {
        self.try_fold(
            items,
            identity,
            |acc, item| Ok::<_, Infallible>(fold_op(acc, item)),
            reduce_op,
        )
    }
}

/// A sequential execution strategy.
///
/// This strategy folds the whole slice on the current thread, in order, starting from
/// a single identity value. It never calls `reduce_op` and serves as the reference
/// result for [ForkJoin].
///
/// # Examples
///
/// ```
/// use fission_parallel::{Strategy, Sequential};
///
/// let data = vec![1, 2, 3, 4, 5];
/// let sum = Sequential.fold(&data, || 0, |a, &b| a + b, |a, b| a + b);
/// assert_eq!(sum.unwrap(), 15);
/// ```
#[derive(Default, Debug, Clone)]
pub struct Sequential;

impl Strategy for Sequential {
    fn try_fold<T, R, E, ID, F, RD>(
        &self,
        items: &[T],
        identity: ID,
        fold_op: F,
        _reduce_op: RD,
    ) -> Result<R, Error<E>>
    where
        T: Sync,
        R: Send,
        E: Send,
        ID: Fn() -> R + Send + Sync,
        F: Fn(R, &T) -> Result<R, E> + Send + Sync,
        RD: Fn(R, R) -> R + Send + Sync,
    {
        items
            .iter()
            .try_fold(identity(), |acc, item| fold_op(acc, item))
            .map_err(|error| Error::Leaf {
                range: Range::full(items.len()),
                error,
            })
    }
}

/// Reduce `items` with a [ForkJoin] engine on rayon's global pool.
///
/// # Examples
///
/// ```
/// use fission_parallel::{reduce, Config};
///
/// let values = vec![0u64; 1000];
/// let sum = reduce(
///     &values,
///     || 0u64,
///     |acc, &x| Ok::<_, ()>(acc + x + 42),
///     |a, b| a + b,
///     &Config::default(),
/// );
/// assert_eq!(sum.unwrap(), 42_000);
/// ```
pub fn reduce<T, R, E, ID, F, RD>(
    items: &[T],
    identity: ID,
    fold_op: F,
    reduce_op: RD,
    config: &Config,
) -> Result<R, Error<E>>
where
    T: Sync,
    R: Send,
    E: Send,
    ID: Fn() -> R + Send + Sync,
    F: Fn(R, &T) -> Result<R, E> + Send + Sync,
    RD: Fn(R, R) -> R + Send + Sync,
{
    ForkJoin::global(config.clone()).try_fold(items, identity, fold_op, reduce_op)
}

#[cfg(test)]
mod test {
    use crate::{Config, Error, ForkJoin, Policy, Retention, Sequential, Strategy};
    use proptest::prelude::*;
    use std::num::NonZeroUsize;

    /// Creates a ForkJoin strategy for testing.
    fn fork_join_strategy(min_chunk: usize, max_parallelism: usize, policy: Policy) -> ForkJoin {
        let config = Config {
            min_chunk: NonZeroUsize::new(min_chunk).unwrap(),
            max_parallelism: NonZeroUsize::new(max_parallelism).unwrap(),
            policy,
        };
        ForkJoin::with_threads(NonZeroUsize::new(4).unwrap(), config).unwrap()
    }

    fn policy() -> impl proptest::strategy::Strategy<Value = Policy> {
        prop_oneof![
            Just(Policy::PureFork),
            Just(Policy::SelfRetention(Retention::Decaying)),
            Just(Policy::SelfRetention(Retention::Fixed)),
        ]
    }

    #[test]
    fn fold_empty_with_zero_identity() {
        let sequential = Sequential;
        let fork_join = fork_join_strategy(1, 8, Policy::PureFork);
        let empty: Vec<i64> = vec![];

        let seq_result = sequential.fold(
            &empty,
            || 0i64,
            |acc, &x| acc.wrapping_add(x),
            |a, b| a.wrapping_add(b),
        );

        let fj_result = fork_join.fold(
            &empty,
            || 0i64,
            |acc, &x| acc.wrapping_add(x),
            |a, b| a.wrapping_add(b),
        );

        assert_eq!(seq_result.unwrap(), 0i64);
        assert_eq!(fj_result.unwrap(), 0i64);
    }

    #[test]
    fn try_fold_sequential_reports_whole_range() {
        let data: Vec<u32> = (0..10).collect();
        let err = Sequential
            .try_fold(
                &data,
                || 0u32,
                |acc, &x| if x == 3 { Err(x) } else { Ok(acc + x) },
                |a, b| a + b,
            )
            .unwrap_err();
        let (range, error) = err.leaf().unwrap();
        assert_eq!((range.start(), range.end()), (0, 10));
        assert_eq!(*error, 3);
    }

    #[test]
    fn reduce_uses_global_pool() {
        let values = vec![0u64; 1000];
        for max_parallelism in [1, 4, 8] {
            let config = Config {
                max_parallelism: NonZeroUsize::new(max_parallelism).unwrap(),
                ..Config::default()
            };
            let sum = crate::reduce(
                &values,
                || 0u64,
                |acc, &x| Ok::<_, ()>(acc + x + 42),
                |a, b| a + b,
                &config,
            );
            assert_eq!(sum.unwrap(), 42_000);
        }
    }

    #[test]
    fn reduce_propagates_leaf_failure() {
        let values: Vec<u64> = (0..1000).collect();
        let result = crate::reduce(
            &values,
            || 0u64,
            |acc, &x| if x == 999 { Err("last") } else { Ok(acc + x) },
            |a, b| a + b,
            &Config::default(),
        );
        match result {
            Err(Error::Leaf { range, error }) => {
                assert_eq!(error, "last");
                assert_eq!(range.end(), 1000);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    proptest! {
        #[test]
        fn fold_matches_sequential(
            data in prop::collection::vec(any::<i64>(), 0..2000),
            min_chunk in 1usize..64,
            max_parallelism in 1usize..16,
            policy in policy(),
        ) {
            let sequential = Sequential;
            let fork_join = fork_join_strategy(min_chunk, max_parallelism, policy);

            let seq_result = sequential.fold(
                &data,
                || 0i64,
                |acc, &x| acc.wrapping_add(x),
                |a, b| a.wrapping_add(b),
            ).unwrap();

            let fj_result = fork_join.fold(
                &data,
                || 0i64,
                |acc, &x| acc.wrapping_add(x),
                |a, b| a.wrapping_add(b),
            ).unwrap();

            prop_assert_eq!(seq_result, fj_result);
        }

        #[test]
        fn fold_max_matches_sequential(
            data in prop::collection::vec(any::<u32>(), 0..2000),
            min_chunk in 1usize..64,
            max_parallelism in 1usize..16,
            policy in policy(),
        ) {
            let fork_join = fork_join_strategy(min_chunk, max_parallelism, policy);
            let (max, report) = fork_join.reduce(
                &data,
                || 0u32,
                |acc, &x| Ok::<_, ()>(acc.max(x)),
                |a, b| a.max(b),
                None,
            ).unwrap();

            prop_assert_eq!(max, data.iter().copied().max().unwrap_or(0));
            prop_assert_eq!(report.leaves, report.merges);
            prop_assert!(report.peak_budget <= max_parallelism);
            if max_parallelism == 1 || data.len() <= min_chunk {
                prop_assert_eq!(report.forks, 0);
                prop_assert_eq!(report.leaves, usize::from(!data.is_empty()));
            }
        }

        #[test]
        fn fold_empty_returns_identity(identity in any::<i64>(), policy in policy()) {
            let fork_join = fork_join_strategy(1, 8, policy);
            let empty: Vec<i64> = vec![];

            let (result, report) = fork_join.reduce(
                &empty,
                || identity,
                |acc, &x| Ok::<_, ()>(acc + x),
                |a, b| a + b,
                None,
            ).unwrap();

            prop_assert_eq!(result, identity);
            prop_assert_eq!(report.leaves, 0);
            prop_assert_eq!(report.forks, 0);
        }
    }
}
