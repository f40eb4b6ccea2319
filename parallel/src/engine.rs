//! Recursive, budget-bounded fork-join reduction over a worker pool.

use crate::{
    Accumulator, Config, Error, LeafReducer, Metrics, Partitioner, Range, Signal, Strategy,
    ThreadBudget,
};
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use std::{
    any::Any,
    marker::PhantomData,
    num::NonZeroUsize,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tracing::{debug, trace, warn};

/// Budget units reserved by a branch before it forks two children.
const FORK_WIDTH: usize = 2;

/// Summary of how a single reduction was executed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Report {
    /// Number of leaf reductions started.
    pub leaves: usize,
    /// Number of partial results merged into the accumulator.
    pub merges: usize,
    /// Number of ranges forked onto two child branches.
    pub forks: usize,
    /// Number of splittable ranges reduced sequentially for lack of budget.
    pub fallbacks: usize,
    /// Highest number of budget units held at once.
    pub peak_budget: usize,
    /// Budget capacity of the reduction.
    pub capacity: usize,
}

/// A fork-join reduction engine.
///
/// Each reduction recursively splits its input while budget remains, forking the
/// pieces onto a fixed [rayon] pool, and reduces ranges that are too small (or that
/// found the budget exhausted) sequentially. Every leaf merges its partial result
/// into one accumulator per reduction.
///
/// `ForkJoin` holds an [`Arc<ThreadPool>`], so it can be cheaply cloned and shared.
///
/// # Examples
///
/// ```
/// use fission_parallel::{Config, ForkJoin, Strategy};
/// use rayon::ThreadPoolBuilder;
/// use std::sync::Arc;
///
/// let pool = Arc::new(ThreadPoolBuilder::new().num_threads(4).build().unwrap());
/// let engine = ForkJoin::new(pool, Config::default());
///
/// let data = vec![0u64; 1000];
/// let sum = engine.fold(&data, || 0u64, |acc, &x| acc + x + 42, |a, b| a + b);
/// assert_eq!(sum.unwrap(), 42_000);
/// ```
#[derive(Clone, Debug)]
pub struct ForkJoin {
    config: Config,
    pool: Option<Arc<ThreadPool>>,
    metrics: Metrics,
}

impl ForkJoin {
    /// Create an engine that runs its branches on `pool`.
    pub fn new(pool: Arc<ThreadPool>, config: Config) -> Self {
        Self {
            config,
            pool: Some(pool),
            metrics: Metrics::default(),
        }
    }

    /// Create an engine that runs its branches on rayon's global pool.
    pub fn global(config: Config) -> Self {
        Self {
            config,
            pool: None,
            metrics: Metrics::default(),
        }
    }

    /// Create an engine with a dedicated pool of `threads` workers.
    pub fn with_threads(
        threads: NonZeroUsize,
        config: Config,
    ) -> Result<Self, ThreadPoolBuildError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads.get())
            .thread_name(|index| format!("fission-{index}"))
            .build()?;
        Ok(Self::new(Arc::new(pool), config))
    }

    /// Record activity in `metrics` (see [Metrics::init]).
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// The configuration applied to every reduction.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Metrics updated by every reduction run on this engine.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Reduce `items` and report how the work was distributed.
    ///
    /// `identity` produces the starting value of the accumulator and of every leaf,
    /// `fold_op` folds one element into a partial result, and `reduce_op` merges
    /// two partial results. `reduce_op` must be commutative and associative: the
    /// order in which leaves finish is not deterministic.
    ///
    /// If `signal` fires, branches that have not yet started return
    /// [Error::Canceled]. Regardless of how the reduction ends, every forked branch
    /// has been joined and every budget unit released before this returns.
    pub fn reduce<T, R, E, ID, F, RD>(
        &self,
        items: &[T],
        identity: ID,
        fold_op: F,
        reduce_op: RD,
        signal: Option<&Signal>,
    ) -> Result<(R, Report), Error<E>>
    where
        T: Sync,
        R: Send,
        E: Send,
        ID: Fn() -> R + Send + Sync,
        F: Fn(R, &T) -> Result<R, E> + Send + Sync,
        RD: Fn(R, R) -> R + Send + Sync,
    {
        self.metrics.reductions.inc();
        let capacity = self.config.max_parallelism;
        if items.is_empty() {
            return Ok((
                identity(),
                Report {
                    capacity: capacity.get(),
                    ..Report::default()
                },
            ));
        }
        debug!(
            elements = items.len(),
            min_chunk = self.config.min_chunk.get(),
            max_parallelism = capacity.get(),
            policy = ?self.config.policy,
            "starting reduction"
        );

        let context = Context {
            leaf: LeafReducer::new(items, &identity, &fold_op),
            reduce_op: &reduce_op,
            partitioner: Partitioner::new(&self.config, items.len()),
            budget: ThreadBudget::instrumented(capacity, self.metrics.budget_in_use.clone()),
            accumulator: Accumulator::new(identity()),
            signal,
            metrics: &self.metrics,
            leaves: AtomicUsize::new(0),
            forks: AtomicUsize::new(0),
            fallbacks: AtomicUsize::new(0),
            _error: PhantomData,
        };
        let root = Task {
            range: Range::full(items.len()),
            depth: 0,
        };
        let result = match &self.pool {
            Some(pool) => pool.install(|| context.branch(root)),
            None => context.branch(root),
        };

        let report = context.report();
        if let Err(err) = result {
            self.metrics.failures.inc();
            debug!(?report, "reduction failed");
            return Err(err);
        }
        let value = context
            .accumulator
            .into_inner()
            .ok_or_else(|| Error::Branch("accumulator poisoned".to_string()))?;
        debug!(?report, "reduction complete");
        Ok((value, report))
    }
}

impl Strategy for ForkJoin {
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
        RD: Fn(R, R) -> R + Send + Sync,
    {
        self.reduce(items, identity, fold_op, reduce_op, None)
            .map(|(value, _)| value)
    }
}

/// The unit of work handed to a branch.
#[derive(Clone, Copy, Debug)]
struct Task {
    range: Range,
    depth: usize,
}

impl Task {
    fn child(&self, range: Range) -> Self {
        Self {
            range,
            depth: self.depth + 1,
        }
    }
}

/// State shared by every branch of one reduction.
struct Context<'a, T, R, E, ID, F, RD> {
    leaf: LeafReducer<'a, T, ID, F>,
    reduce_op: &'a RD,
    partitioner: Partitioner,
    budget: ThreadBudget,
    accumulator: Accumulator<R>,
    signal: Option<&'a Signal>,
    metrics: &'a Metrics,
    leaves: AtomicUsize,
    forks: AtomicUsize,
    fallbacks: AtomicUsize,
    _error: PhantomData<fn() -> E>,
}

impl<T, R, E, ID, F, RD> Context<'_, T, R, E, ID, F, RD>
where
    T: Sync,
    R: Send,
    E: Send,
    ID: Fn() -> R + Send + Sync,
    F: Fn(R, &T) -> Result<R, E> + Send + Sync,
    RD: Fn(R, R) -> R + Send + Sync,
{
    /// Run `task`, converting a panic into [Error::Branch].
    fn branch(&self, task: Task) -> Result<(), Error<E>> {
        panic::catch_unwind(AssertUnwindSafe(|| self.run(task))).unwrap_or_else(|payload| {
            let message = extract_panic_message(payload.as_ref());
            warn!(range = %task.range, depth = task.depth, %message, "branch panicked");
            Err(Error::Branch(message))
        })
    }

    fn run(&self, task: Task) -> Result<(), Error<E>> {
        if self.signal.is_some_and(Signal::is_signaled) {
            return Err(Error::Canceled);
        }
        let range = task.range;
        if range.is_empty() {
            return Ok(());
        }

        // Only contend for budget when the range is large enough to split
        let splittable = self.partitioner.should_split(range, true);
        let reservation = if splittable {
            self.budget.reserve(FORK_WIDTH)
        } else {
            None
        };
        if !self.partitioner.should_split(range, reservation.is_some()) {
            if splittable {
                self.fallbacks.fetch_add(1, Ordering::Relaxed);
                self.metrics.fallbacks.inc();
                trace!(%range, depth = task.depth, "budget exhausted, reducing sequentially");
            }
            return self.leaf(task);
        }
        self.forks.fetch_add(1, Ordering::Relaxed);
        self.metrics.forks.inc();

        let split = self.partitioner.split(range);
        debug!(
            %range,
            depth = task.depth,
            retained = ?split.retained,
            left = %split.left,
            right = %split.right,
            "forking"
        );
        let left = task.child(split.left);
        let right = task.child(split.right);
        let (retained, (left, right)) = match split.retained {
            Some(retained) => rayon::join(
                || self.leaf(task.child(retained)),
                || rayon::join(|| self.branch(left), || self.branch(right)),
            ),
            None => (Ok(()), rayon::join(|| self.branch(left), || self.branch(right))),
        };

        // Both children have been joined; the reservation is released on return
        retained.and(left).and(right)
    }

    fn leaf(&self, task: Task) -> Result<(), Error<E>> {
        self.leaves.fetch_add(1, Ordering::Relaxed);
        self.metrics.leaves.inc();
        let partial = self
            .leaf
            .reduce(task.range)
            .map_err(|error| Error::Leaf {
                range: task.range,
                error,
            })?;
        self.accumulator.merge(partial, self.reduce_op);
        Ok(())
    }

    fn report(&self) -> Report {
        Report {
            leaves: self.leaves.load(Ordering::Relaxed),
            merges: self.accumulator.merges(),
            forks: self.forks.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            peak_budget: self.budget.peak(),
            capacity: self.budget.capacity(),
        }
    }
}

fn extract_panic_message(err: &(dyn Any + Send)) -> String {
    if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else {
        format!("{err:?}")
    }
}
