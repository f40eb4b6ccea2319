//! Decide whether and where to split a range of work.

use crate::Config;
use std::{fmt, num::NonZeroUsize};

/// A half-open interval `[start, end)` of indices into a slice.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Range {
    start: usize,
    end: usize,
}

impl Range {
    /// Create a range, returning `None` if `start > end`.
    pub const fn new(start: usize, end: usize) -> Option<Self> {
        if start > end {
            return None;
        }
        Some(Self { start, end })
    }

    /// The range covering every element of a slice of length `len`.
    pub const fn full(len: usize) -> Self {
        Self { start: 0, end: len }
    }

    /// First index in the range.
    pub const fn start(&self) -> usize {
        self.start
    }

    /// One past the last index in the range.
    pub const fn end(&self) -> usize {
        self.end
    }

    /// Number of elements in the range.
    pub const fn len(&self) -> usize {
        self.end - self.start
    }

    /// Returns whether the range covers no elements.
    pub const fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Split into `[start, start + offset)` and `[start + offset, end)`.
    ///
    /// `offset` is clamped to the length of the range.
    pub fn split_at(&self, offset: usize) -> (Self, Self) {
        let mid = self.start + offset.min(self.len());
        (
            Self {
                start: self.start,
                end: mid,
            },
            Self {
                start: mid,
                end: self.end,
            },
        )
    }

    /// Borrow the elements covered by this range.
    ///
    /// # Panics
    ///
    /// Panics if the range extends past the end of `items`.
    pub fn slice<'a, T>(&self, items: &'a [T]) -> &'a [T] {
        &items[self.start..self.end]
    }
}

impl fmt::Debug for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How a branch that wins a fork distributes its range.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Policy {
    /// Bisect the whole range and hand both halves to child branches.
    #[default]
    PureFork,
    /// Keep a portion of the range for the splitting branch to reduce inline
    /// while the bisected remainder runs on child branches.
    SelfRetention(Retention),
}

/// Sizing rule for the portion kept under [Policy::SelfRetention].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Retention {
    /// Keep `len / max_parallelism` of the range being split, so the kept
    /// share shrinks with recursion depth.
    #[default]
    Decaying,
    /// Keep `total / max_parallelism` of the top-level range at every level,
    /// capped at half of the range being split.
    Fixed,
}

/// The result of [Partitioner::split].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Split {
    /// Portion reduced inline by the splitting branch, if any.
    pub retained: Option<Range>,
    pub left: Range,
    pub right: Range,
}

/// Splitting decisions for one top-level reduction.
#[derive(Clone, Copy, Debug)]
pub struct Partitioner {
    min_chunk: usize,
    max_parallelism: usize,
    policy: Policy,
    share: usize,
}

impl Partitioner {
    /// Create a partitioner for a reduction over `total` elements.
    pub fn new(config: &Config, total: usize) -> Self {
        Self::with(config.min_chunk, config.max_parallelism, config.policy, total)
    }

    /// Create a partitioner from individual settings instead of a [Config].
    pub fn with(
        min_chunk: NonZeroUsize,
        max_parallelism: NonZeroUsize,
        policy: Policy,
        total: usize,
    ) -> Self {
        Self {
            min_chunk: min_chunk.get(),
            max_parallelism: max_parallelism.get(),
            policy,
            share: total / max_parallelism.get(),
        }
    }

    /// Returns whether `range` should be forked.
    ///
    /// Ranges of at most `min_chunk` elements, and any range when no budget is
    /// available, are reduced sequentially. Since `min_chunk` is at least one, a
    /// forked range always has two non-empty halves.
    pub fn should_split(&self, range: Range, budget_available: bool) -> bool {
        budget_available && range.len() > self.min_chunk
    }

    /// Split `range` according to the configured [Policy].
    pub fn split(&self, range: Range) -> Split {
        let kept = match self.policy {
            Policy::PureFork => 0,
            Policy::SelfRetention(Retention::Decaying) => range.len() / self.max_parallelism,
            Policy::SelfRetention(Retention::Fixed) => self.share.min(range.len() / 2),
        };
        let (retained, rest) = range.split_at(kept);
        let (left, right) = rest.split_at(rest.len() / 2);
        Split {
            retained: (!retained.is_empty()).then_some(retained),
            left,
            right,
        }
    }
}
