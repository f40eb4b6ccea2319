//! Sequential reduction of a single range.

use crate::Range;
use tracing::trace;

/// Folds the elements of a range on the calling thread.
///
/// This is the only place where element-level work happens. A leaf reads nothing
/// but its own range and returns its partial result to the caller.
pub struct LeafReducer<'a, T, ID, F> {
    items: &'a [T],
    identity: &'a ID,
    fold_op: &'a F,
}

impl<'a, T, ID, F> LeafReducer<'a, T, ID, F> {
    /// Create a reducer over `items`.
    pub fn new(items: &'a [T], identity: &'a ID, fold_op: &'a F) -> Self {
        Self {
            items,
            identity,
            fold_op,
        }
    }

    /// Fold every element of `range`, starting from a fresh identity value.
    ///
    /// Stops at the first element for which `fold_op` fails.
    pub fn reduce<R, E>(&self, range: Range) -> Result<R, E>
    where
        ID: Fn() -> R,
        F: Fn(R, &T) -> Result<R, E>,
    {
        trace!(%range, elements = range.len(), "reducing leaf");
        range
            .slice(self.items)
            .iter()
            .try_fold((self.identity)(), |acc, item| (self.fold_op)(acc, item))
    }
}
