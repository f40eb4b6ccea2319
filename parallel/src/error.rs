use crate::Range;
use std::convert::Infallible;
use thiserror::Error;

/// Errors that can occur during a reduction.
///
/// `E` is the error type of the fold operation. Reductions whose fold cannot fail
/// use the default, [Infallible].
#[derive(Debug, Error)]
pub enum Error<E = Infallible> {
    /// The fold operation failed on an element of `range`.
    #[error("leaf {range} failed: {error}")]
    Leaf { range: Range, error: E },
    /// A forked branch panicked.
    #[error("branch panicked: {0}")]
    Branch(String),
    /// The reduction was canceled before it completed.
    #[error("reduction canceled")]
    Canceled,
}

impl<E> Error<E> {
    /// Returns the fold error if this is a leaf failure.
    pub fn leaf(&self) -> Option<(Range, &E)> {
        match self {
            Self::Leaf { range, error } => Some((*range, error)),
            _ => None,
        }
    }
}
