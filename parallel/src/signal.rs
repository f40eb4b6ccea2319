//! Cooperative cancellation of in-flight reductions.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Requests cancellation of every reduction observing the paired [Signal].
#[derive(Clone, Debug)]
pub struct Signaler {
    flag: Arc<AtomicBool>,
}

impl Signaler {
    /// Create a new signaler and the [Signal] it controls.
    pub fn new() -> (Self, Signal) {
        let flag = Arc::new(AtomicBool::new(false));
        (Self { flag: flag.clone() }, Signal { flag })
    }

    /// Mark the signal as set. Idempotent.
    pub fn signal(&self) {
        self.flag.store(true, Ordering::Release);
    }
}

/// The observing side of a [Signaler].
///
/// The engine checks the signal each time it enters a range, so branches that have
/// not started yet return early (releasing their budget) while leaves that are
/// already running finish their range.
#[derive(Clone, Debug)]
pub struct Signal {
    flag: Arc<AtomicBool>,
}

impl Signal {
    /// Returns whether the paired [Signaler] has fired.
    pub fn is_signaled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}
