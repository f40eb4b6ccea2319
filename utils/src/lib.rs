//! Coordinate work across threads with bounded queues.
//!
//! - [BlockingQueue]: a FIFO queue whose consumers suspend until an item is available
//!   (guarded suspension), optionally bounded so producers suspend while it is full.
//! - [ActiveObject]: serializes submitted tasks onto one dedicated worker and drains
//!   every accepted task before stopping.
//!
//! Both are suitable for embedding a [fission-parallel](https://docs.rs/fission-parallel)
//! engine in a longer-lived service (see `tests/reduction_service.rs`).

pub mod active;
pub use active::ActiveObject;
pub mod queue;
pub use queue::{BlockingQueue, PushError};
