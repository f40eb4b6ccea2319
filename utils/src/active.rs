//! Serialize asynchronous requests onto a single dedicated worker.

use crate::queue::BlockingQueue;
use futures::channel::oneshot;
use std::{
    io,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex, PoisonError},
    thread::{self, JoinHandle},
};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Errors that can occur when submitting work to an [ActiveObject].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The worker has been stopped.
    #[error("active object stopped")]
    Stopped,
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A task paired with the callback to run once it completes.
struct Request {
    task: Job,
    on_complete: Job,
}

/// Runs submitted tasks one at a time, in submission order, on a dedicated thread.
///
/// [ActiveObject::stop] (also called on drop) closes the queue and waits for the
/// worker to finish every task that was accepted before the stop. A task that
/// panics is logged and skipped (its callback does not run), as is a panicking
/// callback; either way the worker moves on to the next task.
pub struct ActiveObject {
    queue: Arc<BlockingQueue<Request>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ActiveObject {
    /// Spawn a worker thread named `name`.
    pub fn new(name: &str) -> Result<Self, io::Error> {
        let queue = Arc::new(BlockingQueue::<Request>::new());
        let worker = {
            let queue = queue.clone();
            let name = name.to_string();
            thread::Builder::new().name(name.clone()).spawn(move || {
                debug!(name = %name, "worker started");
                let (mut completed, mut panicked) = (0u64, 0u64);
                while let Some(Request { task, on_complete }) = queue.wait_and_pop() {
                    if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                        warn!(name = %name, "task panicked");
                        panicked += 1;
                        continue;
                    }
                    if panic::catch_unwind(AssertUnwindSafe(on_complete)).is_err() {
                        warn!(name = %name, "completion callback panicked");
                        panicked += 1;
                        continue;
                    }
                    completed += 1;
                }
                debug!(name = %name, completed, panicked, "worker stopped");
            })?
        };
        Ok(Self {
            queue,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Enqueue `task`, running `on_complete` on the worker after it finishes.
    pub fn submit<T, C>(&self, task: T, on_complete: C) -> Result<(), Error>
    where
        T: FnOnce() + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        self.queue
            .push(Request {
                task: Box::new(task),
                on_complete: Box::new(on_complete),
            })
            .map_err(|_| Error::Stopped)?;
        trace!(pending = self.queue.len(), "task submitted");
        Ok(())
    }

    /// Enqueue `f` and return a receiver for its result.
    ///
    /// The receiver resolves to [oneshot::Canceled] if `f` panics.
    pub fn call<F, R>(&self, f: F) -> Result<oneshot::Receiver<R>, Error>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        self.submit(
            move || {
                let _ = sender.send(f());
            },
            || {},
        )?;
        Ok(receiver)
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Stop accepting tasks, run every queued task, and join the worker.
    ///
    /// Idempotent. Returns `false` if the worker thread itself panicked, which
    /// tasks and completion callbacks cannot cause.
    pub fn stop(&self) -> bool {
        self.queue.close();
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match worker {
            Some(handle) => handle.join().is_ok(),
            None => true,
        }
    }
}

impl Drop for ActiveObject {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_macros::test_traced;
    use futures::executor::block_on;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    #[test_traced]
    fn test_tasks_run_in_order_with_callbacks() {
        let active = ActiveObject::new("ordered").unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let task_log = log.clone();
            let callback_log = log.clone();
            active
                .submit(
                    move || task_log.lock().unwrap().push(format!("task {i}")),
                    move || callback_log.lock().unwrap().push(format!("done {i}")),
                )
                .unwrap();
        }
        assert!(active.stop());

        let log = log.lock().unwrap();
        let expected: Vec<_> = (0..5)
            .flat_map(|i| [format!("task {i}"), format!("done {i}")])
            .collect();
        assert_eq!(*log, expected);
    }

    #[test]
    fn test_stop_drains_queue() {
        let active = ActiveObject::new("drain").unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let counter = counter.clone();
            active
                .submit(
                    move || {
                        thread::sleep(Duration::from_micros(50));
                        counter.fetch_add(1, Ordering::SeqCst);
                    },
                    || {},
                )
                .unwrap();
        }
        assert!(active.stop());
        assert_eq!(counter.load(Ordering::SeqCst), 100);
        assert_eq!(active.pending(), 0);
    }

    #[test]
    fn test_submit_after_stop() {
        let active = ActiveObject::new("stopped").unwrap();
        assert!(active.stop());
        assert!(active.stop());
        assert_eq!(active.submit(|| {}, || {}), Err(Error::Stopped));
        assert!(active.call(|| 1).is_err());
    }

    #[test]
    fn test_call_returns_result() {
        let active = ActiveObject::new("call").unwrap();
        let receiver = active
            .call(|| thread::current().name().map(str::to_string))
            .unwrap();
        assert_eq!(block_on(receiver).unwrap(), Some("call".to_string()));
    }

    #[test]
    fn test_call_panic_cancels_receiver() {
        let active = ActiveObject::new("panic").unwrap();
        let receiver = active.call(|| -> u32 { panic!("task failed") }).unwrap();
        assert!(block_on(receiver).is_err());

        // The worker survives and keeps serving requests
        let receiver = active.call(|| 7u32).unwrap();
        assert_eq!(block_on(receiver).unwrap(), 7);
        assert!(active.stop());
    }

    #[test_traced]
    fn test_callback_panic_keeps_worker_alive() {
        let active = ActiveObject::new("callback").unwrap();
        active.submit(|| {}, || panic!("callback failed")).unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let counter = counter.clone();
            active
                .submit(
                    move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                    },
                    || {},
                )
                .unwrap();
        }
        assert!(active.stop());
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_drop_drains_queue() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let active = ActiveObject::new("dropped").unwrap();
            for _ in 0..10 {
                let counter = counter.clone();
                active
                    .submit(
                        move || {
                            counter.fetch_add(1, Ordering::SeqCst);
                        },
                        || {},
                    )
                    .unwrap();
            }
        }
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }
}
