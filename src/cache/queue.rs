//! Serial Execution Contexts
//!
//! A `SerialQueue` is a named worker thread draining a FIFO channel. Every
//! disk tier owns one, so reads, writes, removals and trims against the same
//! directory never interleave. Deferred completions go through a separate
//! process-wide callback queue.
//!
//! A panicking job is caught and logged and the worker keeps draining. This
//! only holds when panics unwind: the `blobtier` binary's release profile
//! sets `panic = "abort"`, so there a panicking job ends the process.
//! Library users get whatever their own profile selects.

use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, ThreadId};

use crossbeam::channel::{self, Sender};
use once_cell::sync::Lazy;
use tracing::{error, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Strictly ordered background execution context
pub struct SerialQueue {
    label: String,
    sender: Option<Sender<Job>>,
    worker: Option<ThreadId>,
}

impl SerialQueue {
    /// Spawn a queue with its own worker thread.
    ///
    /// If the thread cannot be spawned the queue degrades to running jobs
    /// inline on the dispatching thread.
    pub fn new(label: impl Into<String>) -> Self {
        let label = label.into();
        let (sender, receiver) = channel::unbounded::<Job>();

        let spawned = thread::Builder::new().name(label.clone()).spawn(move || {
            for job in receiver.iter() {
                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    error!("Job panicked on serial queue");
                }
            }
        });

        match spawned {
            Ok(handle) => Self {
                worker: Some(handle.thread().id()),
                sender: Some(sender),
                label,
            },
            Err(e) => {
                warn!(queue = %label, error = %e, "Failed to spawn queue worker, running inline");
                Self {
                    label,
                    sender: None,
                    worker: None,
                }
            }
        }
    }

    /// Queue label (also the worker thread name)
    pub fn label(&self) -> &str {
        &self.label
    }

    /// True when called from this queue's worker thread
    pub fn is_current(&self) -> bool {
        self.worker == Some(thread::current().id())
    }

    /// Enqueue `job` behind everything already dispatched
    pub fn dispatch<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let job: Job = Box::new(job);
        match &self.sender {
            Some(sender) => {
                if let Err(channel::SendError(job)) = sender.send(job) {
                    warn!(queue = %self.label, "Queue worker gone, running job inline");
                    job();
                }
            }
            None => job(),
        }
    }

    /// Enqueue `job` and block until it has run.
    ///
    /// Runs inline when called from the worker itself. Returns `None` only if
    /// the job was dropped without running; a panic inside the job is resumed
    /// on the caller.
    pub fn dispatch_sync<R, F>(&self, job: F) -> Option<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        if self.sender.is_none() || self.is_current() {
            return Some(job());
        }

        let (tx, rx) = channel::bounded(1);
        self.dispatch(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(job));
            let _ = tx.send(outcome);
        });

        match rx.recv() {
            Ok(Ok(value)) => Some(value),
            Ok(Err(payload)) => panic::resume_unwind(payload),
            Err(_) => None,
        }
    }

    /// Wait for every job dispatched before this call
    pub fn flush(&self) {
        let _ = self.dispatch_sync(|| ());
    }
}

impl std::fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialQueue")
            .field("label", &self.label)
            .field("threaded", &self.sender.is_some())
            .finish()
    }
}

static CALLBACK_QUEUE: Lazy<SerialQueue> = Lazy::new(|| SerialQueue::new("blobtier-callbacks"));

/// Process-wide queue that delivers deferred completions
pub fn callback_queue() -> &'static SerialQueue {
    &CALLBACK_QUEUE
}

/// Run `f` on the callback queue (the next scheduling turn)
pub fn dispatch_callback<F>(f: F)
where
    F: FnOnce() + Send + 'static,
{
    CALLBACK_QUEUE.dispatch(f);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_jobs_run_in_order() {
        let queue = SerialQueue::new("test-order");
        let log = Arc::new(Mutex::new(Vec::new()));

        for i in 0..100 {
            let log = Arc::clone(&log);
            queue.dispatch(move || log.lock().push(i));
        }
        queue.flush();

        let log = log.lock();
        assert_eq!(*log, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_dispatch_sync_returns_value() {
        let queue = SerialQueue::new("test-sync");
        assert_eq!(queue.dispatch_sync(|| 40 + 2), Some(42));
    }

    #[test]
    fn test_dispatch_sync_waits_for_earlier_jobs() {
        let queue = SerialQueue::new("test-barrier");
        let done = Arc::new(Mutex::new(false));

        let flag = Arc::clone(&done);
        queue.dispatch(move || {
            std::thread::sleep(Duration::from_millis(50));
            *flag.lock() = true;
        });

        let observed = queue.dispatch_sync({
            let done = Arc::clone(&done);
            move || *done.lock()
        });
        assert_eq!(observed, Some(true));
    }

    #[test]
    fn test_dispatch_sync_from_worker_runs_inline() {
        let queue = Arc::new(SerialQueue::new("test-reentrant"));
        let inner = Arc::clone(&queue);
        let value = queue.dispatch_sync(move || inner.dispatch_sync(|| 7).unwrap());
        assert_eq!(value, Some(7));
    }

    #[test]
    fn test_worker_survives_panicking_job() {
        let queue = SerialQueue::new("test-panic");
        queue.dispatch(|| panic!("boom"));
        assert_eq!(queue.dispatch_sync(|| 1), Some(1));
    }

    #[test]
    fn test_worker_thread_is_named() {
        let queue = SerialQueue::new("blobtier-io-named");
        let name = queue
            .dispatch_sync(|| std::thread::current().name().map(str::to_string))
            .flatten();
        assert_eq!(name.as_deref(), Some("blobtier-io-named"));
    }

    #[test]
    fn test_callback_queue_runs_jobs() {
        let (tx, rx) = std::sync::mpsc::channel();
        dispatch_callback(move || tx.send(5).unwrap());
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 5);
    }
}
