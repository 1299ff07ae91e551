//! Cancelable Task Handle
//!
//! One unit of asynchronous cache work. The completion callback is gated by
//! a single compare-and-swap on the task state, so it runs at most once and
//! never after a cancel has been observed.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

const PENDING: u8 = 0;
const COMPLETED: u8 = 1;
const CANCELED: u8 = 2;

/// Observable task state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Work not finished, completion not yet delivered
    Pending,
    /// Completion delivered
    Completed,
    /// Canceled before completion; completion is suppressed
    Canceled,
}

struct TaskInner {
    state: AtomicU8,
    token: CancellationToken,
    children: Mutex<Vec<AsyncTask>>,
}

/// Cancelable handle for one asynchronous cache operation
#[derive(Clone)]
pub struct AsyncTask {
    inner: Arc<TaskInner>,
}

impl Default for AsyncTask {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncTask {
    /// Create a pending task
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TaskInner {
                state: AtomicU8::new(PENDING),
                token: CancellationToken::new(),
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Create a task that has already completed
    pub fn completed() -> Self {
        let task = Self::new();
        task.inner.state.store(COMPLETED, Ordering::Release);
        task
    }

    /// Current state
    pub fn state(&self) -> TaskState {
        match self.inner.state.load(Ordering::Acquire) {
            PENDING => TaskState::Pending,
            COMPLETED => TaskState::Completed,
            _ => TaskState::Canceled,
        }
    }

    /// True once canceled
    pub fn is_cancelled(&self) -> bool {
        self.state() == TaskState::Canceled
    }

    /// True once completed or canceled
    pub fn is_finished(&self) -> bool {
        self.state() != TaskState::Pending
    }

    /// Cancel the task and every attached child.
    ///
    /// Work already running is not interrupted; its result is discarded.
    pub fn cancel(&self) {
        let transitioned = self
            .inner
            .state
            .compare_exchange(PENDING, CANCELED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if transitioned {
            self.inner.token.cancel();
        }
        let children = std::mem::take(&mut *self.inner.children.lock());
        for child in children {
            child.cancel();
        }
    }

    /// Run `f` as the task's completion if the task is still pending.
    ///
    /// Returns false (and drops `f`) if the task was canceled or already completed.
    pub fn complete<F: FnOnce()>(&self, f: F) -> bool {
        let won = self
            .inner
            .state
            .compare_exchange(PENDING, COMPLETED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            self.inner.children.lock().clear();
            f();
        }
        won
    }

    /// Tie `child` to this task: canceling this task cancels the child too.
    pub fn attach(&self, child: AsyncTask) {
        let mut children = self.inner.children.lock();
        match self.state() {
            TaskState::Pending => children.push(child),
            TaskState::Canceled => {
                drop(children);
                child.cancel();
            }
            TaskState::Completed => {}
        }
    }

    /// Token that fires when the task is canceled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    /// Wait until the task is canceled
    pub async fn cancelled(&self) {
        self.inner.token.cancelled().await
    }
}

impl std::fmt::Debug for AsyncTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncTask")
            .field("state", &self.state())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
