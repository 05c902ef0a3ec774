use crate::error::{PoolError, TaskResult};
use crate::notifier::TaskCompletionStatus;
use crate::task::TaskLabel;
use crate::wrapper::panic_message;

use std::collections::HashSet;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

type CompletionCallback = Box<dyn FnOnce() + Send + 'static>;

struct CellState<T> {
  outcome: Option<TaskResult<T>>,
  listeners: Vec<CompletionCallback>,
}

/// Single-writer, multi-reader storage for one task outcome.
pub(crate) struct ResultCell<T> {
  state: Mutex<CellState<T>>,
  resolved: Condvar,
  notify: Notify,
}

impl<T> ResultCell<T> {
  fn new() -> Self {
    Self {
      state: Mutex::new(CellState {
        outcome: None,
        listeners: Vec::new(),
      }),
      resolved: Condvar::new(),
      notify: Notify::new(),
    }
  }

  /// Stores `outcome` unless the cell already holds one. Returns whether this call resolved it.
  fn resolve(&self, outcome: TaskResult<T>) -> bool {
    let listeners = {
      let mut state = self.state.lock();
      if state.outcome.is_some() {
        return false;
      }
      state.outcome = Some(outcome);
      std::mem::take(&mut state.listeners)
    };

    self.resolved.notify_all();
    self.notify.notify_waiters();
    // A panicking listener must not unwind into the resolving worker.
    for listener in listeners {
      if let Err(payload) = catch_unwind(AssertUnwindSafe(listener)) {
        tracing::error!(
          panic = %panic_message(payload.as_ref()),
          "A completion listener panicked; remaining listeners still run."
        );
      }
    }
    true
  }

  fn is_ready(&self) -> bool {
    self.state.lock().outcome.is_some()
  }

  fn wait_ready(&self) {
    let mut state = self.state.lock();
    while state.outcome.is_none() {
      self.resolved.wait(&mut state);
    }
  }

  fn on_complete(&self, callback: CompletionCallback) {
    {
      let mut state = self.state.lock();
      if state.outcome.is_none() {
        state.listeners.push(callback);
        return;
      }
    }
    callback();
  }

  fn status(&self) -> Option<TaskCompletionStatus> {
    self.state.lock().outcome.as_ref().map(TaskCompletionStatus::from)
  }
}

impl<T: Clone> ResultCell<T> {
  fn get(&self) -> Option<TaskResult<T>> {
    self.state.lock().outcome.clone()
  }

  fn wait(&self) -> TaskResult<T> {
    let mut state = self.state.lock();
    loop {
      if let Some(outcome) = state.outcome.as_ref() {
        return outcome.clone();
      }
      self.resolved.wait(&mut state);
    }
  }

  fn wait_until(&self, deadline: Instant) -> Option<TaskResult<T>> {
    let mut state = self.state.lock();
    loop {
      if let Some(outcome) = state.outcome.as_ref() {
        return Some(outcome.clone());
      }
      if self.resolved.wait_until(&mut state, deadline).timed_out() {
        return state.outcome.clone();
      }
    }
  }
}

/// The write side of a result cell. Owned by whoever runs the task.
///
/// Dropping a slot that was never resolved resolves it as cancelled so that
/// waiters cannot hang on work that will never run.
pub(crate) struct ResultSlot<T> {
  cell: Option<Arc<ResultCell<T>>>,
}

impl<T> ResultSlot<T> {
  pub(crate) fn resolve(mut self, outcome: TaskResult<T>) -> bool {
    match self.cell.take() {
      Some(cell) => cell.resolve(outcome),
      None => false,
    }
  }
}

impl<T> Drop for ResultSlot<T> {
  fn drop(&mut self) {
    if let Some(cell) = self.cell.take() {
      if cell.resolve(Err(PoolError::TaskCancelled)) {
        tracing::warn!("Result slot dropped without an outcome; resolved as cancelled.");
      }
    }
  }
}

/// Creates a connected slot/handle pair.
pub(crate) fn result_channel<T>() -> (ResultSlot<T>, ResultHandle<T>) {
  let cell = Arc::new(ResultCell::new());
  (
    ResultSlot {
      cell: Some(cell.clone()),
    },
    ResultHandle { cell },
  )
}

/// A shareable, awaitable handle to the eventual outcome of one task.
///
/// Every clone observes the same outcome. Reads after resolution are
/// idempotent: they return the same `Ok` value or the same `PoolError`
/// however many times and from however many threads they are made.
pub struct ResultHandle<T> {
  cell: Arc<ResultCell<T>>,
}

impl<T> Clone for ResultHandle<T> {
  fn clone(&self) -> Self {
    Self {
      cell: self.cell.clone(),
    }
  }
}

impl<T> fmt::Debug for ResultHandle<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ResultHandle")
      .field("status", &self.cell.status())
      .finish()
  }
}

impl<T> ResultHandle<T> {
  /// Whether the task has reached a terminal state.
  pub fn is_ready(&self) -> bool {
    self.cell.is_ready()
  }

  /// Blocks until the task has reached a terminal state without reading the value.
  pub fn wait_ready(&self) {
    self.cell.wait_ready()
  }

  /// Terminal status of the task, or `None` while it is pending.
  pub fn status(&self) -> Option<TaskCompletionStatus> {
    self.cell.status()
  }

  /// Registers `callback` to run once the task resolves.
  ///
  /// The callback runs on the resolving thread, or immediately on the calling
  /// thread when the task is already resolved.
  pub fn on_complete(&self, callback: impl FnOnce() + Send + 'static) {
    self.cell.on_complete(Box::new(callback))
  }
}

impl<T: Clone> ResultHandle<T> {
  /// Returns the outcome if the task already resolved.
  pub fn try_get(&self) -> Option<TaskResult<T>> {
    self.cell.get()
  }

  /// Blocks the current thread until the task resolves.
  ///
  /// # Errors
  /// Returns `PoolError::TaskFailed` if the task returned an error.
  /// Returns `PoolError::TaskPanicked` if the task panicked.
  /// Returns `PoolError::TaskCancelled` if the task was skipped before it started.
  /// Returns `PoolError::PoolShuttingDown` if the task was rejected at submission.
  pub fn wait(&self) -> TaskResult<T> {
    self.cell.wait()
  }

  /// Like [`wait`](Self::wait), but gives up after `timeout` and returns `None`.
  /// The task itself is unaffected by the timeout.
  pub fn wait_timeout(&self, timeout: Duration) -> Option<TaskResult<T>> {
    self.cell.wait_until(Instant::now() + timeout)
  }

  /// Awaits the outcome without blocking the calling thread.
  pub async fn await_result(&self) -> TaskResult<T> {
    loop {
      let mut notified = std::pin::pin!(self.cell.notify.notified());
      notified.as_mut().enable();
      if let Some(outcome) = self.cell.get() {
        return outcome;
      }
      notified.await;
    }
  }
}

/// Object-safe view of a result handle, independent of the value type.
///
/// Lets batches made of differently typed tasks be waited on uniformly.
pub trait Completion: Send + Sync {
  fn is_ready(&self) -> bool;
  fn wait_ready(&self);
  fn status(&self) -> Option<TaskCompletionStatus>;
  fn on_complete_boxed(&self, callback: Box<dyn FnOnce() + Send + 'static>);
}

impl<T: Send + 'static> Completion for ResultHandle<T> {
  fn is_ready(&self) -> bool {
    self.cell.is_ready()
  }

  fn wait_ready(&self) {
    self.cell.wait_ready()
  }

  fn status(&self) -> Option<TaskCompletionStatus> {
    self.cell.status()
  }

  fn on_complete_boxed(&self, callback: Box<dyn FnOnce() + Send + 'static>) {
    self.cell.on_complete(callback)
  }
}

/// A handle to a task submitted to the `ThreadPoolManager`.
///
/// Allows requesting cancellation of the task and reading its result.
/// Cancellation is cooperative: it is honoured only if the task has not yet
/// been dequeued by a worker, or if the running task checks
/// [`current_task_cancelled`](crate::current_task_cancelled) itself. A running
/// task is never interrupted.
#[derive(Debug)]
pub struct TaskHandle<T> {
  pub(crate) task_id: u64,
  pub(crate) cancellation_token: CancellationToken,
  pub(crate) result: ResultHandle<T>,
  pub(crate) labels: Arc<HashSet<TaskLabel>>,
}

impl<T> TaskHandle<T> {
  /// Returns the unique ID of this task.
  pub fn id(&self) -> u64 {
    self.task_id
  }

  /// Returns a clone of the labels associated with this task.
  pub fn labels(&self) -> HashSet<TaskLabel> {
    (*self.labels).clone()
  }

  pub fn is_cancellation_requested(&self) -> bool {
    self.cancellation_token.is_cancelled()
  }

  /// Requests cancellation of this task. Best effort, see the type docs.
  pub fn cancel(&self) {
    tracing::debug!(task_id = %self.task_id, "TaskHandle: Cancellation requested.");
    self.cancellation_token.cancel();
  }

  /// A token that cancels this task when triggered.
  pub fn cancel_token(&self) -> CancellationToken {
    self.cancellation_token.clone()
  }

  /// A shareable handle to the task's outcome.
  pub fn result(&self) -> ResultHandle<T> {
    self.result.clone()
  }

  pub fn is_ready(&self) -> bool {
    self.result.is_ready()
  }

  /// Splits the handle into its result handle and cancel token.
  pub fn into_parts(self) -> (ResultHandle<T>, CancellationToken) {
    (self.result, self.cancellation_token)
  }
}

impl<T: Clone> TaskHandle<T> {
  /// Blocks until the task resolves. See [`ResultHandle::wait`].
  pub fn wait(&self) -> TaskResult<T> {
    self.result.wait()
  }

  pub fn wait_timeout(&self, timeout: Duration) -> Option<TaskResult<T>> {
    self.result.wait_timeout(timeout)
  }

  pub async fn await_result(&self) -> TaskResult<T> {
    self.result.await_result().await
  }
}
