use crate::error::PoolError;
use crate::notifier::TaskCompletionStatus;

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// A descriptive label for a task, typically a `String`.
pub type TaskLabel = String;

/// A type-erased unit of work that resolves its own result handle.
///
/// Exactly one of the three methods is called, exactly once.
pub trait Runnable: Send + 'static {
  /// Executes the work and resolves the handle with its outcome.
  fn run(self: Box<Self>) -> TaskCompletionStatus;

  /// Resolves the handle as cancelled without executing the work.
  fn skip_cancelled(self: Box<Self>);

  /// Resolves the handle with `error` without executing the work.
  fn reject(self: Box<Self>, error: PoolError);
}

/// Internal representation of a task sitting on the queue or running on a worker.
pub(crate) struct TaskUnit {
  pub(crate) task_id: u64,
  pub(crate) labels: Arc<HashSet<TaskLabel>>,
  pub(crate) token: CancellationToken,
  pub(crate) runnable: Box<dyn Runnable>,
}

impl fmt::Debug for TaskUnit {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TaskUnit")
      .field("task_id", &self.task_id)
      .field("labels", &self.labels)
      .field("cancelled", &self.token.is_cancelled())
      .finish_non_exhaustive()
  }
}

thread_local! {
  static CURRENT_TASK_TOKEN: RefCell<Option<CancellationToken>> = const { RefCell::new(None) };
}

/// Installs a task's token as the current one for the duration of its execution.
pub(crate) struct CurrentTaskGuard {
  previous: Option<CancellationToken>,
}

impl CurrentTaskGuard {
  pub(crate) fn enter(token: &CancellationToken) -> Self {
    let previous = CURRENT_TASK_TOKEN.with(|current| current.replace(Some(token.clone())));
    Self { previous }
  }
}

impl Drop for CurrentTaskGuard {
  fn drop(&mut self) {
    let previous = self.previous.take();
    CURRENT_TASK_TOKEN.with(|current| {
      *current.borrow_mut() = previous;
    });
  }
}

/// The cancellation token of the task running on this thread, if any.
///
/// Long-running task bodies can poll this to stop early once their handle
/// (or a label/forceful-shutdown cancellation) has been triggered.
pub fn current_task_token() -> Option<CancellationToken> {
  CURRENT_TASK_TOKEN.with(|current| current.borrow().clone())
}

/// True when called from inside a pool task whose cancellation was requested.
/// Always false outside a pool task.
pub fn current_task_cancelled() -> bool {
  CURRENT_TASK_TOKEN.with(|current| {
    current
      .borrow()
      .as_ref()
      .map(CancellationToken::is_cancelled)
      .unwrap_or(false)
  })
}
