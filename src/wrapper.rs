use crate::error::{PoolError, TaskResult};
use crate::handle::{result_channel, ResultHandle, ResultSlot};
use crate::notifier::TaskCompletionStatus;
use crate::task::Runnable;

use std::any::Any;
use std::fmt;
use std::fmt::Display;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::{debug, error, trace};

type Job<T> = Box<dyn FnOnce() -> TaskResult<T> + Send + 'static>;

/// Adapts a callable and its captured arguments into a unit the pool can run.
///
/// Arguments are captured by value: the `'static` bound means nothing
/// borrowed from the submitting scope (such as a slice of a temporary
/// `String`) can be captured, so the task never outlives its inputs.
pub struct TaskWrapper<T> {
  job: Job<T>,
  slot: ResultSlot<T>,
  handle: ResultHandle<T>,
}

impl<T> fmt::Debug for TaskWrapper<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TaskWrapper")
      .field("handle", &self.handle)
      .finish_non_exhaustive()
  }
}

impl<T: Send + 'static> TaskWrapper<T> {
  /// Wraps an infallible callable. A panic inside it resolves the handle as
  /// `PoolError::TaskPanicked`.
  pub fn new<F>(f: F) -> Self
  where
    F: FnOnce() -> T + Send + 'static,
  {
    Self::from_job(Box::new(move || Ok(f())))
  }

  /// Wraps `f` together with a snapshot of its arguments.
  ///
  /// ```
  /// use thread_orchestra::TaskWrapper;
  ///
  /// let name = String::from("worker");
  /// let wrapper = TaskWrapper::with_args(|(greeting, n): (&'static str, String)| format!("{greeting} {n}"), ("hello", name));
  /// let handle = wrapper.future();
  /// wrapper.run();
  /// assert_eq!(handle.wait(), Ok("hello worker".to_string()));
  /// ```
  pub fn with_args<A, F>(f: F, args: A) -> Self
  where
    A: Send + 'static,
    F: FnOnce(A) -> T + Send + 'static,
  {
    Self::from_job(Box::new(move || Ok(f(args))))
  }

  /// Wraps a fallible callable. `Err(e)` resolves the handle as
  /// `PoolError::TaskFailed(e.to_string())`.
  pub fn fallible<F, E>(f: F) -> Self
  where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    E: Display,
  {
    Self::from_job(Box::new(move || f().map_err(|e| PoolError::TaskFailed(e.to_string()))))
  }

  fn from_job(job: Job<T>) -> Self {
    let (slot, handle) = result_channel();
    Self { job, slot, handle }
  }

  /// A handle to this wrapper's outcome. May be called any number of times.
  pub fn future(&self) -> ResultHandle<T> {
    self.handle.clone()
  }

  /// Executes the wrapped callable on the current thread and resolves the handle.
  pub fn run(self) -> TaskCompletionStatus {
    let Self { job, slot, handle: _ } = self;

    let outcome = match catch_unwind(AssertUnwindSafe(job)) {
      Ok(outcome) => outcome,
      Err(payload) => {
        let message = panic_message(payload.as_ref());
        error!(panic = %message, "Task panicked during execution.");
        Err(PoolError::TaskPanicked(message))
      }
    };

    match &outcome {
      Ok(_) => trace!("Task executed successfully."),
      Err(e) => debug!(error = %e, "Task finished with an error."),
    }

    let status = TaskCompletionStatus::from(&outcome);
    slot.resolve(outcome);
    status
  }

  pub(crate) fn resolve_without_running(self, error: PoolError) {
    let Self { job, slot, handle: _ } = self;
    drop(job);
    slot.resolve(Err(error));
  }
}

impl<T: Send + 'static> Runnable for TaskWrapper<T> {
  fn run(self: Box<Self>) -> TaskCompletionStatus {
    TaskWrapper::run(*self)
  }

  fn skip_cancelled(self: Box<Self>) {
    self.resolve_without_running(PoolError::TaskCancelled);
  }

  fn reject(self: Box<Self>, error: PoolError) {
    self.resolve_without_running(error);
  }
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    (*s).to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "unknown panic payload".to_string()
  }
}
