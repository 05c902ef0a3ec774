use thiserror::Error;

/// Errors that can occur within the `thread_orchestra` pool.
///
/// Task-level variants (`TaskFailed`, `TaskPanicked`, `TaskCancelled`) are only
/// ever observed through the `ResultHandle` of the task that produced them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
  #[error("Pool is shutting down or already shut down, cannot accept new tasks")]
  PoolShuttingDown,

  #[error("Failed to spawn pool worker thread: {0}")]
  WorkerSpawnFailed(String),

  #[error("Task returned an error: {0}")]
  TaskFailed(String),

  #[error("Submitted task panicked: {0}")]
  TaskPanicked(String),

  #[error("Task was cancelled before it started")]
  TaskCancelled,
}

impl PoolError {
  /// True for the outcomes a task itself can produce (as opposed to pool-level errors).
  pub fn is_task_error(&self) -> bool {
    matches!(
      self,
      PoolError::TaskFailed(_) | PoolError::TaskPanicked(_) | PoolError::TaskCancelled
    )
  }
}

/// The outcome stored in every `ResultHandle`.
pub type TaskResult<T> = Result<T, PoolError>;
