use crate::batch::{wait_for_policy, HandleSet, TaskSet, WaitPolicy};
use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::handle::Completion;
use crate::manager::{ShutdownMode, ThreadPoolManager};
use crate::notifier::TaskCompletionStatus;
use crate::task::Runnable;
use crate::wrapper::TaskWrapper;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, info_span, warn};

/// Summary of one batch after [`AsyncExecutor::execute_all`] waited on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
  pub name: String,
  pub policy: WaitPolicy,
  pub task_count: usize,
  /// Slot of the first task seen in a terminal state.
  pub first_resolved: Option<usize>,
  pub succeeded: usize,
  pub failed: usize,
  pub panicked: usize,
  pub cancelled: usize,
  /// Tasks still running when the batch was considered done (`OneOf` only).
  pub pending: usize,
  pub elapsed: Duration,
}

struct PendingBatch {
  name: String,
  policy: WaitPolicy,
  runnables: Vec<Box<dyn Runnable>>,
  completions: Vec<Box<dyn Completion>>,
}

/// Fluent façade grouping work into named batches run against one pool.
///
/// Batches run one after the other in registration order; the tasks inside a
/// batch run concurrently on the pool. Every task of a batch is labelled with
/// the batch name, so `pool().cancel_tasks_by_label(name)` cancels whatever
/// part of it has not started yet.
///
/// ```no_run
/// use thread_orchestra::{AsyncExecutor, PoolConfig, TaskWrapper};
///
/// let mut executor = AsyncExecutor::with_private_pool(PoolConfig::new().thread_count(4)).unwrap();
/// let total = TaskWrapper::new(|| (1..=10).sum::<u32>());
/// let total_handle = total.future();
///
/// let reports = executor
///   .all_of("sums", (total, TaskWrapper::new(|| "side effect")))
///   .one("single", TaskWrapper::new(|| ()))
///   .execute_all();
///
/// assert_eq!(reports.len(), 2);
/// assert_eq!(total_handle.wait(), Ok(55));
/// ```
pub struct AsyncExecutor {
  pool: Arc<ThreadPoolManager>,
  owns_pool: bool,
  batches: Vec<PendingBatch>,
}

impl fmt::Debug for AsyncExecutor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("AsyncExecutor")
      .field("pool", &self.pool.name())
      .field("owns_pool", &self.owns_pool)
      .field("pending_batches", &self.batches.len())
      .finish()
  }
}

impl AsyncExecutor {
  /// An executor submitting to a pool shared with other users.
  pub fn new(pool: Arc<ThreadPoolManager>) -> Self {
    Self {
      pool,
      owns_pool: false,
      batches: Vec::new(),
    }
  }

  /// An executor with its own pool, shut down gracefully when the executor drops.
  pub fn with_private_pool(config: PoolConfig) -> Result<Self, PoolError> {
    let pool = config.build()?;
    Ok(Self {
      pool,
      owns_pool: true,
      batches: Vec::new(),
    })
  }

  pub fn pool(&self) -> &Arc<ThreadPoolManager> {
    &self.pool
  }

  pub fn pending_batches(&self) -> usize {
    self.batches.len()
  }

  /// Registers a batch that is done once every task is terminal.
  pub fn all_of<S: TaskSet>(&mut self, name: impl Into<String>, set: S) -> &mut Self {
    self.add_batch(name, WaitPolicy::AllOf, set);
    self
  }

  /// Registers a batch that is done as soon as any one task is terminal.
  /// The remaining tasks keep running in the background.
  pub fn one_of<S: TaskSet>(&mut self, name: impl Into<String>, set: S) -> &mut Self {
    self.add_batch(name, WaitPolicy::OneOf, set);
    self
  }

  /// Registers a single-task batch.
  pub fn one<T>(&mut self, name: impl Into<String>, task: TaskWrapper<T>) -> &mut Self
  where
    T: Clone + Send + 'static,
  {
    self.add_batch(name, WaitPolicy::AllOf, (task,));
    self
  }

  /// Registers a batch and returns its typed handles, for callers that want
  /// to read the results after [`execute_all`](Self::execute_all).
  pub fn add_batch<S: TaskSet>(&mut self, name: impl Into<String>, policy: WaitPolicy, set: S) -> S::Handles {
    let name = name.into();
    let (runnables, handles) = set.into_parts();
    let completions = handles.completions();
    debug!(batch = %name, ?policy, task_count = runnables.len(), "Registered batch.");
    self.batches.push(PendingBatch {
      name,
      policy,
      runnables,
      completions,
    });
    handles
  }

  /// Runs every registered batch in order and waits on each per its policy.
  ///
  /// Registered batches are consumed; the executor can be reused afterwards.
  pub fn execute_all(&mut self) -> Vec<BatchReport> {
    let batches = std::mem::take(&mut self.batches);
    info!(pool_name = %self.pool.name(), batch_count = batches.len(), "Executing registered batches.");
    batches.into_iter().map(|batch| self.execute_batch(batch)).collect()
  }

  fn execute_batch(&self, batch: PendingBatch) -> BatchReport {
    let PendingBatch {
      name,
      policy,
      runnables,
      completions,
    } = batch;

    let span = info_span!("batch", batch = %name, ?policy);
    let _entered = span.enter();
    let started = Instant::now();

    let labels = Arc::new(HashSet::from_iter([name.clone()]));
    for (slot, runnable) in runnables.into_iter().enumerate() {
      if let Err(e) = self.pool.submit_runnable(labels.clone(), runnable) {
        warn!(slot, error = %e, "Batch task rejected at submission.");
      }
    }

    let first_resolved = wait_for_policy(&completions, policy);

    let mut report = BatchReport {
      name,
      policy,
      task_count: completions.len(),
      first_resolved,
      succeeded: 0,
      failed: 0,
      panicked: 0,
      cancelled: 0,
      pending: 0,
      elapsed: started.elapsed(),
    };
    for completion in &completions {
      match completion.status() {
        Some(TaskCompletionStatus::Success) => report.succeeded += 1,
        Some(TaskCompletionStatus::Failed) => report.failed += 1,
        Some(TaskCompletionStatus::Panicked) => report.panicked += 1,
        Some(TaskCompletionStatus::Cancelled) => report.cancelled += 1,
        None => report.pending += 1,
      }
    }

    info!(
      succeeded = report.succeeded,
      failed = report.failed + report.panicked,
      cancelled = report.cancelled,
      pending = report.pending,
      elapsed = ?report.elapsed,
      "Batch done."
    );
    report
  }
}

impl Drop for AsyncExecutor {
  fn drop(&mut self) {
    if !self.batches.is_empty() {
      warn!(
        pool_name = %self.pool.name(),
        "AsyncExecutor dropped with {} unexecuted batches; their handles resolve as cancelled.",
        self.batches.len()
      );
    }
    // Unexecuted runnables resolve their handles as cancelled when dropped.
    self.batches.clear();

    if self.owns_pool {
      self.pool.shutdown(ShutdownMode::Graceful);
    }
  }
}
