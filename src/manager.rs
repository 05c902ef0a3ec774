use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::handle::TaskHandle;
use crate::notifier::{CompletionNotifier, TaskCompletionInfo, TaskCompletionStatus};
use crate::task::{CurrentTaskGuard, Runnable, TaskLabel, TaskUnit};
use crate::task_queue::TaskQueue;
use crate::wrapper::{panic_message, TaskWrapper};

use std::collections::HashSet;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn};

lazy_static::lazy_static! {
  static ref NEXT_POOL_TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

/// Defines how the pool should behave upon shutdown.
///
/// Both modes drain the queue: every accepted task resolves its handle
/// before `shutdown` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
  /// Runs every queued task and waits for running tasks to complete.
  Graceful,
  /// Cancels every queued and running task first. Queued tasks resolve as
  /// `PoolError::TaskCancelled` without running; running tasks only stop
  /// early if they poll [`current_task_cancelled`](crate::current_task_cancelled).
  ForcefulCancel,
}

/// A point-in-time snapshot of pool counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
  pub queued: usize,
  pub running: usize,
  pub peak_queued: usize,
  pub completed: u64,
  pub failed: u64,
  pub panicked: u64,
  pub cancelled: u64,
}

impl PoolStats {
  /// Tasks that reached a terminal state on a worker.
  pub fn finished(&self) -> u64 {
    self.completed + self.failed + self.panicked + self.cancelled
  }
}

type TaskRegistry = DashMap<u64, (CancellationToken, Arc<HashSet<TaskLabel>>)>;

/// State shared between the manager and its worker threads.
struct PoolShared {
  pool_name: Arc<String>,
  queue: TaskQueue<TaskUnit>,
  // Queued and running tasks, for label and forceful cancellation.
  task_registry: TaskRegistry,
  running: AtomicUsize,
  completed: AtomicU64,
  failed: AtomicU64,
  panicked: AtomicU64,
  cancelled: AtomicU64,
  notifier: CompletionNotifier,
}

impl PoolShared {
  fn run_worker_loop(self: Arc<Self>, worker_index: usize) {
    let span = info_span!("pool_worker", pool_name = %*self.pool_name, worker = worker_index);
    let _entered = span.enter();
    info!("Worker loop started.");

    while let Some(unit) = self.queue.pop() {
      self.execute(unit);
    }

    info!("Task queue closed and drained. Worker loop terminating.");
  }

  fn execute(&self, unit: TaskUnit) {
    let TaskUnit {
      task_id,
      labels,
      token,
      runnable,
    } = unit;

    let status = if token.is_cancelled() {
      debug!(%task_id, labels = ?labels, "Dequeued task already cancelled (task's own token). Skipping.");
      runnable.skip_cancelled();
      TaskCompletionStatus::Cancelled
    } else {
      let span = info_span!("managed_task", %task_id);
      let _entered = span.enter();
      debug!(labels = ?labels, "Dequeued task. Executing.");

      self.running.fetch_add(1, AtomicOrdering::SeqCst);
      let outcome = {
        let _current = CurrentTaskGuard::enter(&token);
        catch_unwind(AssertUnwindSafe(move || runnable.run()))
      };
      self.running.fetch_sub(1, AtomicOrdering::SeqCst);

      match outcome {
        Ok(status) => status,
        Err(payload) => {
          error!(panic = %panic_message(payload.as_ref()), "Panic escaped task execution; worker continues.");
          TaskCompletionStatus::Panicked
        }
      }
    };

    self.task_registry.remove(&task_id);
    self.record(status);
    self.notifier.notify(task_id, &labels, status);
    trace!(%task_id, ?status, "Task finished processing, removed from registry.");
  }

  fn record(&self, status: TaskCompletionStatus) {
    let counter = match status {
      TaskCompletionStatus::Success => &self.completed,
      TaskCompletionStatus::Failed => &self.failed,
      TaskCompletionStatus::Panicked => &self.panicked,
      TaskCompletionStatus::Cancelled => &self.cancelled,
    };
    counter.fetch_add(1, AtomicOrdering::Relaxed);
  }
}

/// A fixed-size pool of worker threads fed by one bounded FIFO queue.
///
/// Shared by reference counting: constructors return `Arc<ThreadPoolManager>`
/// and every clone of the `Arc` submits to the same workers. Dropping the
/// last reference closes the queue; workers drain it and exit on their own.
pub struct ThreadPoolManager {
  shared: Arc<PoolShared>,
  thread_count: usize,
  workers: Mutex<Vec<JoinHandle<()>>>,
  worker_thread_ids: Vec<ThreadId>,
}

impl fmt::Debug for ThreadPoolManager {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ThreadPoolManager")
      .field("pool_name", &self.shared.pool_name)
      .field("thread_count", &self.thread_count)
      .field("queue", &self.shared.queue)
      .field("notifier", &self.shared.notifier)
      .finish()
  }
}

impl ThreadPoolManager {
  /// Spawns a pool of `thread_count` workers with a queue of `queue_capacity`.
  ///
  /// `0` selects the defaults: available CPUs and 500 respectively.
  pub fn new(thread_count: usize, queue_capacity: usize, pool_name: &str) -> Result<Arc<Self>, PoolError> {
    PoolConfig::new()
      .thread_count(thread_count)
      .queue_capacity(queue_capacity)
      .name(pool_name)
      .build()
  }

  pub fn with_config(config: PoolConfig) -> Result<Arc<Self>, PoolError> {
    let thread_count = config.resolved_thread_count();
    let queue_capacity = config.resolved_queue_capacity();
    let pool_name = Arc::new(config.resolved_name().to_string());

    let shared = Arc::new(PoolShared {
      pool_name: pool_name.clone(),
      queue: TaskQueue::new(queue_capacity),
      task_registry: DashMap::new(),
      running: AtomicUsize::new(0),
      completed: AtomicU64::new(0),
      failed: AtomicU64::new(0),
      panicked: AtomicU64::new(0),
      cancelled: AtomicU64::new(0),
      notifier: CompletionNotifier::new(pool_name.clone()),
    });

    let mut workers = Vec::with_capacity(thread_count);
    for worker_index in 0..thread_count {
      let mut builder = thread::Builder::new().name(format!("{}-worker-{}", pool_name, worker_index));
      if let Some(size) = config.stack_size_bytes() {
        builder = builder.stack_size(size);
      }

      let worker_shared = shared.clone();
      match builder.spawn(move || worker_shared.run_worker_loop(worker_index)) {
        Ok(handle) => workers.push(handle),
        Err(spawn_error) => {
          error!(pool_name = %*pool_name, worker_index, "Failed to spawn worker thread: {}", spawn_error);
          shared.queue.close();
          for handle in workers {
            let _ = handle.join();
          }
          return Err(PoolError::WorkerSpawnFailed(spawn_error.to_string()));
        }
      }
    }

    info!(pool_name = %*pool_name, thread_count, queue_capacity, "Thread pool started.");

    let worker_thread_ids = workers.iter().map(|handle| handle.thread().id()).collect();
    Ok(Arc::new(Self {
      shared,
      thread_count,
      workers: Mutex::new(workers),
      worker_thread_ids,
    }))
  }

  pub fn name(&self) -> &str {
    &self.shared.pool_name
  }

  pub fn thread_count(&self) -> usize {
    self.thread_count
  }

  pub fn queue_capacity(&self) -> usize {
    self.shared.queue.capacity()
  }

  /// Returns the number of tasks currently executing on a worker.
  pub fn active_task_count(&self) -> usize {
    self.shared.running.load(AtomicOrdering::SeqCst)
  }

  /// Returns the current number of tasks in the pending queue.
  pub fn queued_task_count(&self) -> usize {
    self.shared.queue.len()
  }

  pub fn is_shutting_down(&self) -> bool {
    self.shared.queue.is_closed()
  }

  pub fn stats(&self) -> PoolStats {
    PoolStats {
      queued: self.shared.queue.len(),
      running: self.shared.running.load(AtomicOrdering::SeqCst),
      peak_queued: self.shared.queue.peak_len(),
      completed: self.shared.completed.load(AtomicOrdering::Relaxed),
      failed: self.shared.failed.load(AtomicOrdering::Relaxed),
      panicked: self.shared.panicked.load(AtomicOrdering::Relaxed),
      cancelled: self.shared.cancelled.load(AtomicOrdering::Relaxed),
    }
  }

  /// Registers a handler invoked on the worker thread after every task reaches
  /// a terminal state (including tasks skipped as cancelled).
  pub fn add_completion_handler(&self, handler: impl Fn(TaskCompletionInfo) + Send + Sync + 'static) {
    self.shared.notifier.add_handler(handler);
  }

  /// Submits a closure. Blocks while the queue is full.
  ///
  /// # Errors
  /// Returns `PoolError::PoolShuttingDown` if shutdown has begun, including
  /// when it begins while this call is blocked on a full queue.
  pub fn submit<T, F>(&self, f: F) -> Result<TaskHandle<T>, PoolError>
  where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
  {
    self.submit_wrapper(HashSet::new(), TaskWrapper::new(f))
  }

  pub fn submit_with_labels<T, F>(&self, labels: HashSet<TaskLabel>, f: F) -> Result<TaskHandle<T>, PoolError>
  where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
  {
    self.submit_wrapper(labels, TaskWrapper::new(f))
  }

  /// Submits a prepared [`TaskWrapper`]. On rejection the wrapper's own
  /// handle is resolved with the same error, so nothing waits forever.
  pub fn submit_wrapper<T>(&self, labels: HashSet<TaskLabel>, wrapper: TaskWrapper<T>) -> Result<TaskHandle<T>, PoolError>
  where
    T: Send + 'static,
  {
    let result = wrapper.future();
    let labels = Arc::new(labels);
    let (task_id, cancellation_token) = self.submit_runnable(labels.clone(), Box::new(wrapper))?;
    Ok(TaskHandle {
      task_id,
      cancellation_token,
      result,
      labels,
    })
  }

  pub(crate) fn submit_runnable(
    &self,
    labels: Arc<HashSet<TaskLabel>>,
    runnable: Box<dyn Runnable>,
  ) -> Result<(u64, CancellationToken), PoolError> {
    if self.shared.queue.is_closed() {
      warn!(pool_name = %*self.shared.pool_name, "Submit: Attempted to submit task to a pool that is shutting down or closed.");
      runnable.reject(PoolError::PoolShuttingDown);
      return Err(PoolError::PoolShuttingDown);
    }

    let task_id = NEXT_POOL_TASK_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed);
    let token = CancellationToken::new();
    self.shared.task_registry.insert(task_id, (token.clone(), labels.clone()));

    debug!(pool_name = %*self.shared.pool_name, %task_id, labels = ?labels, "Submitting task to queue.");

    let unit = TaskUnit {
      task_id,
      labels,
      token: token.clone(),
      runnable,
    };

    match self.shared.queue.push(unit) {
      Ok(()) => Ok((task_id, token)),
      Err(rejected) => {
        self.shared.task_registry.remove(&task_id);
        warn!(
          pool_name = %*self.shared.pool_name,
          %task_id,
          "Submit: Pool closed while waiting for a queue slot; task rejected."
        );
        rejected.runnable.reject(PoolError::PoolShuttingDown);
        Err(PoolError::PoolShuttingDown)
      }
    }
  }

  pub fn cancel_tasks_by_label(&self, label_to_cancel: &TaskLabel) {
    self.cancel_tasks_by_labels_internal(&HashSet::from_iter([label_to_cancel.clone()]));
  }

  pub fn cancel_tasks_by_labels(&self, labels_to_cancel: &HashSet<TaskLabel>) {
    self.cancel_tasks_by_labels_internal(labels_to_cancel);
  }

  fn cancel_tasks_by_labels_internal(&self, labels_to_cancel: &HashSet<TaskLabel>) {
    if labels_to_cancel.is_empty() {
      return;
    }
    info!(pool_name = %*self.shared.pool_name, "Requesting cancellation for tasks with labels: {:?}", labels_to_cancel);
    for entry in self.shared.task_registry.iter() {
      let (task_id, (token, task_labels)) = entry.pair();
      if !task_labels.is_disjoint(labels_to_cancel) {
        debug!(pool_name = %*self.shared.pool_name, %task_id, "Signaling cancellation for task due to label match.");
        token.cancel();
      }
    }
  }

  fn cancel_all_registered(&self) {
    let tokens: Vec<(u64, CancellationToken)> = self
      .shared
      .task_registry
      .iter()
      .map(|entry| (*entry.key(), entry.value().0.clone()))
      .collect();

    if tokens.is_empty() {
      info!(pool_name = %*self.shared.pool_name, "No queued or running tasks to cancel forcefully.");
      return;
    }
    for (task_id, token) in tokens {
      debug!(pool_name = %*self.shared.pool_name, %task_id, "Forcefully cancelling task during shutdown.");
      token.cancel();
    }
  }

  fn is_worker_thread(&self) -> bool {
    let current = thread::current().id();
    self.worker_thread_ids.contains(&current)
  }

  /// Closes the queue, wakes all waiters and joins every worker.
  ///
  /// No submissions are accepted once this has been called. Tasks already
  /// accepted are drained before the workers exit (see [`ShutdownMode`]).
  /// Concurrent callers block until the workers are joined. When called from
  /// one of the pool's own workers the pool is closed but not joined, since a
  /// worker cannot join itself.
  pub fn shutdown(&self, mode: ShutdownMode) {
    let pool_name = &*self.shared.pool_name;

    if self.shared.queue.close() {
      info!(%pool_name, "Initiating explicit pool shutdown (mode: {:?}).", mode);
    } else {
      info!(%pool_name, "Shutdown already in progress or initiated by another call/Drop.");
    }

    match mode {
      ShutdownMode::ForcefulCancel => {
        info!(%pool_name, "Forceful shutdown: Cancelling all queued and running tasks.");
        self.cancel_all_registered();
      }
      ShutdownMode::Graceful => {
        info!(%pool_name, "Graceful shutdown: Allowing queued and running tasks to complete.");
      }
    }

    if self.is_worker_thread() {
      warn!(%pool_name, "Shutdown called from a pool worker thread; closing without joining workers.");
      return;
    }

    let mut workers = self.workers.lock();
    if workers.is_empty() {
      trace!(%pool_name, "Workers already joined by an earlier shutdown call.");
      return;
    }

    info!(%pool_name, "Waiting for {} worker threads to join.", workers.len());
    for handle in workers.drain(..) {
      let thread_name = handle.thread().name().unwrap_or("unnamed").to_string();
      if handle.join().is_err() {
        error!(%pool_name, worker = %thread_name, "Worker thread panicked before it could be joined.");
      }
    }
    info!(%pool_name, "Pool shutdown process completed. All workers joined.");
  }
}

impl Drop for ThreadPoolManager {
  fn drop(&mut self) {
    if self.shared.queue.close() {
      // Workers are not joined here; they drain the queue and exit on their own.
      info!(
        pool_name = %*self.shared.pool_name,
        "ThreadPoolManager dropped. Initiating implicit shutdown (queue closed, workers draining)."
      );
    } else {
      trace!(
        pool_name = %*self.shared.pool_name,
        "Drop: Shutdown already in progress or completed. No new signals sent."
      );
    }
  }
}
