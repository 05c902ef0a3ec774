use crate::error::PoolError;
use crate::manager::ThreadPoolManager;

use std::sync::Arc;

/// Queue capacity used when none (or zero) is configured.
pub const DEFAULT_QUEUE_CAPACITY: usize = 500;

const DEFAULT_POOL_NAME: &str = "thread_orchestra";

/// Configuration for a [`ThreadPoolManager`].
///
/// Zero values mean "use the default": hardware concurrency for
/// `thread_count` and [`DEFAULT_QUEUE_CAPACITY`] for `queue_capacity`.
#[derive(Debug, Clone, Default)]
pub struct PoolConfig {
  thread_count: usize,
  queue_capacity: usize,
  name: Option<String>,
  stack_size: Option<usize>,
}

impl PoolConfig {
  pub fn new() -> Self {
    Self::default()
  }

  /// Number of worker threads. `0` selects the number of available CPUs.
  pub fn thread_count(mut self, count: usize) -> Self {
    self.thread_count = count;
    self
  }

  /// Maximum number of queued, not yet started tasks. `0` selects the default of 500.
  pub fn queue_capacity(mut self, capacity: usize) -> Self {
    self.queue_capacity = capacity;
    self
  }

  /// Pool name, used in log fields and as the worker thread name prefix.
  ///
  /// The name must not contain null bytes (`\0`).
  pub fn name<S: Into<String>>(mut self, name: S) -> Self {
    self.name = Some(name.into());
    self
  }

  /// Stack size in bytes for worker threads. The platform may round it up.
  pub fn stack_size(mut self, size: usize) -> Self {
    self.stack_size = Some(size);
    self
  }

  pub fn resolved_thread_count(&self) -> usize {
    if self.thread_count == 0 {
      num_cpus::get().max(1)
    } else {
      self.thread_count
    }
  }

  pub fn resolved_queue_capacity(&self) -> usize {
    if self.queue_capacity == 0 {
      DEFAULT_QUEUE_CAPACITY
    } else {
      self.queue_capacity
    }
  }

  pub fn resolved_name(&self) -> &str {
    self.name.as_deref().unwrap_or(DEFAULT_POOL_NAME)
  }

  pub(crate) fn stack_size_bytes(&self) -> Option<usize> {
    self.stack_size
  }

  /// Spawns the configured pool.
  pub fn build(self) -> Result<Arc<ThreadPoolManager>, PoolError> {
    ThreadPoolManager::with_config(self)
  }
}
