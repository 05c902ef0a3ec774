//! A fixed-size thread pool with a bounded FIFO queue, cancellable and
//! awaitable task handles, and batched wait-for-all / wait-for-one
//! composition of heterogeneous tasks.
//!
//! Cancellation is cooperative: a cancelled task that has not been dequeued
//! yet is skipped and resolves as `PoolError::TaskCancelled`; a task that is
//! already running is never interrupted and only stops early if it checks
//! [`current_task_cancelled`] itself.

pub mod batch;
mod config;
mod error;
mod executor;
mod handle;
mod manager;
mod notifier;
mod task;
mod task_queue;
mod wrapper;

pub use batch::{AnyOf, HandleSet, TaskSet, WaitPolicy};
pub use config::{PoolConfig, DEFAULT_QUEUE_CAPACITY};
pub use error::{PoolError, TaskResult};
pub use executor::{AsyncExecutor, BatchReport};
pub use handle::{Completion, ResultHandle, TaskHandle};
pub use manager::{PoolStats, ShutdownMode, ThreadPoolManager};
pub use notifier::{TaskCompletionInfo, TaskCompletionStatus};
pub use task::{current_task_cancelled, current_task_token, Runnable, TaskLabel};
pub use wrapper::TaskWrapper;

pub use tokio_util::sync::CancellationToken;
