//! Submitting groups of tasks together and waiting on them under one policy.
//!
//! A group is either a tuple of [`TaskWrapper`]s (arity 1 to 12, each slot
//! with its own value type) or a `Vec<TaskWrapper<T>>`. Aggregates are always
//! positional: slot `i` holds the outcome of task `i`, whatever order the
//! tasks finished in.
//!
//! All waiting here blocks the calling thread. Do not call these functions
//! from inside a task running on the same pool unless the pool has spare
//! workers, or the batch can end up waiting on itself.

use crate::error::TaskResult;
use crate::handle::{Completion, ResultHandle};
use crate::manager::ThreadPoolManager;
use crate::task::{Runnable, TaskLabel};
use crate::wrapper::TaskWrapper;

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

/// How a batch decides that it is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
  /// Done once every task has reached a terminal state.
  AllOf,
  /// Done once any one task has reached a terminal state. The others keep
  /// running in the background and can still be read through their handles.
  OneOf,
}

/// A group of wrappers that can be submitted as one batch.
pub trait TaskSet {
  type Handles: HandleSet;

  /// Splits the set into type-erased runnables (in slot order) and typed handles.
  fn into_parts(self) -> (Vec<Box<dyn Runnable>>, Self::Handles);
}

/// The typed handles of a submitted [`TaskSet`].
pub trait HandleSet: Send + 'static {
  type Output;

  fn len(&self) -> usize;

  fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Type-erased views of every handle, in slot order.
  fn completions(&self) -> Vec<Box<dyn Completion>>;

  /// Blocks until every slot resolved and returns the positional aggregate.
  fn collect(&self) -> Self::Output;
}

impl<T: Clone + Send + 'static> TaskSet for Vec<TaskWrapper<T>> {
  type Handles = Vec<ResultHandle<T>>;

  fn into_parts(self) -> (Vec<Box<dyn Runnable>>, Self::Handles) {
    let handles = self.iter().map(TaskWrapper::future).collect();
    let runnables = self
      .into_iter()
      .map(|wrapper| Box::new(wrapper) as Box<dyn Runnable>)
      .collect();
    (runnables, handles)
  }
}

impl<T: Clone + Send + 'static> HandleSet for Vec<ResultHandle<T>> {
  type Output = Vec<TaskResult<T>>;

  fn len(&self) -> usize {
    Vec::len(self)
  }

  fn completions(&self) -> Vec<Box<dyn Completion>> {
    self
      .iter()
      .map(|handle| Box::new(handle.clone()) as Box<dyn Completion>)
      .collect()
  }

  fn collect(&self) -> Self::Output {
    self.iter().map(ResultHandle::wait).collect()
  }
}

macro_rules! impl_task_set_for_tuple {
  ($len:expr; $($T:ident : $idx:tt),+) => {
    impl<$($T),+> TaskSet for ($(TaskWrapper<$T>,)+)
    where
      $($T: Clone + Send + 'static),+
    {
      type Handles = ($(ResultHandle<$T>,)+);

      fn into_parts(self) -> (Vec<Box<dyn Runnable>>, Self::Handles) {
        let handles = ($(self.$idx.future(),)+);
        let runnables: Vec<Box<dyn Runnable>> = vec![$(Box::new(self.$idx) as Box<dyn Runnable>),+];
        (runnables, handles)
      }
    }

    impl<$($T),+> HandleSet for ($(ResultHandle<$T>,)+)
    where
      $($T: Clone + Send + 'static),+
    {
      type Output = ($(TaskResult<$T>,)+);

      fn len(&self) -> usize {
        $len
      }

      fn completions(&self) -> Vec<Box<dyn Completion>> {
        vec![$(Box::new(self.$idx.clone()) as Box<dyn Completion>),+]
      }

      fn collect(&self) -> Self::Output {
        ($(self.$idx.wait(),)+)
      }
    }
  };
}

impl_task_set_for_tuple!(1; A:0);
impl_task_set_for_tuple!(2; A:0, B:1);
impl_task_set_for_tuple!(3; A:0, B:1, C:2);
impl_task_set_for_tuple!(4; A:0, B:1, C:2, D:3);
impl_task_set_for_tuple!(5; A:0, B:1, C:2, D:3, E:4);
impl_task_set_for_tuple!(6; A:0, B:1, C:2, D:3, E:4, F:5);
impl_task_set_for_tuple!(7; A:0, B:1, C:2, D:3, E:4, F:5, G:6);
impl_task_set_for_tuple!(8; A:0, B:1, C:2, D:3, E:4, F:5, G:6, H:7);
impl_task_set_for_tuple!(9; A:0, B:1, C:2, D:3, E:4, F:5, G:6, H:7, I:8);
impl_task_set_for_tuple!(10; A:0, B:1, C:2, D:3, E:4, F:5, G:6, H:7, I:8, J:9);
impl_task_set_for_tuple!(11; A:0, B:1, C:2, D:3, E:4, F:5, G:6, H:7, I:8, J:9, K:10);
impl_task_set_for_tuple!(12; A:0, B:1, C:2, D:3, E:4, F:5, G:6, H:7, I:8, J:9, K:10, L:11);

/// Result of [`wait_any`]: which slot resolved first, plus every handle.
#[derive(Debug)]
pub struct AnyOf<H> {
  /// Index of the first task observed in a terminal state. `None` only for an empty set.
  pub first: Option<usize>,
  pub handles: H,
}

impl<T: Clone + Send + 'static> AnyOf<Vec<ResultHandle<T>>> {
  /// Outcome of the first resolved task.
  pub fn first_result(&self) -> Option<TaskResult<T>> {
    self.first.and_then(|index| self.handles.get(index)).and_then(ResultHandle::try_get)
  }
}

/// Submits every task of `set` without waiting. Returns the typed handles.
///
/// A task rejected at submission (pool shutting down) has its slot resolved
/// with `PoolError::PoolShuttingDown`; the remaining tasks are still offered.
pub fn submit_all<S: TaskSet>(pool: &ThreadPoolManager, set: S) -> S::Handles {
  submit_all_labeled(pool, HashSet::new(), set)
}

/// Like [`submit_all`], attaching `labels` to every task of the batch.
pub fn submit_all_labeled<S: TaskSet>(pool: &ThreadPoolManager, labels: HashSet<TaskLabel>, set: S) -> S::Handles {
  let (runnables, handles) = set.into_parts();
  let labels = Arc::new(labels);
  debug!(pool_name = %pool.name(), task_count = runnables.len(), "Submitting batch.");

  for (slot, runnable) in runnables.into_iter().enumerate() {
    if let Err(e) = pool.submit_runnable(labels.clone(), runnable) {
      debug!(pool_name = %pool.name(), slot, error = %e, "Batch slot rejected at submission.");
    }
  }
  handles
}

/// Submits every task and blocks until all of them reached a terminal state.
///
/// Failures never abort sibling tasks; each slot of the aggregate carries its
/// own `Ok` value or `PoolError`.
///
/// ```no_run
/// use thread_orchestra::{batch, TaskWrapper, ThreadPoolManager};
///
/// let pool = ThreadPoolManager::new(2, 8, "docs").unwrap();
/// let (count, name) = batch::wait_all(
///   &pool,
///   (TaskWrapper::new(|| 40 + 2), TaskWrapper::new(|| "done".to_string())),
/// );
/// assert_eq!(count, Ok(42));
/// assert_eq!(name, Ok("done".to_string()));
/// ```
pub fn wait_all<S: TaskSet>(pool: &ThreadPoolManager, set: S) -> <S::Handles as HandleSet>::Output {
  let handles = submit_all(pool, set);
  handles.collect()
}

/// Submits every task and blocks until the first one reaches a terminal state.
pub fn wait_any<S: TaskSet>(pool: &ThreadPoolManager, set: S) -> AnyOf<S::Handles> {
  let handles = submit_all(pool, set);
  let first = wait_for_policy(&handles.completions(), WaitPolicy::OneOf);
  AnyOf { first, handles }
}

/// Blocks according to `policy`. Returns the index of the first task seen in
/// a terminal state, or `None` for an empty slice.
pub(crate) fn wait_for_policy(completions: &[Box<dyn Completion>], policy: WaitPolicy) -> Option<usize> {
  if completions.is_empty() {
    return None;
  }

  let latch = Arc::new(FirstCompletion::default());
  for (index, completion) in completions.iter().enumerate() {
    let latch = latch.clone();
    completion.on_complete_boxed(Box::new(move || latch.offer(index)));
  }

  let first = latch.wait();
  trace!(first, ?policy, "First task of batch resolved.");

  if policy == WaitPolicy::AllOf {
    for completion in completions {
      completion.wait_ready();
    }
  }
  Some(first)
}

/// Records the first index offered and wakes whoever is waiting for it.
#[derive(Default)]
struct FirstCompletion {
  winner: Mutex<Option<usize>>,
  signalled: Condvar,
}

impl FirstCompletion {
  fn offer(&self, index: usize) {
    let mut winner = self.winner.lock();
    if winner.is_none() {
      *winner = Some(index);
      self.signalled.notify_all();
    }
  }

  fn wait(&self) -> usize {
    let mut winner = self.winner.lock();
    loop {
      if let Some(index) = *winner {
        return index;
      }
      self.signalled.wait(&mut winner);
    }
  }
}
