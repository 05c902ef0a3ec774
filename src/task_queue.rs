use std::collections::VecDeque;
use std::fmt;

use parking_lot::{Condvar, Mutex};

struct QueueState<T> {
  items: VecDeque<T>,
  closed: bool,
  peak_len: usize,
}

/// A bounded, blocking, multi-producer, multi-consumer FIFO queue.
///
/// One mutex guards the items; `work_available` wakes consumers and
/// `slot_freed` wakes producers blocked on a full queue. Once closed, pushes
/// fail but pops keep returning items until the queue is empty.
pub(crate) struct TaskQueue<T> {
  state: Mutex<QueueState<T>>,
  work_available: Condvar,
  slot_freed: Condvar,
  capacity: usize,
}

impl<T> fmt::Debug for TaskQueue<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.state.lock();
    f.debug_struct("TaskQueue")
      .field("len", &state.items.len())
      .field("capacity", &self.capacity)
      .field("closed", &state.closed)
      .finish()
  }
}

impl<T> TaskQueue<T> {
  /// Creates a new `TaskQueue` holding at most `capacity` items (minimum 1).
  pub(crate) fn new(capacity: usize) -> Self {
    let capacity = capacity.max(1);
    Self {
      state: Mutex::new(QueueState {
        items: VecDeque::with_capacity(capacity),
        closed: false,
        peak_len: 0,
      }),
      work_available: Condvar::new(),
      slot_freed: Condvar::new(),
      capacity,
    }
  }

  /// Appends `item`, blocking while the queue is full.
  ///
  /// Returns the item back if the queue is closed, either on entry or while
  /// this call was waiting for a free slot.
  pub(crate) fn push(&self, item: T) -> Result<(), T> {
    let mut state = self.state.lock();
    loop {
      if state.closed {
        return Err(item);
      }
      if state.items.len() < self.capacity {
        break;
      }
      self.slot_freed.wait(&mut state);
    }

    state.items.push_back(item);
    state.peak_len = state.peak_len.max(state.items.len());
    drop(state);

    self.work_available.notify_one();
    Ok(())
  }

  /// Removes the oldest item, blocking while the queue is empty and open.
  ///
  /// Returns `None` only once the queue is closed and fully drained.
  pub(crate) fn pop(&self) -> Option<T> {
    let mut state = self.state.lock();
    loop {
      if let Some(item) = state.items.pop_front() {
        drop(state);
        self.slot_freed.notify_one();
        return Some(item);
      }
      if state.closed {
        return None;
      }
      self.work_available.wait(&mut state);
    }
  }

  /// Closes the queue and wakes every waiter. Returns `false` if it was already closed.
  pub(crate) fn close(&self) -> bool {
    let was_open = {
      let mut state = self.state.lock();
      !std::mem::replace(&mut state.closed, true)
    };
    self.work_available.notify_all();
    self.slot_freed.notify_all();
    was_open
  }

  pub(crate) fn is_closed(&self) -> bool {
    self.state.lock().closed
  }

  pub(crate) fn len(&self) -> usize {
    self.state.lock().items.len()
  }

  pub(crate) fn capacity(&self) -> usize {
    self.capacity
  }

  /// Largest length the queue has reached since creation.
  pub(crate) fn peak_len(&self) -> usize {
    self.state.lock().peak_len
  }
}
