use thread_orchestra::{
  current_task_cancelled, PoolConfig, PoolError, ShutdownMode, TaskCompletionStatus, TaskWrapper, ThreadPoolManager,
  DEFAULT_QUEUE_CAPACITY,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

// Helper to initialize tracing for tests (call once per test run, not per test function)
fn setup_tracing_for_test() {
  use std::sync::Once;
  use tracing_subscriber::{fmt, EnvFilter};
  static TRACING_INIT: Once = Once::new();

  TRACING_INIT.call_once(|| {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,thread_orchestra=trace"));

    fmt::Subscriber::builder()
      .with_env_filter(filter)
      .with_test_writer()
      .try_init()
      .ok();
  });
}

// Occupies one worker until the returned sender is used (or dropped).
fn submit_blocker(manager: &ThreadPoolManager) -> (thread_orchestra::TaskHandle<()>, mpsc::Sender<()>) {
  let (release_tx, release_rx) = mpsc::channel::<()>();
  let (started_tx, started_rx) = mpsc::channel::<()>();
  let handle = manager
    .submit(move || {
      started_tx.send(()).unwrap();
      let _ = release_rx.recv();
    })
    .unwrap();
  started_rx
    .recv_timeout(Duration::from_secs(5))
    .expect("blocker task should start");
  (handle, release_tx)
}

#[test]
fn test_submit_and_wait_basic_task() {
  setup_tracing_for_test();
  let manager = ThreadPoolManager::new(2, 5, "test_pool_basic_submit").unwrap();

  let handle = manager
    .submit(|| {
      thread::sleep(Duration::from_millis(20));
      "task1_done".to_string()
    })
    .unwrap();

  assert_eq!(handle.wait(), Ok("task1_done".to_string()));
  // Reads are idempotent.
  assert_eq!(handle.wait(), Ok("task1_done".to_string()));
  assert_eq!(handle.result().try_get(), Some(Ok("task1_done".to_string())));

  manager.shutdown(ShutdownMode::Graceful);
}

#[test]
fn test_task_panics_are_handled() {
  setup_tracing_for_test();
  let manager = ThreadPoolManager::new(1, 5, "test_pool_panic_handling").unwrap();

  let handle_panic = manager.submit::<String, _>(|| panic!("Task intentionally panicked!")).unwrap();
  match handle_panic.wait() {
    Err(e @ PoolError::TaskPanicked(_)) => {
      assert!(e.is_task_error());
      assert_eq!(e, PoolError::TaskPanicked("Task intentionally panicked!".to_string()));
    }
    other => panic!("Expected TaskPanicked error, got {:?}", other),
  }

  // The single worker survived and keeps serving tasks.
  let handle_normal = manager.submit(|| "task2_done".to_string()).unwrap();
  assert_eq!(handle_normal.wait(), Ok("task2_done".to_string()));

  manager.shutdown(ShutdownMode::Graceful);
}

#[test]
fn test_fallible_task_error_is_attached_to_handle() {
  setup_tracing_for_test();
  let manager = ThreadPoolManager::new(1, 5, "test_pool_fallible").unwrap();

  let wrapper = TaskWrapper::<u32>::fallible(|| "not a number".parse::<u32>());
  let handle = manager.submit_wrapper(HashSet::new(), wrapper).unwrap();

  match handle.wait() {
    Err(PoolError::TaskFailed(message)) => assert!(message.contains("invalid digit")),
    other => panic!("Expected TaskFailed, got {:?}", other),
  }

  manager.shutdown(ShutdownMode::Graceful);
}

#[test]
fn test_cancellation_before_start_skips_execution() {
  setup_tracing_for_test();
  let manager = ThreadPoolManager::new(1, 5, "test_pool_cancel_before_start").unwrap();
  let (blocker, release) = submit_blocker(&manager);

  let invocations = Arc::new(AtomicUsize::new(0));
  let counter = invocations.clone();
  let handle = manager
    .submit(move || {
      counter.fetch_add(1, Ordering::SeqCst);
      "should_not_run"
    })
    .unwrap();

  let (result, token) = handle.into_parts();
  token.cancel();
  release.send(()).unwrap();

  assert_eq!(result.wait(), Err(PoolError::TaskCancelled));
  assert_eq!(blocker.wait(), Ok(()));
  assert_eq!(invocations.load(Ordering::SeqCst), 0, "cancelled task must never run");

  manager.shutdown(ShutdownMode::Graceful);
  assert_eq!(manager.stats().cancelled, 1);
}

#[test]
fn test_cancel_after_start_has_no_effect() {
  setup_tracing_for_test();
  let manager = ThreadPoolManager::new(1, 5, "test_pool_cancel_after_start").unwrap();

  let (started_tx, started_rx) = mpsc::channel::<()>();
  let handle = manager
    .submit(move || {
      started_tx.send(()).unwrap();
      thread::sleep(Duration::from_millis(100));
      "finished_anyway"
    })
    .unwrap();

  started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
  handle.cancel();
  assert!(handle.is_cancellation_requested());

  assert_eq!(handle.wait(), Ok("finished_anyway"));
  manager.shutdown(ShutdownMode::Graceful);
}

#[test]
fn test_running_task_can_observe_cancellation_cooperatively() {
  setup_tracing_for_test();
  let manager = ThreadPoolManager::new(1, 5, "test_pool_cooperative_cancel").unwrap();

  let (started_tx, started_rx) = mpsc::channel::<()>();
  let handle = manager
    .submit(move || {
      started_tx.send(()).unwrap();
      let deadline = Instant::now() + Duration::from_secs(5);
      while Instant::now() < deadline {
        if current_task_cancelled() {
          return "stopped_early";
        }
        thread::sleep(Duration::from_millis(5));
      }
      "ran_to_completion"
    })
    .unwrap();

  started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
  handle.cancel();

  assert_eq!(handle.wait(), Ok("stopped_early"));
  assert!(!current_task_cancelled(), "outside a pool task nothing is cancelled");
  manager.shutdown(ShutdownMode::Graceful);
}

#[test]
fn test_tasks_start_in_submission_order() {
  setup_tracing_for_test();
  let manager = ThreadPoolManager::new(1, 16, "test_pool_fifo").unwrap();
  let (_blocker, release) = submit_blocker(&manager);

  let start_order = Arc::new(Mutex::new(Vec::new()));
  let handles: Vec<_> = (0..10)
    .map(|i| {
      let start_order = start_order.clone();
      manager
        .submit(move || {
          start_order.lock().unwrap().push(i);
          i
        })
        .unwrap()
    })
    .collect();

  release.send(()).unwrap();
  for (i, handle) in handles.iter().enumerate() {
    assert_eq!(handle.wait(), Ok(i));
  }
  assert_eq!(*start_order.lock().unwrap(), (0..10).collect::<Vec<_>>());

  manager.shutdown(ShutdownMode::Graceful);
}

#[test]
fn test_submit_blocks_while_queue_is_full() {
  setup_tracing_for_test();
  let manager = ThreadPoolManager::new(1, 2, "test_pool_backpressure").unwrap();
  let (_blocker, release) = submit_blocker(&manager);

  let queued: Vec<_> = (0..2).map(|i| manager.submit(move || i).unwrap()).collect();
  assert_eq!(manager.queued_task_count(), 2);

  let submitted = Arc::new(AtomicBool::new(false));
  let producer = {
    let manager = manager.clone();
    let submitted = submitted.clone();
    thread::spawn(move || {
      let handle = manager.submit(|| 99).unwrap();
      submitted.store(true, Ordering::SeqCst);
      handle.wait()
    })
  };

  thread::sleep(Duration::from_millis(100));
  assert!(!submitted.load(Ordering::SeqCst), "producer must block on a full queue");
  assert_eq!(manager.queued_task_count(), 2);

  release.send(()).unwrap();
  assert_eq!(producer.join().unwrap(), Ok(99));
  assert!(submitted.load(Ordering::SeqCst));
  for (i, handle) in queued.iter().enumerate() {
    assert_eq!(handle.wait(), Ok(i));
  }

  manager.shutdown(ShutdownMode::Graceful);
  let stats = manager.stats();
  assert!(stats.peak_queued <= 2, "queue exceeded its capacity: {:?}", stats);
  assert_eq!(stats.completed, 4);
}

#[test]
fn test_graceful_shutdown_drains_queue() {
  setup_tracing_for_test();
  let manager = ThreadPoolManager::new(2, 10, "test_pool_shutdown_drain").unwrap();

  let completed = Arc::new(AtomicUsize::new(0));
  let handles: Vec<_> = (0..8)
    .map(|i| {
      let completed = completed.clone();
      manager
        .submit(move || {
          thread::sleep(Duration::from_millis(20));
          completed.fetch_add(1, Ordering::SeqCst);
          i * 10
        })
        .unwrap()
    })
    .collect();

  manager.shutdown(ShutdownMode::Graceful);

  assert_eq!(completed.load(Ordering::SeqCst), 8, "every accepted task runs before shutdown returns");
  for (i, handle) in handles.iter().enumerate() {
    assert!(handle.is_ready());
    assert_eq!(handle.wait(), Ok(i * 10));
  }

  assert!(manager.is_shutting_down());
  assert_eq!(manager.submit(|| 1).unwrap_err(), PoolError::PoolShuttingDown);

  // A rejected wrapper still resolves, so nothing waits on it forever.
  let wrapper = TaskWrapper::new(|| 5);
  let orphan = wrapper.future();
  assert_eq!(
    manager.submit_wrapper(HashSet::new(), wrapper).unwrap_err(),
    PoolError::PoolShuttingDown
  );
  assert_eq!(orphan.wait(), Err(PoolError::PoolShuttingDown));
  assert!(!PoolError::PoolShuttingDown.is_task_error());

  // Second shutdown is harmless.
  manager.shutdown(ShutdownMode::Graceful);
}

#[test]
fn test_shutdown_releases_blocked_producer() {
  setup_tracing_for_test();
  let manager = ThreadPoolManager::new(1, 1, "test_pool_shutdown_blocked_producer").unwrap();
  let (_blocker, release) = submit_blocker(&manager);
  let queued = manager.submit(|| "queued").unwrap();

  let producer = {
    let manager = manager.clone();
    thread::spawn(move || manager.submit(|| "never_queued").map(|_| ()))
  };
  thread::sleep(Duration::from_millis(50));

  let closer = {
    let manager = manager.clone();
    thread::spawn(move || manager.shutdown(ShutdownMode::Graceful))
  };

  assert_eq!(producer.join().unwrap(), Err(PoolError::PoolShuttingDown));

  release.send(()).unwrap();
  closer.join().unwrap();
  assert_eq!(queued.wait(), Ok("queued"));
}

#[test]
fn test_forceful_shutdown_cancels_queued_tasks() {
  setup_tracing_for_test();
  let manager = ThreadPoolManager::new(1, 5, "test_pool_shutdown_forceful").unwrap();

  let (started_tx, started_rx) = mpsc::channel::<()>();
  let active = manager
    .submit(move || {
      started_tx.send(()).unwrap();
      while !current_task_cancelled() {
        thread::sleep(Duration::from_millis(5));
      }
      "active_noticed_cancel"
    })
    .unwrap();
  started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

  let ran = Arc::new(AtomicUsize::new(0));
  let queued: Vec<_> = (0..3)
    .map(|_| {
      let ran = ran.clone();
      manager.submit(move || ran.fetch_add(1, Ordering::SeqCst)).unwrap()
    })
    .collect();

  manager.shutdown(ShutdownMode::ForcefulCancel);

  assert_eq!(active.wait(), Ok("active_noticed_cancel"));
  for handle in &queued {
    assert_eq!(handle.wait(), Err(PoolError::TaskCancelled));
  }
  assert_eq!(ran.load(Ordering::SeqCst), 0);
  assert_eq!(manager.stats().cancelled, 3);
}

#[test]
fn test_cancel_tasks_by_label() {
  setup_tracing_for_test();
  let manager = ThreadPoolManager::new(1, 10, "test_pool_label_cancel").unwrap();
  let (_blocker, release) = submit_blocker(&manager);

  let handle_a = manager
    .submit_with_labels(HashSet::from(["reports".to_string(), "nightly".to_string()]), || "a")
    .unwrap();
  let handle_b = manager
    .submit_with_labels(HashSet::from(["email".to_string()]), || "b")
    .unwrap();
  assert_eq!(handle_a.labels(), HashSet::from(["reports".to_string(), "nightly".to_string()]));

  manager.cancel_tasks_by_label(&"nightly".to_string());
  release.send(()).unwrap();

  assert_eq!(handle_a.wait(), Err(PoolError::TaskCancelled));
  assert_eq!(handle_b.wait(), Ok("b"));
  manager.shutdown(ShutdownMode::Graceful);
}

#[test]
fn test_defaults_for_zero_configuration() {
  setup_tracing_for_test();
  let manager = ThreadPoolManager::new(0, 0, "test_pool_defaults").unwrap();
  assert_eq!(manager.thread_count(), num_cpus_or_one());
  assert_eq!(manager.queue_capacity(), DEFAULT_QUEUE_CAPACITY);
  assert_eq!(manager.name(), "test_pool_defaults");
  manager.shutdown(ShutdownMode::Graceful);

  let configured = PoolConfig::new().thread_count(3).queue_capacity(4).name("configured").build().unwrap();
  assert_eq!(configured.thread_count(), 3);
  assert_eq!(configured.queue_capacity(), 4);
  let worker_name = configured
    .submit(|| thread::current().name().map(str::to_string))
    .unwrap()
    .wait()
    .unwrap()
    .unwrap();
  assert!(worker_name.starts_with("configured-worker-"), "got {}", worker_name);
  configured.shutdown(ShutdownMode::Graceful);
}

fn num_cpus_or_one() -> usize {
  num_cpus::get().max(1)
}

#[test]
fn test_dropping_pool_still_drains_accepted_tasks() {
  setup_tracing_for_test();
  let manager = ThreadPoolManager::new(2, 10, "test_pool_drop").unwrap();
  let handles: Vec<_> = (0..6)
    .map(|i| {
      manager
        .submit(move || {
          thread::sleep(Duration::from_millis(10));
          i
        })
        .unwrap()
    })
    .collect();

  drop(manager);

  for (i, handle) in handles.iter().enumerate() {
    assert_eq!(handle.wait_timeout(Duration::from_secs(5)), Some(Ok(i)));
  }
}

#[test]
fn test_shutdown_from_worker_thread_does_not_deadlock() {
  setup_tracing_for_test();
  let manager = ThreadPoolManager::new(2, 5, "test_pool_shutdown_from_worker").unwrap();

  let inner = manager.clone();
  let handle = manager
    .submit(move || {
      inner.shutdown(ShutdownMode::Graceful);
      inner.is_shutting_down()
    })
    .unwrap();

  assert_eq!(handle.wait_timeout(Duration::from_secs(5)), Some(Ok(true)));
  manager.shutdown(ShutdownMode::Graceful);
  assert_eq!(manager.submit(|| ()).unwrap_err(), PoolError::PoolShuttingDown);
}

#[test]
fn test_stats_count_each_outcome() {
  setup_tracing_for_test();
  let manager = ThreadPoolManager::new(2, 10, "test_pool_stats").unwrap();

  let ok = manager.submit(|| 1).unwrap();
  let failed = manager
    .submit_wrapper(HashSet::new(), TaskWrapper::<i32>::fallible(|| Err("nope")))
    .unwrap();
  let panicked = manager.submit::<i32, _>(|| panic!("stats panic")).unwrap();

  assert_eq!(ok.wait(), Ok(1));
  assert!(failed.wait().is_err());
  assert!(panicked.wait().is_err());

  manager.shutdown(ShutdownMode::Graceful);
  let stats = manager.stats();
  assert_eq!(stats.completed, 1);
  assert_eq!(stats.failed, 1);
  assert_eq!(stats.panicked, 1);
  assert_eq!(stats.finished(), 3);
  assert_eq!(stats.running, 0);
  assert_eq!(stats.queued, 0);
}

#[test]
fn test_panicking_listener_on_cancelled_task_keeps_worker_alive() {
  setup_tracing_for_test();
  let manager = ThreadPoolManager::new(1, 5, "test_pool_listener_panic_cancelled").unwrap();
  let (blocker, release) = submit_blocker(&manager);

  let victim = manager.submit(|| "never").unwrap();
  victim.result().on_complete(|| panic!("listener on cancelled task"));
  victim.cancel();
  let after = manager.submit(|| "after").unwrap();
  release.send(()).unwrap();

  assert_eq!(blocker.wait(), Ok(()));
  assert_eq!(victim.wait(), Err(PoolError::TaskCancelled));
  assert_eq!(
    after.wait_timeout(Duration::from_secs(5)),
    Some(Ok("after")),
    "the only worker must survive a panicking listener"
  );

  manager.shutdown(ShutdownMode::Graceful);
  let stats = manager.stats();
  assert_eq!(stats.cancelled, 1);
  assert_eq!(stats.completed, 2);
}

#[test]
fn test_panicking_listener_does_not_change_task_outcome() {
  setup_tracing_for_test();
  let manager = ThreadPoolManager::new(1, 5, "test_pool_listener_panic_success").unwrap();
  let statuses = Arc::new(Mutex::new(Vec::new()));
  let statuses_clone = statuses.clone();
  manager.add_completion_handler(move |info| statuses_clone.lock().unwrap().push((info.task_id, info.status)));

  let (blocker, release) = submit_blocker(&manager);
  let task = manager.submit(|| 11).unwrap();
  let later_listener_ran = Arc::new(AtomicBool::new(false));
  task.result().on_complete(|| panic!("listener on successful task"));
  let flag = later_listener_ran.clone();
  task.result().on_complete(move || flag.store(true, Ordering::SeqCst));
  release.send(()).unwrap();

  assert_eq!(blocker.wait(), Ok(()));
  assert_eq!(task.wait(), Ok(11));
  manager.shutdown(ShutdownMode::Graceful);

  assert!(later_listener_ran.load(Ordering::SeqCst), "listeners after a panicking one still run");
  let stats = manager.stats();
  assert_eq!(stats.completed, 2);
  assert_eq!(stats.panicked, 0);
  let statuses = statuses.lock().unwrap();
  assert!(statuses.contains(&(task.id(), TaskCompletionStatus::Success)));
}

#[test]
fn test_task_ids_are_unique_and_increasing() {
  setup_tracing_for_test();
  let manager = ThreadPoolManager::new(1, 10, "test_pool_ids").unwrap();
  let first = manager.submit(|| ()).unwrap();
  let second = manager.submit(|| ()).unwrap();
  assert!(second.id() > first.id());
  manager.shutdown(ShutdownMode::Graceful);
}

#[tokio::test]
async fn test_await_result_from_async_context() {
  setup_tracing_for_test();
  let manager = ThreadPoolManager::new(2, 5, "test_pool_async_await").unwrap();

  let handle = manager
    .submit(|| {
      thread::sleep(Duration::from_millis(50));
      vec![1u8, 2, 3]
    })
    .unwrap();

  let result = handle.await_result().await;
  assert_eq!(result, Ok(vec![1, 2, 3]));

  let shared = handle.result();
  assert_eq!(shared.await_result().await, Ok(vec![1, 2, 3]));

  tokio::task::spawn_blocking(move || manager.shutdown(ShutdownMode::Graceful))
    .await
    .unwrap();
}
