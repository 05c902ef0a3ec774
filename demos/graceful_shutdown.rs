use std::collections::HashSet;
use std::thread;
use std::time::Duration;
use thread_orchestra::{ShutdownMode, TaskHandle, ThreadPoolManager};
use tracing::info;

fn work_task_fn(id: usize, duration_ms: u64) -> String {
  info!("Task {} starting (will run for {}ms)", id, duration_ms);
  thread::sleep(Duration::from_millis(duration_ms));
  let result = format!("Task {} finished after {}ms", id, duration_ms);
  info!("{}", result);
  result
}

fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Graceful Shutdown Example ---");

  let manager = ThreadPoolManager::new(2, 10, "graceful_shutdown_pool").expect("Failed to start pool");
  manager.add_completion_handler(|info| {
    info!("Completion: task {} in '{}' -> {:?}", info.task_id, info.pool_name, info.status);
  });

  let mut handles: Vec<TaskHandle<String>> = Vec::new();

  // Tasks 0 and 1 start, tasks 2 to 4 are queued.
  for i in 0..5 {
    let labels: HashSet<String> = [format!("wave-{}", i / 2)].into_iter().collect();
    match manager.submit_with_labels(labels, move || work_task_fn(i, 500)) {
      Ok(handle) => {
        info!("Submitted task {} (handle id {})", i, handle.id());
        handles.push(handle);
      }
      Err(e) => tracing::error!("Failed to submit task {}: {:?}", i, e),
    }
  }

  info!(
    "All 5 tasks submitted. Queue size: {}, Active: {}",
    manager.queued_task_count(),
    manager.active_task_count()
  );
  thread::sleep(Duration::from_millis(100));

  let manager_for_shutdown = manager.clone();
  let shutdown_jh = thread::spawn(move || {
    info!("Calling pool.shutdown(Graceful)...");
    manager_for_shutdown.shutdown(ShutdownMode::Graceful);
    info!("Pool shutdown call completed.");
  });

  thread::sleep(Duration::from_millis(50));
  info!("Attempting to submit task after shutdown initiated...");
  match manager.submit(|| work_task_fn(99, 100)) {
    Ok(_) => tracing::error!("LATE SUBMISSION SUCCEEDED (UNEXPECTED!)"),
    Err(e) => info!("Late submission correctly failed: {:?}", e),
  }

  // Graceful shutdown drains the queue, so every accepted task completes.
  for handle in handles {
    let task_id = handle.id();
    match handle.wait() {
      Ok(result) => info!("Task {} result: {}", task_id, result),
      Err(e) => info!("Task {} error: {:?}", task_id, e),
    }
  }

  shutdown_jh.join().expect("Shutdown thread panicked");
  info!("Final stats: {:?}", manager.stats());
  info!("--- Graceful Shutdown Example End ---");
}
