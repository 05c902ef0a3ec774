use std::thread;
use std::time::Duration;
use thread_orchestra::{PoolConfig, ShutdownMode, TaskHandle};
use tracing::info;

fn my_task_fn(id: usize, delay_ms: u64) -> String {
  info!("Task {} starting, will sleep for {}ms", id, delay_ms);
  thread::sleep(Duration::from_millis(delay_ms));
  let result = format!("Task {} finished successfully after {}ms", id, delay_ms);
  info!("{}", result);
  result
}

fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false) // Disable module paths for cleaner example output
    .init();

  info!("--- Basic Usage Example ---");

  let manager = PoolConfig::new()
    .thread_count(2)
    .queue_capacity(10)
    .name("basic_pool")
    .build()
    .expect("Failed to start pool");

  let mut handles: Vec<TaskHandle<String>> = Vec::new();

  for i in 0..5 {
    // Alternate sleep times for variety
    let sleep_duration: u64 = 200 + (i as u64 % 3 * 100);
    match manager.submit(move || my_task_fn(i, sleep_duration)) {
      Ok(handle) => {
        info!("Submitted task {} with handle id {}", i, handle.id());
        handles.push(handle);
      }
      Err(e) => {
        tracing::error!("Failed to submit task {}: {:?}", i, e);
      }
    }
  }

  info!("All tasks submitted. Waiting on results...");

  let last = handles.pop();
  for handle in handles {
    let task_id = handle.id();
    match handle.wait() {
      Ok(result) => info!("Result for task {}: {}", task_id, result),
      Err(e) => info!("Error for task {}: {:?}", task_id, e),
    }
  }

  // Handles can also be awaited from async code.
  if let Some(handle) = last {
    let task_id = handle.id();
    match futures::executor::block_on(handle.await_result()) {
      Ok(result) => info!("Awaited result for task {}: {}", task_id, result),
      Err(e) => info!("Awaited error for task {}: {:?}", task_id, e),
    }
  }

  info!("All task results processed. Shutting down pool.");
  manager.shutdown(ShutdownMode::Graceful);
  info!("Pool shutdown complete. Stats: {:?}", manager.stats());
  info!("--- Basic Usage Example End ---");
}
