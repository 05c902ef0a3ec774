use std::thread;
use std::time::Duration;
use thread_orchestra::{current_task_cancelled, PoolError, ShutdownMode, ThreadPoolManager};
use tracing::{info, warn};

// Works in 100ms steps and gives up early once its handle is cancelled.
fn cooperative_task(id_str: &str, steps: u32) -> Result<String, String> {
  info!("Task ({}) starting, {} steps of work", id_str, steps);
  for step in 0..steps {
    if current_task_cancelled() {
      let msg = format!("Task ({}) noticed cancellation at step {}", id_str, step);
      warn!("{}", msg);
      return Err(msg);
    }
    thread::sleep(Duration::from_millis(100));
  }
  let result = format!("Task ({}) finished normally.", id_str);
  info!("{}", result);
  Ok(result)
}

fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Individual Cancellation Example ---");

  // One worker, so the third task waits in the queue.
  let manager = ThreadPoolManager::new(1, 10, "cancellation_pool").expect("Failed to start pool");

  let running = manager
    .submit(|| cooperative_task("running", 30))
    .expect("Failed to submit running task");
  let queued = manager
    .submit(|| cooperative_task("queued", 3))
    .expect("Failed to submit queued task");
  let survivor = manager
    .submit(|| cooperative_task("survivor", 3))
    .expect("Failed to submit surviving task");

  thread::sleep(Duration::from_millis(350));

  info!("Cancelling queued task {} before it starts.", queued.id());
  queued.cancel();
  info!("Cancelling running task {}; it has to notice on its own.", running.id());
  running.cancel();

  match queued.wait() {
    Err(PoolError::TaskCancelled) => info!("Task {} was skipped: TaskCancelled.", queued.id()),
    other => warn!("Task {} unexpected outcome: {:?}", queued.id(), other),
  }
  match running.wait() {
    Ok(Err(msg)) => info!("Task {} stopped cooperatively: {}", running.id(), msg),
    other => warn!("Task {} outcome: {:?}", running.id(), other),
  }
  match survivor.wait() {
    Ok(Ok(msg)) => info!("Task {} completed: {}", survivor.id(), msg),
    other => warn!("Task {} outcome: {:?}", survivor.id(), other),
  }

  info!("Shutting down pool.");
  manager.shutdown(ShutdownMode::Graceful);
  info!("Pool shutdown complete. Stats: {:?}", manager.stats());
  info!("--- Individual Cancellation Example End ---");
}
