use std::thread;
use std::time::{Duration, Instant};
use thread_orchestra::{batch, AsyncExecutor, ShutdownMode, TaskWrapper, ThreadPoolManager};
use tracing::info;

fn sleeper(id: usize, millis: u64) -> TaskWrapper<usize> {
  TaskWrapper::new(move || {
    info!("Task {} sleeping {}ms", id, millis);
    thread::sleep(Duration::from_millis(millis));
    id
  })
}

fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::INFO)
    .with_target(false)
    .init();
  info!("--- Batch Waves Example ---");

  let manager = ThreadPoolManager::new(2, 2, "waves_pool").expect("Failed to start pool");

  // Four 500ms tasks on two threads finish in two waves.
  let started = Instant::now();
  let results = batch::wait_all(&manager, (sleeper(0, 500), sleeper(1, 500), sleeper(2, 500), sleeper(3, 500)));
  info!("wait_all results {:?} after {:?}", results, started.elapsed());

  // Mixed result types in one batch.
  let (answer, greeting) = batch::wait_all(
    &manager,
    (
      TaskWrapper::new(|| 6 * 7),
      TaskWrapper::with_args(|name: &'static str| format!("hello, {name}"), "world"),
    ),
  );
  info!("Heterogeneous results: {:?}, {:?}", answer, greeting);

  let any = batch::wait_any(&manager, vec![sleeper(10, 800), sleeper(11, 100)]);
  info!("wait_any: slot {:?} finished first with {:?}", any.first, any.first_result());

  let mut executor = AsyncExecutor::new(manager.clone());
  let reports = executor
    .all_of("prepare", (sleeper(20, 100), sleeper(21, 150)))
    .one_of("race", vec![sleeper(30, 300), sleeper(31, 50)])
    .one("finish", sleeper(40, 10))
    .execute_all();
  for report in &reports {
    info!("Batch report: {:?}", report);
  }

  drop(executor);
  manager.shutdown(ShutdownMode::Graceful);
  info!("--- Batch Waves Example End ---");
}
