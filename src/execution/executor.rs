//! Executors: the I/O pool and the offload worker pool.
//!
//! Both are dedicated multi-thread tokio runtimes with named threads, so a
//! computation can tell which pool it is running on. Dropping an executor
//! stops its runtime in the background; it never blocks the dropping thread.

use std::cell::Cell;
use std::fmt;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::config::{ExecutorConfig, IoConfig};
use crate::observability::metrics;

/// Error type for rejected submissions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RejectedExecution {
    /// Every admission slot is taken.
    #[error("executor {executor} is saturated ({capacity} computations in flight)")]
    Saturated { executor: String, capacity: usize },
    /// The executor has been shut down.
    #[error("executor {executor} is shut down")]
    Shutdown { executor: String },
}

/// Accepts computations for execution off the submitting thread.
pub trait Executor: Send + Sync + fmt::Debug {
    /// Name used in logs and metrics.
    fn name(&self) -> &str;

    /// Submit a computation. Never blocks; fails when the executor cannot
    /// accept more work.
    fn submit(&self, task: BoxFuture<'static, ()>) -> Result<(), RejectedExecution>;
}

thread_local! {
    static IO_THREAD: Cell<bool> = const { Cell::new(false) };
}

/// Name of the calling thread, if it has one.
pub fn current_thread_name() -> Option<String> {
    std::thread::current().name().map(str::to_owned)
}

/// Returns `true` if the calling thread belongs to any [`IoExecutor`].
pub fn on_io_thread() -> bool {
    IO_THREAD.with(Cell::get)
}

fn build_runtime(prefix: &str, threads: usize, io_threads: bool) -> io::Result<Runtime> {
    let counter = Arc::new(AtomicUsize::new(0));
    let prefix = prefix.to_owned();
    let mut builder = Builder::new_multi_thread();
    builder
        .worker_threads(threads.max(1))
        .thread_name_fn(move || {
            let n = counter.fetch_add(1, Ordering::Relaxed);
            format!("{prefix}-{n}")
        })
        .enable_all();
    if io_threads {
        builder.on_thread_start(|| IO_THREAD.with(|flag| flag.set(true)));
    }
    builder.build()
}

/// Offload executor with bounded admission.
///
/// At most `queue_capacity` computations may be queued or running at once;
/// beyond that `submit` rejects instead of queueing without bound.
pub struct WorkerExecutor {
    name: String,
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl WorkerExecutor {
    /// Start the worker pool.
    pub fn new(config: &ExecutorConfig) -> io::Result<Self> {
        let runtime = build_runtime(&config.thread_name_prefix, config.threads, false)?;
        let handle = runtime.handle().clone();

        tracing::debug!(
            executor = %config.thread_name_prefix,
            threads = config.threads,
            capacity = config.queue_capacity,
            "Worker executor started"
        );

        Ok(Self {
            name: config.thread_name_prefix.clone(),
            runtime: Mutex::new(Some(runtime)),
            handle,
            permits: Arc::new(Semaphore::new(config.queue_capacity)),
            capacity: config.queue_capacity,
        })
    }

    /// Thread-name prefix of the pool.
    pub fn thread_name_prefix(&self) -> &str {
        &self.name
    }

    /// Returns `true` if the calling thread belongs to this pool.
    pub fn is_worker_thread(&self) -> bool {
        current_thread_name().is_some_and(|n| n.starts_with(&self.name))
    }

    /// Free admission slots.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Stop accepting work and stop the runtime without waiting for it.
    ///
    /// Computations already accepted but not finished are dropped; their
    /// submitters observe the drop.
    pub fn shutdown(&self) {
        self.permits.close();
        if let Some(runtime) = self.runtime.lock().take() {
            runtime.shutdown_background();
            tracing::debug!(executor = %self.name, "Worker executor stopped");
        }
    }
}

impl Executor for WorkerExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn submit(&self, task: BoxFuture<'static, ()>) -> Result<(), RejectedExecution> {
        let permit = match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(tokio::sync::TryAcquireError::NoPermits) => {
                metrics::record_executor_rejection(&self.name);
                return Err(RejectedExecution::Saturated {
                    executor: self.name.clone(),
                    capacity: self.capacity,
                });
            }
            Err(tokio::sync::TryAcquireError::Closed) => {
                metrics::record_executor_rejection(&self.name);
                return Err(RejectedExecution::Shutdown {
                    executor: self.name.clone(),
                });
            }
        };

        self.handle.spawn(async move {
            let _permit = permit;
            task.await;
        });
        Ok(())
    }
}

impl fmt::Debug for WorkerExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerExecutor")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("available", &self.permits.available_permits())
            .finish()
    }
}

impl Drop for WorkerExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Pool of I/O threads owning accept loops and connection drivers.
pub struct IoExecutor {
    prefix: String,
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
}

impl IoExecutor {
    /// Start the I/O pool.
    pub fn new(config: &IoConfig) -> io::Result<Self> {
        let runtime = build_runtime(&config.thread_name_prefix, config.threads, true)?;
        let handle = runtime.handle().clone();

        tracing::debug!(
            executor = %config.thread_name_prefix,
            threads = config.threads,
            "I/O executor started"
        );

        Ok(Self {
            prefix: config.thread_name_prefix.clone(),
            runtime: Mutex::new(Some(runtime)),
            handle,
        })
    }

    /// Thread-name prefix of the pool.
    pub fn thread_name_prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns `true` if the calling thread is one of this pool's threads.
    pub fn is_io_thread(&self) -> bool {
        current_thread_name().is_some_and(|n| n.starts_with(&self.prefix))
    }

    /// Runtime handle of the pool.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Spawn an I/O task.
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(fut)
    }

    /// A hyper executor that spawns onto this pool.
    pub fn spawner(&self) -> IoSpawner {
        IoSpawner(self.handle.clone())
    }

    /// Stop the runtime without waiting for in-flight I/O.
    pub fn shutdown(&self) {
        if let Some(runtime) = self.runtime.lock().take() {
            runtime.shutdown_background();
            tracing::debug!(executor = %self.prefix, "I/O executor stopped");
        }
    }
}

impl fmt::Debug for IoExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoExecutor")
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl Drop for IoExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// hyper executor backed by an [`IoExecutor`] handle.
#[derive(Debug, Clone)]
pub struct IoSpawner(Handle);

impl<F> hyper::rt::Executor<F> for IoSpawner
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    fn execute(&self, fut: F) {
        self.0.spawn(fut);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use tokio::sync::oneshot;

    fn worker_config(capacity: usize) -> ExecutorConfig {
        ExecutorConfig {
            threads: 1,
            queue_capacity: capacity,
            thread_name_prefix: "test-worker".into(),
        }
    }

    #[tokio::test]
    async fn runs_on_named_worker_thread() {
        let executor = WorkerExecutor::new(&worker_config(4)).unwrap();
        let (tx, rx) = oneshot::channel();
        executor
            .submit(
                async move {
                    let _ = tx.send(current_thread_name());
                }
                .boxed(),
            )
            .unwrap();

        let name = rx.await.unwrap().unwrap();
        assert!(name.starts_with("test-worker-"), "ran on {name}");
    }

    #[tokio::test]
    async fn rejects_when_saturated() {
        let executor = WorkerExecutor::new(&worker_config(1)).unwrap();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        executor
            .submit(
                async move {
                    let _ = release_rx.await;
                }
                .boxed(),
            )
            .unwrap();

        let err = executor.submit(async {}.boxed()).unwrap_err();
        assert!(matches!(err, RejectedExecution::Saturated { capacity: 1, .. }));

        let _ = release_tx.send(());
    }

    #[tokio::test]
    async fn rejects_after_shutdown() {
        let executor = WorkerExecutor::new(&worker_config(4)).unwrap();
        executor.shutdown();
        let err = executor.submit(async {}.boxed()).unwrap_err();
        assert!(matches!(err, RejectedExecution::Shutdown { .. }));
    }

    #[tokio::test]
    async fn io_executor_names_threads() {
        let io = IoExecutor::new(&IoConfig {
            threads: 1,
            thread_name_prefix: "test-io".into(),
        })
        .unwrap();
        let (name, flagged) = io
            .spawn(async { (current_thread_name(), on_io_thread()) })
            .await
            .unwrap();
        assert!(name.unwrap().starts_with("test-io-"));
        assert!(flagged);
        assert!(!io.is_io_thread());
        assert!(!on_io_thread());
    }
}
