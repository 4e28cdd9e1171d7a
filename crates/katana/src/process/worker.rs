//! One worker process: an event loop running a supervised set of tasks.

use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use katana_config::SocketEndpoint;
use tracing::info;

use crate::health::HealthReporter;
use crate::supervisor::{TaskSupervisor, task_factory};
use crate::worker::{ComponentAdapter, Worker, WorkerContext};

use super::{PROCESS_TARGET, ProcessError, WORKER_ENDPOINT_ENV_VAR, WORKER_ENV_VAR};

/// Index of this process when it was started as a worker, read from the
/// environment marker.
#[must_use]
pub fn worker_marker() -> Option<usize> {
    env::var(WORKER_ENV_VAR).ok()?.parse().ok()
}

/// Worker endpoint handed down by the parent process.
///
/// # Errors
///
/// Fails when the variable is missing or does not parse.
pub fn inherited_endpoint() -> Result<SocketEndpoint, ProcessError> {
    let value = env::var(WORKER_ENDPOINT_ENV_VAR).map_err(|_| ProcessError::MissingEndpoint {
        variable: WORKER_ENDPOINT_ENV_VAR,
    })?;
    SocketEndpoint::from_str(&value).map_err(|source| ProcessError::Endpoint { value, source })
}

/// Everything a worker process needs to serve requests.
#[derive(Clone)]
pub struct WorkerProcess {
    index: usize,
    endpoint: SocketEndpoint,
    adapter: Arc<dyn ComponentAdapter>,
    context: Arc<WorkerContext>,
    workers: usize,
    handler_threads: usize,
    reporter: Arc<dyn HealthReporter>,
}

impl WorkerProcess {
    #[must_use]
    pub fn new(
        index: usize,
        endpoint: SocketEndpoint,
        adapter: Arc<dyn ComponentAdapter>,
        context: Arc<WorkerContext>,
        reporter: Arc<dyn HealthReporter>,
    ) -> Self {
        let handler_threads = context.pool().size();
        Self {
            index,
            endpoint,
            adapter,
            context,
            workers: 1,
            handler_threads,
            reporter,
        }
    }

    /// Number of worker tasks to keep running.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub(crate) fn renumber(mut self, index: usize, endpoint: SocketEndpoint) -> Self {
        self.index = index;
        self.endpoint = endpoint;
        self
    }

    /// Runs the tasks on the current runtime until `stop` is raised.
    pub async fn serve(self, stop: Arc<AtomicBool>) {
        let Self {
            index,
            endpoint,
            adapter,
            context,
            workers,
            reporter,
            ..
        } = self;
        info!(
            target: PROCESS_TARGET,
            process = index,
            workers,
            endpoint = %endpoint,
            "worker process serving"
        );
        let factory = task_factory(move |id, cancel| {
            Worker::new(id, endpoint.clone(), Arc::clone(&adapter), Arc::clone(&context))
                .run(cancel)
        });
        let mut supervisor = TaskSupervisor::new(factory, reporter);
        supervisor.spawn(workers);
        supervisor.run(stop).await;
        info!(target: PROCESS_TARGET, process = index, "worker process stopped");
    }

    /// Builds a single-threaded event loop and serves on it.
    ///
    /// Blocking handlers still run on the runtime's blocking threads, capped
    /// at the handler pool size.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Runtime`] when the runtime cannot be built.
    pub fn run_blocking(self, stop: Arc<AtomicBool>) -> Result<(), ProcessError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .max_blocking_threads(self.handler_threads.max(1))
            .thread_name(format!("katana-worker-{}", self.index))
            .build()
            .map_err(|source| ProcessError::Runtime { source })?;
        runtime.block_on(self.serve(stop));
        Ok(())
    }
}
