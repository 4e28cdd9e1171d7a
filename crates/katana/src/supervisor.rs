//! Supervision of the worker tasks of one process.
//!
//! A monitor loop wakes every [`MONITOR_INTERVAL`] and replaces tasks that
//! failed or panicked with fresh ones. Tasks that returned `Ok` stay stopped.
//! Once the stop flag is raised every task is cancelled; tasks still running
//! after [`CANCEL_TIMEOUT`] are aborted.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::future::{BoxFuture, join_all};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::health::HealthReporter;
use crate::worker::WorkerError;

const SUPERVISOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::supervisor");

/// Pause between two monitor cycles.
pub const MONITOR_INTERVAL: Duration = Duration::from_millis(100);

/// Time cancelled tasks get to finish before being aborted.
pub const CANCEL_TIMEOUT: Duration = Duration::from_millis(1_500);

/// Builds the future of task `id`, observing `cancel`.
pub type TaskFactory = Arc<
    dyn Fn(usize, CancellationToken) -> BoxFuture<'static, Result<(), WorkerError>> + Send + Sync,
>;

type TaskHandle = JoinHandle<Result<(), WorkerError>>;

/// Wraps an async closure into a [`TaskFactory`].
pub fn task_factory<F, Fut>(task: F) -> TaskFactory
where
    F: Fn(usize, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), WorkerError>> + Send + 'static,
{
    Arc::new(
        move |id: usize, cancel: CancellationToken| -> BoxFuture<'static, Result<(), WorkerError>> {
            Box::pin(task(id, cancel))
        },
    )
}

/// Keeps a fixed set of worker tasks running.
pub struct TaskSupervisor {
    factory: TaskFactory,
    reporter: Arc<dyn HealthReporter>,
    cancel: CancellationToken,
    tasks: Vec<Option<TaskHandle>>,
}

enum Outcome {
    Stopped,
    Failed(String),
}

fn outcome(joined: Result<Result<(), WorkerError>, JoinError>) -> Outcome {
    match joined {
        Ok(Ok(()) | Err(WorkerError::Cancelled)) => Outcome::Stopped,
        Ok(Err(error)) => Outcome::Failed(error.to_string()),
        Err(error) if error.is_panic() => Outcome::Failed("worker task panicked".to_owned()),
        Err(_) => Outcome::Stopped,
    }
}

impl TaskSupervisor {
    /// A supervisor with no tasks yet.
    #[must_use]
    pub fn new(factory: TaskFactory, reporter: Arc<dyn HealthReporter>) -> Self {
        Self {
            factory,
            reporter,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }

    /// Token cancelled when the supervisor shuts down.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn launch(&self, id: usize) -> TaskHandle {
        debug!(target: SUPERVISOR_TARGET, task = id, "starting worker task");
        tokio::spawn((self.factory)(id, self.cancel.child_token()))
    }

    /// Starts `count` tasks. Must run inside a Tokio runtime.
    pub fn spawn(&mut self, count: usize) {
        for _ in 0..count {
            let handle = self.launch(self.tasks.len());
            self.tasks.push(Some(handle));
        }
    }

    /// Number of tasks still running.
    #[must_use]
    pub fn active(&self) -> usize {
        self.tasks
            .iter()
            .flatten()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// Runs one monitor cycle and returns how many tasks were restarted.
    pub async fn monitor_once(&mut self) -> usize {
        let mut restarted = 0;
        for id in 0..self.tasks.len() {
            let Some(slot) = self.tasks.get_mut(id) else {
                continue;
            };
            let Some(handle) = slot.take_if(|handle| handle.is_finished()) else {
                continue;
            };
            match outcome(handle.await) {
                Outcome::Stopped => {
                    info!(target: SUPERVISOR_TARGET, task = id, "worker task finished");
                }
                Outcome::Failed(reason) if !self.cancel.is_cancelled() => {
                    error!(target: SUPERVISOR_TARGET, task = id, reason, "worker task failed");
                    self.reporter.task_restarted(id, &reason);
                    let replacement = self.launch(id);
                    if let Some(slot) = self.tasks.get_mut(id) {
                        *slot = Some(replacement);
                    }
                    restarted += 1;
                }
                Outcome::Failed(reason) => {
                    warn!(
                        target: SUPERVISOR_TARGET,
                        task = id,
                        reason,
                        "worker task failed during shutdown"
                    );
                }
            }
        }
        restarted
    }

    /// Monitors the tasks until `stop` is raised, then shuts them down.
    pub async fn run(mut self, stop: Arc<AtomicBool>) {
        while !stop.load(Ordering::SeqCst) && !self.cancel.is_cancelled() {
            tokio::time::sleep(MONITOR_INTERVAL).await;
            self.monitor_once().await;
        }
        self.shutdown().await;
    }

    /// Cancels every task, waiting at most [`CANCEL_TIMEOUT`] before aborting.
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        let handles: Vec<TaskHandle> = self.tasks.iter_mut().filter_map(Option::take).collect();
        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        info!(target: SUPERVISOR_TARGET, tasks = handles.len(), "cancelling worker tasks");
        if tokio::time::timeout(CANCEL_TIMEOUT, join_all(handles))
            .await
            .is_err()
        {
            warn!(target: SUPERVISOR_TARGET, "worker tasks ignored cancellation; aborting");
            for abort in aborts {
                abort.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use katana_config::{Config, SocketEndpoint};
    use mockall::mock;
    use std::sync::atomic::AtomicUsize;

    use crate::bootstrap::BootstrapError;

    mock! {
        Reporter {}
        impl HealthReporter for Reporter {
            fn bootstrap_starting(&self);
            fn bootstrap_succeeded(&self, config: &Config);
            fn bootstrap_failed(&self, error: &BootstrapError);
            fn server_ready(&self, endpoint: &SocketEndpoint);
            fn server_stopped(&self, endpoint: &SocketEndpoint);
            fn process_spawned(&self, index: usize, pid: Option<u32>);
            fn process_exited(&self, index: usize, status: &str);
            fn task_restarted(&self, task: usize, reason: &str);
        }
    }

    fn idle_factory() -> TaskFactory {
        task_factory(|_, cancel| async move {
            cancel.cancelled().await;
            Err(WorkerError::Cancelled)
        })
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn failed_tasks_are_replaced() {
        let starts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&starts);
        let factory = task_factory(move |id, cancel| {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if id == 0 && attempt == 0 {
                    return Err(WorkerError::Disconnected);
                }
                cancel.cancelled().await;
                Ok(())
            }
        });
        let mut reporter = MockReporter::new();
        reporter
            .expect_task_restarted()
            .withf(|task, reason| *task == 0 && reason.contains("closed"))
            .times(1)
            .return_const(());

        let mut supervisor = TaskSupervisor::new(factory, Arc::new(reporter));
        supervisor.spawn(3);
        settle().await;
        assert_eq!(supervisor.active(), 2);

        assert_eq!(supervisor.monitor_once().await, 1);
        settle().await;
        assert_eq!(supervisor.active(), 3);
        assert_eq!(starts.load(Ordering::SeqCst), 4);
        supervisor.shutdown().await;
        assert_eq!(supervisor.active(), 0);
    }

    #[tokio::test]
    async fn panicking_tasks_are_replaced() {
        let starts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&starts);
        let factory = task_factory(move |_, cancel| {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                assert!(attempt > 0, "first attempt panics");
                cancel.cancelled().await;
                Ok::<(), WorkerError>(())
            }
        });
        let mut reporter = MockReporter::new();
        reporter.expect_task_restarted().times(1).return_const(());

        let mut supervisor = TaskSupervisor::new(factory, Arc::new(reporter));
        supervisor.spawn(1);
        settle().await;
        assert_eq!(supervisor.monitor_once().await, 1);
        settle().await;
        assert_eq!(supervisor.active(), 1);
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn finished_tasks_stay_stopped() {
        let factory = task_factory(|_, _| async { Ok::<(), WorkerError>(()) });
        let mut reporter = MockReporter::new();
        reporter.expect_task_restarted().never();

        let mut supervisor = TaskSupervisor::new(factory, Arc::new(reporter));
        supervisor.spawn(2);
        settle().await;
        assert_eq!(supervisor.monitor_once().await, 0);
        assert_eq!(supervisor.active(), 0);
    }

    #[tokio::test]
    async fn raising_the_stop_flag_cancels_every_task() {
        let mut reporter = MockReporter::new();
        reporter.expect_task_restarted().never();
        let mut supervisor = TaskSupervisor::new(idle_factory(), Arc::new(reporter));
        supervisor.spawn(4);
        let token = supervisor.cancellation_token();

        let stop = Arc::new(AtomicBool::new(false));
        let monitor = tokio::spawn(supervisor.run(Arc::clone(&stop)));
        settle().await;
        stop.store(true, Ordering::SeqCst);
        tokio::time::timeout(Duration::from_secs(1), monitor)
            .await
            .expect("monitor stops")
            .expect("join monitor");
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn stubborn_tasks_are_aborted() {
        let factory = task_factory(|_, _| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<(), WorkerError>(())
        });
        let mut supervisor = TaskSupervisor::new(factory, Arc::new(MockReporter::new()));
        supervisor.spawn(1);
        let started = tokio::time::Instant::now();
        supervisor.shutdown().await;
        assert!(started.elapsed() >= CANCEL_TIMEOUT);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
