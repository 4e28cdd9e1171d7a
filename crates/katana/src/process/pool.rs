//! A fixed set of worker processes and the strategies that start them.

use std::env;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use katana_config::SocketEndpoint;
use tracing::{debug, warn};

use crate::health::HealthReporter;

use super::worker::WorkerProcess;
use super::{PROCESS_TARGET, ProcessError, WORKER_ENDPOINT_ENV_VAR, WORKER_ENV_VAR};

const REAP_INTERVAL: Duration = Duration::from_millis(25);

/// Starts worker process number `index` bound to `endpoint`.
pub trait ProcessFactory: Send + Sync {
    /// Launches one worker process.
    fn launch(&self, index: usize, endpoint: &SocketEndpoint)
    -> Result<ProcessHandle, ProcessError>;
}

/// A running worker process.
#[derive(Debug)]
pub struct ProcessHandle {
    index: usize,
    kind: HandleKind,
}

#[derive(Debug)]
enum HandleKind {
    Child(Child),
    Thread {
        stop: Arc<AtomicBool>,
        thread: Option<thread::JoinHandle<Result<(), ProcessError>>>,
    },
}

impl ProcessHandle {
    /// Wraps an operating system child process.
    #[must_use]
    pub fn child(index: usize, child: Child) -> Self {
        Self {
            index,
            kind: HandleKind::Child(child),
        }
    }

    /// Wraps an in-process worker running on its own thread.
    #[must_use]
    pub fn thread(
        index: usize,
        stop: Arc<AtomicBool>,
        thread: thread::JoinHandle<Result<(), ProcessError>>,
    ) -> Self {
        Self {
            index,
            kind: HandleKind::Thread {
                stop,
                thread: Some(thread),
            },
        }
    }

    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Operating system pid, for child processes.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        match &self.kind {
            HandleKind::Child(child) => Some(child.id()),
            HandleKind::Thread { .. } => None,
        }
    }

    /// Asks the process to stop gracefully.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError`] when the child cannot be signalled.
    pub fn terminate(&mut self) -> Result<(), ProcessError> {
        match &mut self.kind {
            HandleKind::Child(child) => terminate_child(self.index, child),
            HandleKind::Thread { stop, .. } => {
                stop.store(true, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    /// Reaps the process if it ended, returning how it ended.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError`] when waiting fails, or when an in-process
    /// worker panicked or could not build its runtime.
    pub fn try_exit(&mut self) -> Result<Option<String>, ProcessError> {
        let index = self.index;
        match &mut self.kind {
            HandleKind::Child(child) => child
                .try_wait()
                .map(|status| status.map(|status| status.to_string()))
                .map_err(|source| ProcessError::Wait { index, source }),
            HandleKind::Thread { thread, .. } => {
                let Some(handle) = thread.take_if(|handle| handle.is_finished()) else {
                    return Ok(None);
                };
                match handle.join() {
                    Ok(result) => result.map(|()| Some("stopped".to_owned())),
                    Err(_) => Err(ProcessError::Panicked { index }),
                }
            }
        }
    }

    /// Forces the process to end. In-process workers cannot be killed and
    /// are left to observe their stop flag.
    pub fn kill(&mut self) {
        if let HandleKind::Child(child) = &mut self.kind
            && let Err(error) = child.kill().and_then(|()| child.wait().map(drop))
        {
            warn!(
                target: PROCESS_TARGET,
                process = self.index,
                error = %error,
                "failed to kill worker process"
            );
        }
    }
}

#[cfg(unix)]
fn terminate_child(index: usize, child: &mut Child) -> Result<(), ProcessError> {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let pid = child.id();
    let Ok(raw) = i32::try_from(pid) else {
        return Ok(());
    };
    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(source) => Err(ProcessError::Signal { index, pid, source }),
    }
}

#[cfg(not(unix))]
fn terminate_child(index: usize, child: &mut Child) -> Result<(), ProcessError> {
    child
        .kill()
        .map_err(|source| ProcessError::Wait { index, source })
}

/// Re-executes the current binary with the worker marker set.
#[derive(Debug, Clone)]
pub struct ExecProcessFactory {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ExecProcessFactory {
    /// Uses the running executable and its arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Executable`] when the executable path is
    /// unavailable.
    pub fn current() -> Result<Self, ProcessError> {
        let program = env::current_exe().map_err(|source| ProcessError::Executable { source })?;
        Ok(Self::new(program, env::args_os().skip(1)))
    }

    pub fn new(program: impl Into<PathBuf>, args: impl IntoIterator<Item = OsString>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().collect(),
        }
    }
}

impl ProcessFactory for ExecProcessFactory {
    fn launch(
        &self,
        index: usize,
        endpoint: &SocketEndpoint,
    ) -> Result<ProcessHandle, ProcessError> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .env(WORKER_ENV_VAR, index.to_string())
            .env(WORKER_ENDPOINT_ENV_VAR, endpoint.to_string())
            .stdin(Stdio::null())
            .spawn()
            .map_err(|source| ProcessError::Spawn { index, source })?;
        Ok(ProcessHandle::child(index, child))
    }
}

/// Runs each worker process as a thread with its own event loop.
///
/// Used by tests and single-binary deployments; the processes share the
/// handler pool of `template`.
#[derive(Clone)]
pub struct ThreadProcessFactory {
    template: WorkerProcess,
}

impl ThreadProcessFactory {
    #[must_use]
    pub fn new(template: WorkerProcess) -> Self {
        Self { template }
    }
}

impl ProcessFactory for ThreadProcessFactory {
    fn launch(
        &self,
        index: usize,
        endpoint: &SocketEndpoint,
    ) -> Result<ProcessHandle, ProcessError> {
        let process = self.template.clone().renumber(index, endpoint.clone());
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let thread = thread::Builder::new()
            .name(format!("katana-process-{index}"))
            .spawn(move || process.run_blocking(flag))
            .map_err(|source| ProcessError::Spawn { index, source })?;
        Ok(ProcessHandle::thread(index, stop, thread))
    }
}

/// The worker processes of one component.
pub struct ProcessPool {
    factory: Arc<dyn ProcessFactory>,
    reporter: Arc<dyn HealthReporter>,
    processes: Vec<ProcessHandle>,
}

impl ProcessPool {
    #[must_use]
    pub fn new(factory: Arc<dyn ProcessFactory>, reporter: Arc<dyn HealthReporter>) -> Self {
        Self {
            factory,
            reporter,
            processes: Vec::new(),
        }
    }

    /// Launches `count` processes serving `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns the first launch failure; processes already started keep
    /// running until [`ProcessPool::stop`].
    pub fn start(&mut self, count: usize, endpoint: &SocketEndpoint) -> Result<(), ProcessError> {
        for index in self.processes.len()..self.processes.len() + count {
            let handle = self.factory.launch(index, endpoint)?;
            self.reporter.process_spawned(index, handle.pid());
            self.processes.push(handle);
        }
        Ok(())
    }

    /// Number of processes not yet reaped.
    #[must_use]
    pub fn len(&self) -> usize {
        self.processes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Terminates every process, killing those still alive after `timeout`.
    pub fn stop(&mut self, timeout: Duration) {
        for process in &mut self.processes {
            if let Err(error) = process.terminate() {
                warn!(target: PROCESS_TARGET, error = %error, "failed to stop worker process");
            }
        }

        let deadline = Instant::now() + timeout;
        loop {
            self.reap();
            if self.processes.is_empty() || Instant::now() >= deadline {
                break;
            }
            thread::sleep(REAP_INTERVAL);
        }

        for mut process in self.processes.drain(..) {
            debug!(
                target: PROCESS_TARGET,
                process = process.index(),
                "worker process ignored termination"
            );
            process.kill();
            self.reporter.process_exited(process.index(), "killed");
        }
    }

    fn reap(&mut self) {
        let reporter = &self.reporter;
        self.processes.retain_mut(|process| match process.try_exit() {
            Ok(None) => true,
            Ok(Some(status)) => {
                reporter.process_exited(process.index(), &status);
                false
            }
            Err(error) => {
                reporter.process_exited(process.index(), &error.to_string());
                false
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;
    use mockall::predicate::eq;

    use crate::bootstrap::BootstrapError;
    use katana_config::Config;

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

    /// Threads that wait for their stop flag, or ignore it entirely.
    struct IdleFactory {
        obedient: bool,
    }

    impl ProcessFactory for IdleFactory {
        fn launch(&self, index: usize, _: &SocketEndpoint) -> Result<ProcessHandle, ProcessError> {
            let stop = Arc::new(AtomicBool::new(false));
            let flag = Arc::clone(&stop);
            let obedient = self.obedient;
            let thread = thread::spawn(move || {
                let started = Instant::now();
                while !(obedient && flag.load(Ordering::SeqCst))
                    && started.elapsed() < Duration::from_secs(1)
                {
                    thread::sleep(Duration::from_millis(5));
                }
                Ok(())
            });
            Ok(ProcessHandle::thread(index, stop, thread))
        }
    }

    #[test]
    fn stopping_reaps_every_process() {
        let mut reporter = MockReporter::new();
        reporter
            .expect_process_spawned()
            .times(3)
            .return_const(());
        reporter
            .expect_process_exited()
            .withf(|_, status| status == "stopped")
            .times(3)
            .return_const(());

        let mut pool = ProcessPool::new(
            Arc::new(IdleFactory { obedient: true }),
            Arc::new(reporter),
        );
        pool.start(3, &SocketEndpoint::tcp("127.0.0.1", 0))
            .expect("start pool");
        assert_eq!(pool.len(), 3);
        pool.stop(Duration::from_secs(2));
        assert!(pool.is_empty());
    }

    #[test]
    fn processes_ignoring_termination_are_given_up_on() {
        let mut reporter = MockReporter::new();
        reporter
            .expect_process_spawned()
            .with(eq(0), eq(None))
            .times(1)
            .return_const(());
        reporter
            .expect_process_exited()
            .withf(|index, status| *index == 0 && status == "killed")
            .times(1)
            .return_const(());

        let mut pool = ProcessPool::new(
            Arc::new(IdleFactory { obedient: false }),
            Arc::new(reporter),
        );
        pool.start(1, &SocketEndpoint::tcp("127.0.0.1", 0))
            .expect("start pool");
        let started = Instant::now();
        pool.stop(Duration::from_millis(50));
        assert!(started.elapsed() < Duration::from_millis(900));
        assert!(pool.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn child_processes_are_terminated() {
        let mut reporter = MockReporter::new();
        reporter.expect_process_spawned().times(1).return_const(());
        reporter
            .expect_process_exited()
            .withf(|_, status| status.contains("SIGTERM") || status.contains("signal"))
            .times(1)
            .return_const(());

        let factory = ExecProcessFactory::new("sleep", [OsString::from("30")]);
        let mut pool = ProcessPool::new(Arc::new(factory), Arc::new(reporter));
        pool.start(1, &SocketEndpoint::tcp("127.0.0.1", 0))
            .expect("start sleep");
        pool.stop(Duration::from_secs(5));
        assert!(pool.is_empty());
    }
}
