//! Termination signals for the parent and worker processes.

use std::io;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use thiserror::Error;
use tracing::info;

use super::PROCESS_TARGET;

/// Abstraction over shutdown notification mechanisms.
pub trait ShutdownSignal: Send + Sync {
    /// Blocks until shutdown should proceed.
    fn wait(&self) -> Result<(), ShutdownError>;
}

/// Errors reported by shutdown signal listeners.
#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error("failed to install signal handlers: {source}")]
    Install {
        #[source]
        source: io::Error,
    },
}

/// Listener used by the parent process: waits for any termination signal.
#[derive(Debug, Clone)]
pub struct SystemShutdownSignal {
    timeout: Duration,
}

impl SystemShutdownSignal {
    /// Builds a signal listener that grants children `timeout` to exit.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl ShutdownSignal for SystemShutdownSignal {
    fn wait(&self) -> Result<(), ShutdownError> {
        let mut signals = Signals::new([SIGTERM, SIGINT, SIGQUIT, SIGHUP])
            .map_err(|source| ShutdownError::Install { source })?;
        if let Some(signal) = signals.forever().next() {
            info!(
                target: PROCESS_TARGET,
                signal,
                timeout_ms = self.timeout.as_millis(),
                "shutdown signal received"
            );
        }
        Ok(())
    }
}

/// Wires the signals of a worker process to its stop flag.
///
/// SIGTERM raises `stop`. SIGINT is swallowed: an interactive interrupt
/// reaches the whole process group, and the parent decides when workers end.
///
/// # Errors
///
/// Returns [`ShutdownError::Install`] when a handler cannot be registered.
pub fn install_worker_signals(stop: &Arc<AtomicBool>) -> Result<(), ShutdownError> {
    signal_hook::flag::register(SIGTERM, Arc::clone(stop))
        .and_then(|_| signal_hook::flag::register(SIGINT, Arc::new(AtomicBool::new(false))))
        .map(|_| ())
        .map_err(|source| ShutdownError::Install { source })
}
