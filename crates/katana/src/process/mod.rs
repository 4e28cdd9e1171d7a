//! Process model: the worker process pool, its launch strategies and signal
//! handling.

use std::time::Duration;

mod errors;
mod pool;
mod shutdown;
mod worker;

pub use errors::{LaunchError, ProcessError};
pub use pool::{
    ExecProcessFactory, ProcessFactory, ProcessHandle, ProcessPool, ThreadProcessFactory,
};
pub use shutdown::{ShutdownError, ShutdownSignal, SystemShutdownSignal, install_worker_signals};
pub use worker::{WorkerProcess, inherited_endpoint, worker_marker};

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");

/// Time worker processes get to exit after SIGTERM.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Marks a re-executed binary as worker process number `N`.
pub const WORKER_ENV_VAR: &str = "KATANA_WORKER_PROCESS";

/// Carries the proxy's worker endpoint to worker processes.
pub const WORKER_ENDPOINT_ENV_VAR: &str = "KATANA_WORKER_ENDPOINT";
