use camino::Utf8PathBuf;
use std::env;

#[cfg(unix)]
use libc::geteuid;

#[cfg(unix)]
use dirs::runtime_dir;

use crate::component::ComponentKind;
use crate::logging::LogFormat;
use crate::socket::SocketEndpoint;

/// Default TCP port used when Unix domain sockets are not available.
pub const DEFAULT_TCP_PORT: u16 = 9780;

/// Default log filter expression.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Worker processes started when none are configured.
pub const DEFAULT_PROCESSES: usize = 1;

/// Worker tasks per process started when none are configured.
pub const DEFAULT_WORKERS: usize = 5;

/// Threads available to blocking handlers in each process.
pub const DEFAULT_HANDLER_THREADS: usize = 15;

/// Default log filter expression.
#[must_use]
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format.
#[must_use]
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Default component role.
#[must_use]
pub fn default_component() -> ComponentKind {
    ComponentKind::Service
}

/// Default number of worker processes.
#[must_use]
pub const fn default_processes() -> usize {
    DEFAULT_PROCESSES
}

/// Default number of worker tasks per process.
#[must_use]
pub const fn default_workers() -> usize {
    DEFAULT_WORKERS
}

/// Default size of the blocking handler thread pool.
#[must_use]
pub const fn default_handler_threads() -> usize {
    DEFAULT_HANDLER_THREADS
}

/// Computes the default front-door endpoint.
#[must_use]
pub fn default_socket_endpoint() -> SocketEndpoint {
    default_socket_endpoint_inner()
}

#[cfg(unix)]
fn default_socket_endpoint_inner() -> SocketEndpoint {
    let (mut base, apply_namespace) = match runtime_base_directory() {
        Some(dir) => (dir, false),
        None => (fallback_base_directory(), true),
    };

    base.push("katana");
    if apply_namespace {
        base.push(user_namespace());
    }

    SocketEndpoint::unix(base.join("katana.sock"))
}

#[cfg(unix)]
fn runtime_base_directory() -> Option<Utf8PathBuf> {
    runtime_dir().and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
}

#[cfg(unix)]
fn fallback_base_directory() -> Utf8PathBuf {
    let candidate = env::temp_dir();
    Utf8PathBuf::from_path_buf(candidate).unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
}

#[cfg(unix)]
fn user_namespace() -> String {
    // SAFETY: `geteuid` has no preconditions and cannot fail.
    let uid = unsafe { geteuid() };
    format!("uid-{uid}")
}

#[cfg(not(unix))]
fn default_socket_endpoint_inner() -> SocketEndpoint {
    SocketEndpoint::tcp("127.0.0.1", DEFAULT_TCP_PORT)
}
