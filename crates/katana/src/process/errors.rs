//! Defines the error surface for component launch and process supervision.

use std::io;

use katana_config::SocketParseError;
use thiserror::Error;

use crate::bootstrap::BootstrapError;
use crate::server::ServerError;

use super::shutdown::ShutdownError;

/// Exit status for configuration problems (`EX_CONFIG`).
const EXIT_CONFIG: u8 = 78;
/// Exit status when the front door is owned by someone else.
const EXIT_ADDRESS_IN_USE: u8 = 98;
const EXIT_FAILURE: u8 = 1;

/// Errors raised while starting, signalling or reaping worker processes.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to locate the component executable: {source}")]
    Executable {
        #[source]
        source: io::Error,
    },
    #[error("failed to start worker process {index}: {source}")]
    Spawn {
        index: usize,
        #[source]
        source: io::Error,
    },
    #[error("failed to wait for worker process {index}: {source}")]
    Wait {
        index: usize,
        #[source]
        source: io::Error,
    },
    #[cfg(unix)]
    #[error("failed to signal worker process {index} (pid {pid}): {source}")]
    Signal {
        index: usize,
        pid: u32,
        #[source]
        source: nix::errno::Errno,
    },
    #[error("worker process {index} panicked")]
    Panicked { index: usize },
    #[error("failed to build the worker runtime: {source}")]
    Runtime {
        #[source]
        source: io::Error,
    },
    #[error("worker endpoint variable {variable} is not set")]
    MissingEndpoint { variable: &'static str },
    #[error("worker endpoint {value:?} is invalid: {source}")]
    Endpoint {
        value: String,
        #[source]
        source: SocketParseError,
    },
}

/// Errors surfaced while launching or running a component.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("component bootstrap failed: {source}")]
    Bootstrap {
        #[source]
        source: BootstrapError,
    },
    #[error("component server failed: {source}")]
    Server {
        #[source]
        source: ServerError,
    },
    #[error("worker processes failed: {source}")]
    Process {
        #[source]
        source: ProcessError,
    },
    #[error("failed to await shutdown signal: {source}")]
    Shutdown {
        #[source]
        source: ShutdownError,
    },
    #[error("failed to build the component runtime: {source}")]
    Runtime {
        #[source]
        source: io::Error,
    },
    #[error("{stage} callback failed: {message}")]
    Callback { stage: &'static str, message: String },
}

impl LaunchError {
    /// Process exit status reporting this failure; never zero.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Bootstrap { .. } => EXIT_CONFIG,
            Self::Server { source } if source.is_address_in_use() => EXIT_ADDRESS_IN_USE,
            _ => EXIT_FAILURE,
        }
    }
}

impl From<BootstrapError> for LaunchError {
    fn from(source: BootstrapError) -> Self {
        Self::Bootstrap { source }
    }
}

impl From<ServerError> for LaunchError {
    fn from(source: ServerError) -> Self {
        Self::Server { source }
    }
}

impl From<ProcessError> for LaunchError {
    fn from(source: ProcessError) -> Self {
        Self::Process { source }
    }
}

impl From<ShutdownError> for LaunchError {
    fn from(source: ShutdownError) -> Self {
        Self::Shutdown { source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use katana_config::ConfigError;
    use rstest::rstest;
    use std::net::{Ipv4Addr, SocketAddr};

    fn in_use() -> LaunchError {
        ServerError::BindTcp {
            addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 9000)),
            source: io::Error::from(io::ErrorKind::AddrInUse),
        }
        .into()
    }

    fn invalid() -> LaunchError {
        BootstrapError::Invalid {
            source: ConfigError::MissingName,
        }
        .into()
    }

    fn panicked() -> LaunchError {
        ProcessError::Panicked { index: 2 }.into()
    }

    #[rstest]
    #[case::address_in_use(in_use(), EXIT_ADDRESS_IN_USE)]
    #[case::bad_configuration(invalid(), EXIT_CONFIG)]
    #[case::process_failure(panicked(), EXIT_FAILURE)]
    fn failures_map_to_non_zero_exit_codes(#[case] error: LaunchError, #[case] expected: u8) {
        assert_eq!(error.exit_code(), expected);
        assert_ne!(error.exit_code(), 0);
    }
}
