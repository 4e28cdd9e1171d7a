//! Layered configuration for Katana components.
//!
//! Values resolve from built-in defaults, then a configuration file, then
//! `KATANA_*` environment variables, then command-line flags. The resolved
//! [`Config`] names the component, the front-door socket, the size of the
//! worker pool and the logging setup.

mod component;
mod defaults;
mod logging;
mod socket;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use component::{ComponentKind, ComponentKindParseError};
pub use defaults::{
    DEFAULT_HANDLER_THREADS, DEFAULT_LOG_FILTER, DEFAULT_PROCESSES, DEFAULT_TCP_PORT,
    DEFAULT_WORKERS, default_component, default_handler_threads, default_log_filter,
    default_log_filter_string, default_log_format, default_processes, default_socket_endpoint,
    default_workers,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use socket::{SocketEndpoint, SocketParseError, SocketPreparationError, WORKER_SOCKET_SUFFIX};

/// Resolved component configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "KATANA")]
pub struct Config {
    /// Role of the component.
    #[serde(default = "default_component")]
    #[ortho_config(default = default_component())]
    pub component: ComponentKind,
    /// Component name as registered with the platform.
    #[serde(default)]
    #[ortho_config(default = String::new())]
    pub component_name: String,
    /// Component version.
    #[serde(default)]
    #[ortho_config(default = String::new())]
    pub component_version: String,
    /// Platform version the component runs against.
    #[serde(default)]
    #[ortho_config(default = String::new())]
    pub platform_version: String,
    /// Front-door socket the proxy binds.
    #[serde(default = "default_socket_endpoint")]
    #[ortho_config(default = default_socket_endpoint())]
    pub socket: SocketEndpoint,
    /// Number of worker processes.
    #[serde(default = "default_processes")]
    #[ortho_config(default = default_processes())]
    pub processes: usize,
    /// Number of worker tasks in each process.
    #[serde(default = "default_workers")]
    #[ortho_config(default = default_workers())]
    pub workers: usize,
    /// Threads available to blocking handlers in each process.
    #[serde(default = "default_handler_threads")]
    #[ortho_config(default = default_handler_threads())]
    pub handler_threads: usize,
    /// Stores payload keys verbatim instead of under compact aliases.
    #[serde(default)]
    #[ortho_config(default = false)]
    pub disable_compact_names: bool,
    /// Enables debug behaviour exposed to handlers.
    #[serde(default)]
    #[ortho_config(default = false)]
    pub debug: bool,
    /// `tracing` filter directive.
    #[serde(default = "default_log_filter_string")]
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Log output format.
    #[serde(default = "default_log_format")]
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            component: default_component(),
            component_name: String::new(),
            component_version: String::new(),
            platform_version: String::new(),
            socket: default_socket_endpoint(),
            processes: default_processes(),
            workers: default_workers(),
            handler_threads: default_handler_threads(),
            disable_compact_names: false,
            debug: false,
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
        }
    }
}

/// Problems that make a loaded configuration unusable for launching.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The component name is empty.
    #[error("component name must be set")]
    MissingName,
    /// The component version is empty.
    #[error("component version must be set")]
    MissingVersion,
    /// A pool size is zero.
    #[error("{field} must be at least 1")]
    EmptyPool {
        /// Offending field.
        field: &'static str,
    },
}

impl Config {
    /// Role of the component.
    #[must_use]
    pub const fn component(&self) -> ComponentKind {
        self.component
    }

    /// Component name.
    #[must_use]
    pub fn component_name(&self) -> &str {
        &self.component_name
    }

    /// Component version.
    #[must_use]
    pub fn component_version(&self) -> &str {
        &self.component_version
    }

    /// Platform version.
    #[must_use]
    pub fn platform_version(&self) -> &str {
        &self.platform_version
    }

    /// Front-door socket.
    #[must_use]
    pub const fn socket(&self) -> &SocketEndpoint {
        &self.socket
    }

    /// Internal endpoint linking the proxy with its worker processes.
    #[must_use]
    pub fn worker_endpoint(&self) -> SocketEndpoint {
        self.socket.worker_endpoint()
    }

    /// Number of worker processes.
    #[must_use]
    pub const fn processes(&self) -> usize {
        self.processes
    }

    /// Number of worker tasks per process.
    #[must_use]
    pub const fn workers(&self) -> usize {
        self.workers
    }

    /// Blocking handler threads per process.
    #[must_use]
    pub const fn handler_threads(&self) -> usize {
        self.handler_threads
    }

    /// Whether payload keys travel under compact aliases.
    #[must_use]
    pub const fn compact_names(&self) -> bool {
        !self.disable_compact_names
    }

    /// Whether debug behaviour is enabled.
    #[must_use]
    pub const fn debug(&self) -> bool {
        self.debug
    }

    /// Log filter directive.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Checks that the configuration identifies a runnable component.
    ///
    /// # Errors
    ///
    /// Reports the first missing identity field or empty pool.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.component_name.trim().is_empty() {
            return Err(ConfigError::MissingName);
        }
        if self.component_version.trim().is_empty() {
            return Err(ConfigError::MissingVersion);
        }
        for (field, size) in [
            ("processes", self.processes),
            ("workers", self.workers),
            ("handler_threads", self.handler_threads),
        ] {
            if size == 0 {
                return Err(ConfigError::EmptyPool { field });
            }
        }
        Ok(())
    }
}
