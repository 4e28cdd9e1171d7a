//! Structured health reporting for component lifecycle events.

use std::sync::Arc;

use katana_config::{Config, SocketEndpoint};

use crate::bootstrap::BootstrapError;

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait HealthReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked after bootstrap completes successfully.
    fn bootstrap_succeeded(&self, config: &Config);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked once the proxy is listening on its front door.
    fn server_ready(&self, endpoint: &SocketEndpoint);

    /// Invoked after the proxy stopped and its sockets were removed.
    fn server_stopped(&self, endpoint: &SocketEndpoint);

    /// Invoked when a worker process starts.
    fn process_spawned(&self, index: usize, pid: Option<u32>);

    /// Invoked when a worker process ends.
    fn process_exited(&self, index: usize, status: &str);

    /// Invoked when a failed worker task is replaced.
    fn task_restarted(&self, task: usize, reason: &str);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter + ?Sized,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        (**self).bootstrap_succeeded(config);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn server_ready(&self, endpoint: &SocketEndpoint) {
        (**self).server_ready(endpoint);
    }

    fn server_stopped(&self, endpoint: &SocketEndpoint) {
        (**self).server_stopped(endpoint);
    }

    fn process_spawned(&self, index: usize, pid: Option<u32>) {
        (**self).process_spawned(index, pid);
    }

    fn process_exited(&self, index: usize, status: &str) {
        (**self).process_exited(index, status);
    }

    fn task_restarted(&self, task: usize, reason: &str) {
        (**self).task_restarted(task, reason);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_starting",
            "starting component bootstrap"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_succeeded",
            component = %config.component(),
            name = config.component_name(),
            version = config.component_version(),
            socket = %config.socket(),
            processes = config.processes(),
            workers = config.workers(),
            log_filter = %config.log_filter(),
            log_format = ?config.log_format(),
            "component bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "bootstrap_failed",
            error = %error,
            "component bootstrap failed"
        );
    }

    fn server_ready(&self, endpoint: &SocketEndpoint) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "server_ready",
            endpoint = %endpoint,
            "proxy listening"
        );
    }

    fn server_stopped(&self, endpoint: &SocketEndpoint) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "server_stopped",
            endpoint = %endpoint,
            "proxy stopped"
        );
    }

    fn process_spawned(&self, index: usize, pid: Option<u32>) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "process_spawned",
            process = index,
            pid = ?pid,
            "worker process started"
        );
    }

    fn process_exited(&self, index: usize, status: &str) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "process_exited",
            process = index,
            status,
            "worker process exited"
        );
    }

    fn task_restarted(&self, task: usize, reason: &str) {
        tracing::warn!(
            target: HEALTH_TARGET,
            event = "task_restarted",
            task,
            reason,
            "worker task restarted"
        );
    }
}
