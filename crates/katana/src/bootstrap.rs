//! Component bootstrap: configuration, telemetry and socket preparation.

use std::sync::Arc;

use katana_config::{Config, ConfigError, SocketPreparationError};
use katana_payload::Mappings;
use ortho_config::{OrthoConfig, OrthoError};
use thiserror::Error;

use crate::health::HealthReporter;
use crate::telemetry::{self, TelemetryError, TelemetryHandle};

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the component configuration.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that delegates to [`Config::load`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Loader handing out a configuration built in code.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader(pub Config);

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.0.clone())
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("failed to load configuration: {source}")]
    Configuration {
        #[source]
        source: Arc<OrthoError>,
    },
    #[error("invalid configuration: {source}")]
    Invalid {
        #[source]
        source: ConfigError,
    },
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        #[source]
        source: TelemetryError,
    },
    #[error("failed to prepare component socket: {source}")]
    Socket {
        #[source]
        source: SocketPreparationError,
    },
}

/// Result of a successful bootstrap.
#[derive(Debug, Clone)]
pub struct Bootstrapped {
    config: Config,
    telemetry: TelemetryHandle,
}

impl Bootstrapped {
    /// The validated configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Consumes the bootstrap result, yielding the configuration.
    #[must_use]
    pub fn into_config(self) -> Config {
        self.config
    }

    #[must_use]
    pub fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }
}

fn fail<T>(reporter: &dyn HealthReporter, error: BootstrapError) -> Result<T, BootstrapError> {
    reporter.bootstrap_failed(&error);
    Err(error)
}

/// Bootstraps a component using the supplied collaborators.
///
/// Steps run in order: load, validate, install telemetry, select the field
/// name table, then prepare the socket directory. The first failure is
/// reported and returned.
///
/// # Errors
///
/// Returns the [`BootstrapError`] of the first step that failed.
pub fn bootstrap_with(
    loader: &dyn ConfigLoader,
    reporter: &dyn HealthReporter,
) -> Result<Bootstrapped, BootstrapError> {
    reporter.bootstrap_starting();

    let config = match loader.load() {
        Ok(config) => config,
        Err(source) => return fail(reporter, BootstrapError::Configuration { source }),
    };

    if let Err(source) = config.validate() {
        return fail(reporter, BootstrapError::Invalid { source });
    }

    let telemetry = match telemetry::initialise(&config) {
        Ok(handle) => handle,
        Err(source) => return fail(reporter, BootstrapError::Telemetry { source }),
    };

    Mappings::set_compact_names(config.compact_names());

    if let Err(source) = config.socket().prepare_filesystem() {
        return fail(reporter, BootstrapError::Socket { source });
    }

    reporter.bootstrap_succeeded(&config);
    Ok(Bootstrapped { config, telemetry })
}

#[cfg(test)]
mod tests {
    use super::*;
    use katana_config::SocketEndpoint;
    use mockall::mock;
    use mockall::predicate::always;
    use tempfile::tempdir;

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

    #[test]
    fn unnamed_components_fail_validation() {
        let mut reporter = MockReporter::new();
        reporter.expect_bootstrap_starting().times(1).return_const(());
        reporter
            .expect_bootstrap_failed()
            .withf(|error| matches!(error, BootstrapError::Invalid { .. }))
            .times(1)
            .return_const(());
        reporter.expect_bootstrap_succeeded().never();

        let loader = StaticConfigLoader(Config::default());
        let error = bootstrap_with(&loader, &reporter).expect_err("missing name");
        assert!(matches!(
            error,
            BootstrapError::Invalid {
                source: ConfigError::MissingName
            }
        ));
    }

    #[test]
    fn named_components_bootstrap() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("nested").join("users.sock");
        let config = Config {
            component_name: "users".to_owned(),
            component_version: "1.0.0".to_owned(),
            socket: SocketEndpoint::unix(path.to_str().expect("utf8 path")),
            ..Config::default()
        };

        let mut reporter = MockReporter::new();
        reporter.expect_bootstrap_starting().times(1).return_const(());
        reporter
            .expect_bootstrap_succeeded()
            .with(always())
            .times(1)
            .return_const(());
        reporter.expect_bootstrap_failed().never();

        let bootstrapped =
            bootstrap_with(&StaticConfigLoader(config), &reporter).expect("bootstrap");
        assert_eq!(bootstrapped.config().component_name(), "users");
        assert!(dir.path().join("nested").is_dir());
    }
}
