//! Component runners: the builders a component binary configures and runs.
//!
//! [`Service`] and [`Middleware`] collect callbacks, then `run` bootstraps
//! the configuration and either serves as the parent process (proxy plus
//! worker process pool) or, when the worker marker is present, as one worker
//! process.

use std::collections::BTreeMap;
use std::env;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use futures::future::BoxFuture;
use katana_config::Config;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::api::{Action, Api, ComponentInfo, Request, Response};
use crate::bootstrap::{ConfigLoader, SystemConfigLoader, bootstrap_with};
use crate::callback::{Callback, HandlerError, HandlerPool, HandlerResult};
use crate::health::{HealthReporter, StructuredHealthReporter};
use crate::process::{
    ExecProcessFactory, LaunchError, ProcessFactory, ProcessPool, SHUTDOWN_TIMEOUT,
    ShutdownSignal, SystemShutdownSignal, ThreadProcessFactory, WorkerProcess,
    inherited_endpoint, install_worker_signals, worker_marker,
};
use crate::server::{Proxy, ServerError};
use crate::worker::{
    ComponentAdapter, ErrorCallback, MiddlewareAdapter, RequestOutcome, ServiceAdapter,
    WorkerContext,
};

const RUNNER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::runner");

/// Callback run once before the component starts serving or after it stops.
pub type LifecycleCallback = Arc<dyn Fn(&Api) -> HandlerResult + Send + Sync>;

/// How the parent process starts its worker processes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProcessStrategy {
    /// Re-execute the current binary with the worker marker.
    #[default]
    Exec,
    /// Run each worker process as a thread with its own event loop.
    InProcess,
}

/// Collaborators needed to launch a component.
pub struct LaunchPlan<L, S> {
    pub loader: L,
    pub shutdown: S,
    pub reporter: Arc<dyn HealthReporter>,
    pub strategy: ProcessStrategy,
}

impl LaunchPlan<SystemConfigLoader, SystemShutdownSignal> {
    /// The production collaborators.
    #[must_use]
    pub fn system() -> Self {
        Self {
            loader: SystemConfigLoader,
            shutdown: SystemShutdownSignal::new(SHUTDOWN_TIMEOUT),
            reporter: Arc::new(StructuredHealthReporter::new()),
            strategy: ProcessStrategy::Exec,
        }
    }
}

#[derive(Clone, Default)]
struct Hooks {
    on_error: Option<ErrorCallback>,
    startup: Option<LifecycleCallback>,
    shutdown: Option<LifecycleCallback>,
    variables: BTreeMap<String, String>,
}

impl Hooks {
    fn component_info(&self, config: &Config) -> ComponentInfo {
        ComponentInfo {
            path: env::current_exe()
                .map(|path| path.display().to_string())
                .unwrap_or_default(),
            name: config.component_name().to_owned(),
            version: config.component_version().to_owned(),
            platform_version: config.platform_version().to_owned(),
            variables: self.variables.clone(),
            debug: config.debug(),
        }
    }

    fn context(&self, config: &Config) -> WorkerContext {
        let context = WorkerContext::new(
            self.component_info(config),
            HandlerPool::new(config.handler_threads()),
        );
        match &self.on_error {
            Some(callback) => context.with_error_callback(Arc::clone(callback)),
            None => context,
        }
    }
}

fn run_lifecycle(
    stage: &'static str,
    callback: Option<&LifecycleCallback>,
    api: &Api,
) -> Result<(), LaunchError> {
    let Some(callback) = callback else {
        return Ok(());
    };
    info!(target: RUNNER_TARGET, stage, "running lifecycle callback");
    callback(api).map_err(|failure| LaunchError::Callback {
        stage,
        message: failure.message().to_owned(),
    })
}

/// Shared launch sequence for both component kinds.
struct Runner {
    adapter: Arc<dyn ComponentAdapter>,
    hooks: Hooks,
}

impl Runner {
    fn run<L, S>(self, plan: LaunchPlan<L, S>) -> Result<(), LaunchError>
    where
        L: ConfigLoader,
        S: ShutdownSignal,
    {
        let LaunchPlan {
            loader,
            shutdown,
            reporter,
            strategy,
        } = plan;
        let config = bootstrap_with(&loader, &reporter)?.into_config();
        match worker_marker() {
            Some(index) if strategy == ProcessStrategy::Exec => {
                self.serve_worker_process(index, &config, reporter)
            }
            _ => self.serve_component(&config, &shutdown, reporter, strategy),
        }
    }

    fn serve_worker_process(
        &self,
        index: usize,
        config: &Config,
        reporter: Arc<dyn HealthReporter>,
    ) -> Result<(), LaunchError> {
        let endpoint = inherited_endpoint()?;
        let stop = Arc::new(AtomicBool::new(false));
        install_worker_signals(&stop)?;
        let context = Arc::new(self.hooks.context(config));
        WorkerProcess::new(index, endpoint, Arc::clone(&self.adapter), context, reporter)
            .with_workers(config.workers())
            .run_blocking(stop)?;
        Ok(())
    }

    fn serve_component<S: ShutdownSignal>(
        &self,
        config: &Config,
        shutdown: &S,
        reporter: Arc<dyn HealthReporter>,
        strategy: ProcessStrategy,
    ) -> Result<(), LaunchError> {
        let context = Arc::new(self.hooks.context(config));
        let api = context.api();
        run_lifecycle("startup", self.hooks.startup.as_ref(), &api)?;

        let served = self.serve(config, context, shutdown, reporter, strategy);
        if let Err(error) = &served {
            error!(target: RUNNER_TARGET, error = %error, "component stopped with an error");
        }
        let stopped = run_lifecycle("shutdown", self.hooks.shutdown.as_ref(), &api);
        served.and(stopped)
    }

    fn serve<S: ShutdownSignal>(
        &self,
        config: &Config,
        context: Arc<WorkerContext>,
        shutdown: &S,
        reporter: Arc<dyn HealthReporter>,
        strategy: ProcessStrategy,
    ) -> Result<(), LaunchError> {
        let factory: Arc<dyn ProcessFactory> = match strategy {
            ProcessStrategy::Exec => Arc::new(ExecProcessFactory::current()?),
            ProcessStrategy::InProcess => Arc::new(ThreadProcessFactory::new(
                WorkerProcess::new(
                    0,
                    config.worker_endpoint(),
                    Arc::clone(&self.adapter),
                    context,
                    Arc::clone(&reporter),
                )
                .with_workers(config.workers()),
            )),
        };
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("katana-proxy")
            .build()
            .map_err(|source| LaunchError::Runtime { source })?;
        let proxy = {
            let _entered = runtime.enter();
            Proxy::bind(config.socket(), &config.worker_endpoint())?
        };
        let front = proxy.endpoint().clone();
        let workers = proxy.worker_endpoint().clone();
        reporter.server_ready(&front);

        let cancel = CancellationToken::new();
        let relay = runtime.spawn(proxy.run(cancel.clone()));

        let mut pool = ProcessPool::new(factory, Arc::clone(&reporter));
        let outcome = pool
            .start(config.processes(), &workers)
            .map_err(LaunchError::from)
            .and_then(|()| shutdown.wait().map_err(LaunchError::from));

        pool.stop(SHUTDOWN_TIMEOUT);
        cancel.cancel();
        let relayed = runtime
            .block_on(relay)
            .map_err(|_| LaunchError::from(ServerError::TaskPanic));
        reporter.server_stopped(&front);
        outcome.and(relayed)
    }
}

/// Builder and entry point for service components.
#[derive(Clone, Default)]
pub struct Service {
    adapter: ServiceAdapter,
    hooks: Hooks,
}

impl Service {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a blocking callback for `name`, run on the handler pool.
    #[must_use]
    pub fn action<F>(mut self, name: &str, callback: F) -> Self
    where
        F: Fn(&mut Action) -> HandlerResult + Send + Sync + 'static,
    {
        self.adapter.register(name, Callback::blocking(callback));
        self
    }

    /// Registers a cooperative callback for `name`, polled on the worker task.
    #[must_use]
    pub fn cooperative_action<F>(mut self, name: &str, callback: F) -> Self
    where
        F: for<'a> Fn(&'a mut Action) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.adapter.register(name, Callback::cooperative(callback));
        self
    }

    /// Names of the registered actions.
    #[must_use]
    pub fn actions(&self) -> Vec<&str> {
        self.adapter.actions()
    }

    /// Runs the service with the production collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError`] when bootstrap, binding, the worker processes
    /// or a lifecycle callback fail.
    pub fn run(self) -> Result<(), LaunchError> {
        self.run_with(LaunchPlan::system())
    }

    /// Runs the service with injected collaborators.
    ///
    /// # Errors
    ///
    /// See [`Service::run`].
    pub fn run_with<L, S>(self, plan: LaunchPlan<L, S>) -> Result<(), LaunchError>
    where
        L: ConfigLoader,
        S: ShutdownSignal,
    {
        Runner {
            adapter: Arc::new(self.adapter),
            hooks: self.hooks,
        }
        .run(plan)
    }
}

/// Builder and entry point for middleware components.
#[derive(Clone, Default)]
pub struct Middleware {
    adapter: MiddlewareAdapter,
    hooks: Hooks,
}

impl Middleware {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the blocking request callback.
    #[must_use]
    pub fn request<F>(mut self, callback: F) -> Self
    where
        F: Fn(&mut Request) -> HandlerResult<RequestOutcome> + Send + Sync + 'static,
    {
        self.adapter.set_request(Callback::blocking(callback));
        self
    }

    /// Sets a cooperative request callback.
    #[must_use]
    pub fn cooperative_request<F>(mut self, callback: F) -> Self
    where
        F: for<'a> Fn(&'a mut Request) -> BoxFuture<'a, HandlerResult<RequestOutcome>>
            + Send
            + Sync
            + 'static,
    {
        self.adapter.set_request(Callback::cooperative(callback));
        self
    }

    /// Sets the blocking response callback.
    #[must_use]
    pub fn response<F>(mut self, callback: F) -> Self
    where
        F: Fn(&mut Response) -> HandlerResult + Send + Sync + 'static,
    {
        self.adapter.set_response(Callback::blocking(callback));
        self
    }

    /// Sets a cooperative response callback.
    #[must_use]
    pub fn cooperative_response<F>(mut self, callback: F) -> Self
    where
        F: for<'a> Fn(&'a mut Response) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.adapter.set_response(Callback::cooperative(callback));
        self
    }

    /// Runs the middleware with the production collaborators.
    ///
    /// # Errors
    ///
    /// See [`Service::run`].
    pub fn run(self) -> Result<(), LaunchError> {
        self.run_with(LaunchPlan::system())
    }

    /// Runs the middleware with injected collaborators.
    ///
    /// # Errors
    ///
    /// See [`Service::run`].
    pub fn run_with<L, S>(self, plan: LaunchPlan<L, S>) -> Result<(), LaunchError>
    where
        L: ConfigLoader,
        S: ShutdownSignal,
    {
        Runner {
            adapter: Arc::new(self.adapter),
            hooks: self.hooks,
        }
        .run(plan)
    }
}

macro_rules! common_builder_methods {
    ($component:ty) => {
        impl $component {
            /// Registers the callback told about every handler failure.
            ///
            /// Failures of the callback itself are logged and ignored.
            #[must_use]
            pub fn error<F>(mut self, callback: F) -> Self
            where
                F: Fn(&HandlerError) -> HandlerResult + Send + Sync + 'static,
            {
                self.hooks.on_error = Some(Arc::new(callback));
                self
            }

            /// Registers a callback run before serving starts.
            #[must_use]
            pub fn startup<F>(mut self, callback: F) -> Self
            where
                F: Fn(&Api) -> HandlerResult + Send + Sync + 'static,
            {
                self.hooks.startup = Some(Arc::new(callback));
                self
            }

            /// Registers a callback run after serving stopped.
            #[must_use]
            pub fn shutdown<F>(mut self, callback: F) -> Self
            where
                F: Fn(&Api) -> HandlerResult + Send + Sync + 'static,
            {
                self.hooks.shutdown = Some(Arc::new(callback));
                self
            }

            /// Sets an engine variable readable through [`Api::variable`].
            #[must_use]
            pub fn variable(mut self, name: &str, value: &str) -> Self {
                self.hooks.variables.insert(name.to_owned(), value.to_owned());
                self
            }
        }
    };
}

common_builder_methods!(Service);
common_builder_methods!(Middleware);
