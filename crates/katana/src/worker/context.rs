//! State shared by the worker tasks of one process.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::error;

use super::WORKER_TARGET;
use crate::api::{Api, ComponentInfo};
use crate::callback::{HandlerError, HandlerPool, HandlerResult};
use crate::schema::SchemaRegistry;

/// Callback told about every handler failure.
pub type ErrorCallback = Arc<dyn Fn(&HandlerError) -> HandlerResult + Send + Sync>;

/// State shared by the worker tasks of one process.
#[derive(Clone)]
pub struct WorkerContext {
    info: Arc<ComponentInfo>,
    schemas: Arc<SchemaRegistry>,
    pool: HandlerPool,
    on_error: Option<ErrorCallback>,
}

impl fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerContext")
            .field("info", &self.info)
            .field("pool", &self.pool)
            .field("on_error", &self.on_error.is_some())
            .finish_non_exhaustive()
    }
}

impl WorkerContext {
    /// Context for `info` with an empty schema registry.
    #[must_use]
    pub fn new(info: ComponentInfo, pool: HandlerPool) -> Self {
        Self {
            info: Arc::new(info),
            schemas: Arc::new(SchemaRegistry::new()),
            pool,
            on_error: None,
        }
    }

    /// Registers the callback told about handler failures.
    #[must_use]
    pub fn with_error_callback(mut self, callback: ErrorCallback) -> Self {
        self.on_error = Some(callback);
        self
    }

    /// The running component.
    #[must_use]
    pub fn info(&self) -> &ComponentInfo {
        &self.info
    }

    /// Schemas received from the gateway.
    #[must_use]
    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    /// Pool running blocking callbacks.
    #[must_use]
    pub const fn pool(&self) -> &HandlerPool {
        &self.pool
    }

    /// A fresh API view for one request.
    #[must_use]
    pub fn api(&self) -> Api {
        Api::new(Arc::clone(&self.info), Arc::clone(&self.schemas))
    }

    /// Logs a handler failure and forwards it to the error callback.
    ///
    /// Failures and panics of the callback itself are logged and dropped.
    pub fn report_error(&self, action: &str, failure: &HandlerError) {
        error!(
            target: WORKER_TARGET,
            component = %self.info.name,
            version = %self.info.version,
            action,
            error = %failure,
            "handler failed"
        );
        let Some(callback) = &self.on_error else {
            return;
        };
        match panic::catch_unwind(AssertUnwindSafe(|| callback(failure))) {
            Ok(Ok(())) => {}
            Ok(Err(callback_error)) => error!(
                target: WORKER_TARGET,
                action,
                error = %callback_error,
                "error callback failed"
            ),
            Err(_) => error!(
                target: WORKER_TARGET,
                action,
                "error callback panicked"
            ),
        }
    }
}
