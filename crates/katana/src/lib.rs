//! Worker-side runtime for Katana platform components.
//!
//! A component is a binary that registers callbacks and calls
//! [`Service::run`] or [`Middleware::run`]. The runner loads configuration
//! through [`katana_config`], installs structured telemetry and then starts
//! two layers of concurrency:
//!
//! - the parent process binds the front door and relays every request to an
//!   internal worker endpoint ([`server`]);
//! - a fixed pool of worker processes ([`process`]) each run a supervised set
//!   of worker tasks ([`supervisor`], [`worker`]) that decode requests, run the
//!   matching callback and send back a `[meta, payload]` reply.
//!
//! Handler failures never cross the worker task boundary: they become error
//! replies and are optionally forwarded to an error callback. Blocking
//! callbacks run on a bounded pool so they never stall the event loop.
//!
//! The command dispatcher in [`dispatch`] serves scoped platform commands
//! (`gateway:ping` style) independently of the action callbacks.

pub mod api;
mod bootstrap;
pub mod callback;
pub mod dispatch;
pub mod frame;
mod health;
pub mod process;
mod runner;
pub mod schema;
pub mod server;
pub mod supervisor;
mod telemetry;
pub mod worker;

pub use api::{Action, ActionError, Api, ComponentInfo, Request, Response, Transport};
pub use bootstrap::{
    BootstrapError, Bootstrapped, ConfigLoader, StaticConfigLoader, SystemConfigLoader,
    bootstrap_with,
};
pub use callback::{Callback, HandlerError, HandlerPool, HandlerResult};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use process::LaunchError;
pub use runner::{LaunchPlan, LifecycleCallback, Middleware, ProcessStrategy, Service};
pub use telemetry::{TelemetryError, TelemetryHandle};
pub use worker::RequestOutcome;
