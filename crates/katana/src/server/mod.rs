//! Front-door proxy between clients and worker processes.
//!
//! The proxy binds the configured front door plus an internal worker
//! endpoint that only worker tasks connect to, and relays each request to
//! the next idle worker connection.

mod errors;
mod listener;
mod proxy;

pub use self::errors::ServerError;
pub use self::proxy::{Proxy, QUEUE_DEPTH};

const PROXY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::proxy");
