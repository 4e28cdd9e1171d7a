//! Objects handed to user callbacks.
//!
//! Services receive an [`Action`] per command and middlewares receive a
//! [`Request`] or a [`Response`]. All of them share an [`Api`] describing the
//! running component and the schemas received from the platform.

mod action;
mod base;
mod http;
mod request;
mod response;
mod transport;

pub(crate) use action::PATH_DELIMITER;
pub use action::{Action, ActionError};
pub use base::{Api, ComponentInfo};
pub use http::{DEFAULT_PROTOCOL_VERSION, HttpRequest, HttpResponse, MultiMap};
pub use request::Request;
pub use response::Response;
pub use transport::Transport;

/// Tracing target for API objects.
pub(crate) const API_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::api");
