//! Typed constructors for the payloads exchanged with the platform.
//!
//! Each wrapper derefs to [`Payload`]. Most know the entity name they are
//! wrapped under on the wire (`{"error": {...}}`, `{"command_reply": {...}}`);
//! a [`CommandPayload`] travels bare.

use std::ops::{Deref, DerefMut};

use serde_json::{Value, json};
use time::OffsetDateTime;

use crate::Map;
use crate::error::PayloadError;
use crate::payload::Payload;

/// Default error message.
pub const DEFAULT_ERROR_MESSAGE: &str = "Unknown error";

/// Default error status line.
pub const DEFAULT_ERROR_STATUS: &str = "500 Internal Server Error";

/// Sentinel used when a command omits its scope or name.
pub const MISSING: &str = "MISSING";

/// Formats a timestamp the way the platform expects in `meta/datetime`.
#[must_use]
pub fn date_to_string(datetime: OffsetDateTime) -> String {
    let utc = datetime.to_offset(time::UtcOffset::UTC);
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:06}+00:00",
        utc.year(),
        u8::from(utc.month()),
        utc.day(),
        utc.hour(),
        utc.minute(),
        utc.second(),
        utc.microsecond(),
    )
}

/// A payload with a fixed entity name.
pub trait Entity: Sized {
    /// Top-level key the payload is wrapped under.
    const NAME: &'static str;

    /// Releases the inner payload.
    fn into_payload(self) -> Payload;

    /// Wraps the payload under [`Entity::NAME`].
    fn entity(self) -> Payload {
        self.into_payload().entity(Self::NAME)
    }
}

macro_rules! payload_wrapper {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default)]
        pub struct $name(Payload);

        impl Deref for $name {
            type Target = Payload;

            fn deref(&self) -> &Payload {
                &self.0
            }
        }

        impl DerefMut for $name {
            fn deref_mut(&mut self) -> &mut Payload {
                &mut self.0
            }
        }

        impl From<$name> for Payload {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

macro_rules! entity_payload {
    ($(#[$meta:meta])* $name:ident, $entity:literal) => {
        payload_wrapper!($(#[$meta])* $name);

        impl Entity for $name {
            const NAME: &'static str = $entity;

            fn into_payload(self) -> Payload {
                self.0
            }
        }
    };
}

entity_payload!(
    /// Error details returned to callers.
    ErrorPayload,
    "error"
);
payload_wrapper!(
    /// A command request envelope with `meta` and `command` regions.
    ///
    /// The envelope is already in wire form: it is packed as is, never
    /// wrapped under an entity name.
    CommandPayload
);
entity_payload!(
    /// A command reply carrying the command name and its result.
    CommandResultPayload,
    "command_reply"
);
entity_payload!(
    /// Request metadata.
    MetaPayload,
    "meta"
);
entity_payload!(
    /// HTTP request data forwarded by the gateway.
    RequestPayload,
    "request"
);
entity_payload!(
    /// The service call a request middleware resolved.
    ServiceCallPayload,
    "call"
);
entity_payload!(
    /// An HTTP response produced by a middleware.
    ResponsePayload,
    "response"
);
entity_payload!(
    /// The per-request accumulator services contribute to.
    TransportPayload,
    "transport"
);

/// Top-level Transport regions that default to empty mappings.
pub const TRANSPORT_REGIONS: [&str; 8] = [
    "body",
    "files",
    "data",
    "relations",
    "links",
    "calls",
    "transactions",
    "errors",
];

impl ErrorPayload {
    /// Builds an error, leaving unset or empty fields to their defaults.
    #[must_use]
    pub fn new(message: Option<&str>, code: Option<i64>, status: Option<&str>) -> Self {
        let mut error = Self::from_payload(Payload::new());
        let data = &mut error.0;
        if let Some(message) = message.filter(|message| !message.is_empty()) {
            insert(data, "message", message);
        }
        if let Some(code) = code.filter(|code| *code != 0) {
            insert(data, "code", code);
        }
        if let Some(status) = status.filter(|status| !status.is_empty()) {
            insert(data, "status", status);
        }
        error
    }

    /// An error with only a message.
    #[must_use]
    pub fn with_message(message: &str) -> Self {
        Self::new(Some(message), None, None)
    }

    /// Wraps a received payload, installing the error defaults.
    #[must_use]
    pub fn from_payload(mut payload: Payload) -> Self {
        payload.set_defaults([
            ("message", json!(DEFAULT_ERROR_MESSAGE)),
            ("code", json!(0)),
            ("status", json!(DEFAULT_ERROR_STATUS)),
        ]);
        Self(payload)
    }

    /// The error message.
    #[must_use]
    pub fn message(&self) -> &str {
        self.get_str("message").unwrap_or(DEFAULT_ERROR_MESSAGE)
    }

    /// The numeric error code.
    #[must_use]
    pub fn code(&self) -> i64 {
        self.get_opt("code").and_then(Value::as_i64).unwrap_or(0)
    }

    /// The status line.
    #[must_use]
    pub fn status(&self) -> &str {
        self.get_str("status").unwrap_or(DEFAULT_ERROR_STATUS)
    }

    /// The error with every default written into the data.
    ///
    /// Defaults are not serialised, so replies go through this before packing.
    #[must_use]
    pub fn materialise(self) -> Self {
        let (message, code, status) = (
            self.message().to_owned(),
            self.code(),
            self.status().to_owned(),
        );
        let mut payload = self.0;
        insert(&mut payload, "message", message);
        insert(&mut payload, "code", code);
        insert(&mut payload, "status", status);
        Self(payload)
    }
}

impl CommandPayload {
    /// Builds a command addressed to `scope`.
    #[must_use]
    pub fn new(name: &str, scope: &str, args: Option<Map>) -> Self {
        let mut command = Self::from_payload(Payload::new());
        insert(&mut command.0, "command/name", name);
        insert(&mut command.0, "meta/scope", scope);
        if let Some(args) = args.filter(|args| !args.is_empty()) {
            insert(&mut command.0, "command/arguments", Value::Object(args));
        }
        command
    }

    /// Wraps a received payload.
    #[must_use]
    pub fn from_payload(mut payload: Payload) -> Self {
        payload.set_defaults([("command/arguments", Value::Null)]);
        Self(payload)
    }

    /// Releases the envelope, ready to pack.
    #[must_use]
    pub fn into_payload(self) -> Payload {
        self.0
    }

    /// The command name, or [`MISSING`].
    #[must_use]
    pub fn name(&self) -> &str {
        self.get_str("command/name").unwrap_or(MISSING)
    }

    /// The caller scope, or [`MISSING`].
    #[must_use]
    pub fn scope(&self) -> &str {
        self.get_str("meta/scope").unwrap_or(MISSING)
    }

    /// The command arguments; empty when absent or not a mapping.
    #[must_use]
    pub fn arguments(&self) -> Map {
        self.get_map("command/arguments").cloned().unwrap_or_default()
    }
}

impl CommandResultPayload {
    /// Builds a reply for command `name`.
    #[must_use]
    pub fn new(name: &str, result: impl Into<Value>) -> Self {
        let mut reply = Payload::new();
        insert(&mut reply, "name", name);
        insert(&mut reply, "result", result.into());
        Self(reply)
    }

    /// The command name.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.get_str("name")
    }

    /// The command result.
    #[must_use]
    pub fn result(&self) -> Option<&Value> {
        self.get_opt("result")
    }
}

impl MetaPayload {
    /// Builds request metadata, stamping the current time when none is given.
    #[must_use]
    pub fn new(version: &str, request_id: &str, datetime: Option<OffsetDateTime>) -> Self {
        let mut meta = Payload::new();
        insert(&mut meta, "version", version);
        insert(&mut meta, "id", request_id);
        insert(
            &mut meta,
            "datetime",
            date_to_string(datetime.unwrap_or_else(OffsetDateTime::now_utc)),
        );
        Self(meta)
    }
}

/// Plain HTTP request fields consumed by [`RequestPayload::new`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestParts {
    /// HTTP protocol version, such as `1.1`.
    pub version: String,
    /// HTTP method.
    pub method: String,
    /// Full request URL.
    pub url: String,
    /// Raw request body.
    pub body: String,
    /// Query parameters, each mapped to a list of values.
    pub query: Map,
    /// Form parameters, each mapped to a list of values.
    pub post_data: Map,
    /// Headers, each mapped to a list of values.
    pub headers: Map,
}

impl RequestPayload {
    /// Builds request data, omitting empty collections.
    #[must_use]
    pub fn new(request: &RequestParts, files: Option<Map>) -> Self {
        let mut payload = Payload::new();
        insert(&mut payload, "version", request.version.as_str());
        insert(&mut payload, "method", request.method.as_str());
        insert(&mut payload, "url", request.url.as_str());
        insert(&mut payload, "body", request.body.as_str());
        for (path, values) in [
            ("query", &request.query),
            ("post_data", &request.post_data),
            ("headers", &request.headers),
        ] {
            if !values.is_empty() {
                insert(&mut payload, path, Value::Object(values.clone()));
            }
        }
        if let Some(files) = files.filter(|files| !files.is_empty()) {
            insert(&mut payload, "files", Value::Object(files));
        }
        Self(payload)
    }
}

impl ServiceCallPayload {
    /// Builds the call target resolved by a request middleware.
    #[must_use]
    pub fn new(service: &str, version: &str, action: &str, params: Vec<Value>) -> Self {
        let mut call = Payload::new();
        insert(&mut call, "service", service);
        insert(&mut call, "version", version);
        insert(&mut call, "action", action);
        insert(&mut call, "params", Value::Array(params));
        Self(call)
    }
}

impl ResponsePayload {
    /// Builds a response, defaulting to `1.1` and `200 OK`.
    #[must_use]
    pub fn new(
        version: Option<&str>,
        status: Option<&str>,
        body: Option<&str>,
        headers: Option<Map>,
    ) -> Self {
        let mut response = Payload::new();
        insert(&mut response, "version", version.unwrap_or("1.1"));
        insert(&mut response, "status", status.unwrap_or("200 OK"));
        insert(&mut response, "body", body.unwrap_or_default());
        if let Some(headers) = headers.filter(|headers| !headers.is_empty()) {
            insert(&mut response, "headers", Value::Object(headers));
        }
        Self(response)
    }
}

impl TransportPayload {
    /// Builds a fresh Transport for a request entering the platform.
    #[must_use]
    pub fn new(
        version: &str,
        request_id: &str,
        origin: Vec<Value>,
        datetime: Option<OffsetDateTime>,
        properties: Option<Map>,
    ) -> Self {
        let mut transport = Self::from_payload(Payload::new());
        let data = &mut transport.0;
        insert(data, "meta/version", version);
        insert(data, "meta/id", request_id);
        insert(
            data,
            "meta/datetime",
            date_to_string(datetime.unwrap_or_else(OffsetDateTime::now_utc)),
        );
        insert(data, "meta/origin", Value::Array(origin));
        insert(data, "meta/level", 1);
        if let Some(properties) = properties.filter(|properties| !properties.is_empty()) {
            insert(data, "meta/properties", Value::Object(properties));
        }
        transport
    }

    /// Wraps caller-supplied Transport data, defaulting every region to empty.
    #[must_use]
    pub fn from_payload(mut payload: Payload) -> Self {
        payload.set_defaults(
            TRANSPORT_REGIONS
                .iter()
                .map(|region| (*region, Value::Object(Map::new()))),
        );
        Self(payload)
    }

    /// Public address of the gateway that accepted the request.
    ///
    /// Read from the second element of `meta/gateway`; empty when absent.
    #[must_use]
    pub fn public_address(&self) -> &str {
        self.get_opt("meta/gateway")
            .and_then(Value::as_array)
            .and_then(|gateway| gateway.get(1))
            .and_then(Value::as_str)
            .unwrap_or_default()
    }
}

/// Writes a single-segment or nested path known to be writable.
///
/// Fresh payloads only hold mappings along these paths, so the write cannot
/// hit a scalar; a failure is logged rather than surfaced.
pub(crate) fn insert(payload: &mut Payload, path: &str, value: impl Into<Value>) {
    if let Err(error) = payload.set(path, value) {
        log_write_failure(path, &error);
    }
}

fn log_write_failure(path: &str, error: &PayloadError) {
    tracing::error!(
        target: concat!(env!("CARGO_PKG_NAME"), "::protocol"),
        path,
        %error,
        "failed to write protocol field"
    );
}
