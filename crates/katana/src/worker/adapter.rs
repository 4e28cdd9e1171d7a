//! Component flavours: how a command becomes a callback call and a reply.

use std::collections::HashMap;

use futures::future::BoxFuture;
use katana_payload::{
    CommandPayload, CommandResultPayload, Entity, ErrorPayload, Payload, PathSpec,
    ResponsePayload, TransportPayload, Value, nomap,
};
use tracing::error;

use super::meta::ReplyMeta;
use super::{INTERNAL_FAILURE, WORKER_TARGET, WorkerContext};
use crate::api::{Action, PATH_DELIMITER, Request, Response};
use crate::callback::{Callback, HandlerError, Invocation};

/// Action name the gateway uses for request middlewares.
pub const REQUEST_ACTION: &str = "request";
/// Action name the gateway uses for response middlewares.
pub const RESPONSE_ACTION: &str = "response";

const REQUEST_TYPE: i64 = 1;
const RESPONSE_TYPE: i64 = 2;
const FAILURE_STATUS: &str = "500 Internal Server Error";

/// A reply ready to be packed.
#[derive(Debug, Clone)]
pub struct Reply {
    /// Flags sent ahead of the payload.
    pub meta: ReplyMeta,
    /// The `command_reply` payload.
    pub payload: Payload,
}

impl Reply {
    /// A reply carrying `result` for command `name`.
    #[must_use]
    pub fn new(name: &str, result: Payload, meta: ReplyMeta) -> Self {
        Self {
            meta,
            payload: CommandResultPayload::new(name, result.into_value()).entity(),
        }
    }

    /// A reply carrying only an error.
    #[must_use]
    pub fn failure(name: &str, message: &str) -> Self {
        let error = ErrorPayload::with_message(message).materialise().entity();
        Self::new(name, error, ReplyMeta::none())
    }
}

/// What a request middleware decided.
#[derive(Debug, Clone, Default)]
pub enum RequestOutcome {
    /// Forward the (possibly retargeted) request to the service.
    #[default]
    Continue,
    /// Answer the caller directly.
    Respond(Response),
}

/// Turns commands into callback invocations for one component flavour.
pub trait ComponentAdapter: Send + Sync {
    /// Reports whether a callback handles `action`.
    fn has_action(&self, action: &str) -> bool;

    /// Runs the callback for `action` and builds the reply.
    fn process<'a>(
        &'a self,
        context: &'a WorkerContext,
        action: &'a str,
        command: CommandPayload,
    ) -> BoxFuture<'a, Reply>;
}

/// Adapter for service components: one callback per action.
#[derive(Debug, Clone, Default)]
pub struct ServiceAdapter {
    actions: HashMap<String, Callback<Action>>,
}

impl ServiceAdapter {
    /// An adapter with no actions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` for `action`; the last registration wins.
    pub fn register(&mut self, action: &str, callback: Callback<Action>) -> &mut Self {
        self.actions.insert(action.to_owned(), callback);
        self
    }

    /// Names of the registered actions, sorted.
    #[must_use]
    pub fn actions(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    async fn run(&self, context: &WorkerContext, name: &str, command: CommandPayload) -> Reply {
        let Some(callback) = self.actions.get(name) else {
            return Reply::failure(name, INTERNAL_FAILURE);
        };
        let arguments = Payload::from_map(command.arguments());
        let transport = TransportPayload::from_payload(Payload::from_map(
            arguments.get_map("transport").cloned().unwrap_or_default(),
        ));
        let params = arguments
            .get_opt("params")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let action = Action::new(context.api(), name, &params, transport.clone());

        let Invocation { input, result } = callback.invoke(action, context.pool()).await;
        let (mut transport, return_value) = input.map_or((transport, None), Action::into_parts);
        let return_value = match result {
            Ok(()) => return_value,
            Err(failure) => {
                context.report_error(name, &failure);
                if let Err(source) = record_failure(context, &mut transport, &failure) {
                    error!(
                        target: WORKER_TARGET,
                        action = name,
                        error = %source,
                        "cannot record handler failure in the transport"
                    );
                    return Reply::failure(name, failure.message());
                }
                None
            }
        };

        let info = context.info();
        let meta = ReplyMeta::inspect(&transport, &info.name, &info.version);
        let mut result = transport.entity();
        if let Some(value) = return_value
            && let Err(source) = result.set("return", value)
        {
            error!(
                target: WORKER_TARGET,
                action = name,
                error = %source,
                "cannot attach the return value"
            );
            return Reply::failure(name, INTERNAL_FAILURE);
        }
        Reply::new(command.name(), result, meta)
    }
}

fn record_failure(
    context: &WorkerContext,
    transport: &mut TransportPayload,
    failure: &HandlerError,
) -> Result<(), katana_payload::PayloadError> {
    let info = context.info();
    let path = format!(
        "errors|{}|{}|{}",
        transport.public_address(),
        nomap(&info.name),
        info.version
    );
    let error = ErrorPayload::with_message(failure.message()).materialise();
    transport.push(
        PathSpec::with_delimiter(&path, PATH_DELIMITER),
        error.into_payload().into_value(),
    )?;
    Ok(())
}

impl ComponentAdapter for ServiceAdapter {
    fn has_action(&self, action: &str) -> bool {
        self.actions.contains_key(action)
    }

    fn process<'a>(
        &'a self,
        context: &'a WorkerContext,
        action: &'a str,
        command: CommandPayload,
    ) -> BoxFuture<'a, Reply> {
        Box::pin(self.run(context, action, command))
    }
}

/// Adapter for middleware components.
#[derive(Debug, Clone, Default)]
pub struct MiddlewareAdapter {
    request: Option<Callback<Request, RequestOutcome>>,
    response: Option<Callback<Response>>,
}

fn failure_response(version: &str, message: &str) -> Payload {
    ResponsePayload::new(Some(version), Some(FAILURE_STATUS), Some(message), None).entity()
}

impl MiddlewareAdapter {
    /// An adapter with no callbacks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the request callback.
    pub fn set_request(&mut self, callback: Callback<Request, RequestOutcome>) -> &mut Self {
        self.request = Some(callback);
        self
    }

    /// Sets the response callback.
    pub fn set_response(&mut self, callback: Callback<Response>) -> &mut Self {
        self.response = Some(callback);
        self
    }

    async fn run(&self, context: &WorkerContext, name: &str, command: CommandPayload) -> Reply {
        let arguments = Payload::from_map(command.arguments());
        let kind = arguments.get_opt("type").and_then(Value::as_i64);
        let result = match (kind, &self.request, &self.response) {
            (Some(REQUEST_TYPE), Some(callback), _) => {
                on_request(context, name, callback, &arguments).await
            }
            (Some(RESPONSE_TYPE), _, Some(callback)) => {
                on_response(context, name, callback, &arguments).await
            }
            _ => {
                error!(
                    target: WORKER_TARGET,
                    action = name,
                    kind = ?kind,
                    "unsupported middleware command"
                );
                return Reply::failure(name, INTERNAL_FAILURE);
            }
        };
        Reply::new(command.name(), result, ReplyMeta::none())
    }
}

async fn on_request(
    context: &WorkerContext,
    name: &str,
    callback: &Callback<Request, RequestOutcome>,
    arguments: &Payload,
) -> Payload {
    let request = Request::from_arguments(context.api(), arguments);
    let version = request.http_request().protocol_version().to_owned();
    let Invocation { input, result } = callback.invoke(request, context.pool()).await;
    match (input, result) {
        (_, Ok(RequestOutcome::Respond(response))) => response.into_reply(),
        (Some(request), Ok(RequestOutcome::Continue)) => request.into_reply(),
        (None, Ok(RequestOutcome::Continue)) => failure_response(&version, INTERNAL_FAILURE),
        (_, Err(failure)) => {
            context.report_error(name, &failure);
            failure_response(&version, failure.message())
        }
    }
}

async fn on_response(
    context: &WorkerContext,
    name: &str,
    callback: &Callback<Response>,
    arguments: &Payload,
) -> Payload {
    let response = Response::from_arguments(context.api(), arguments);
    let version = response.http_response().protocol_version().to_owned();
    let Invocation { input, result } = callback.invoke(response, context.pool()).await;
    match (input, result) {
        (Some(response), Ok(())) => response.into_reply(),
        (None, Ok(())) => failure_response(&version, INTERNAL_FAILURE),
        (_, Err(failure)) => {
            context.report_error(name, &failure);
            failure_response(&version, failure.message())
        }
    }
}

impl ComponentAdapter for MiddlewareAdapter {
    fn has_action(&self, action: &str) -> bool {
        match action {
            REQUEST_ACTION => self.request.is_some(),
            RESPONSE_ACTION => self.response.is_some(),
            _ => false,
        }
    }

    fn process<'a>(
        &'a self,
        context: &'a WorkerContext,
        action: &'a str,
        command: CommandPayload,
    ) -> BoxFuture<'a, Reply> {
        Box::pin(self.run(context, action, command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ComponentInfo, Transport};
    use crate::callback::{HandlerPool, HandlerResult};
    use katana_payload::Map;
    use rstest::{fixture, rstest};
    use serde_json::json;

    #[fixture]
    fn context() -> WorkerContext {
        let info = ComponentInfo {
            name: "users".to_owned(),
            version: "1.0.0".to_owned(),
            ..ComponentInfo::default()
        };
        WorkerContext::new(info, HandlerPool::new(2))
    }

    fn service_command(name: &str) -> CommandPayload {
        let mut arguments = Map::new();
        arguments.insert(
            "transport".to_owned(),
            json!({"meta": {"id": "req-1", "gateway": ["ktp://in", "ktp://out"]}}),
        );
        arguments.insert(
            "params".to_owned(),
            json!([{"name": "id", "value": 7, "type": "integer"}]),
        );
        CommandPayload::new(name, "gateway", Some(arguments))
    }

    fn result_of(reply: &Reply) -> Payload {
        Payload::from_map(
            reply
                .payload
                .get_map("command_reply/result")
                .cloned()
                .expect("result"),
        )
    }

    fn transport_of(reply: &Reply) -> Transport {
        let result = result_of(reply);
        Transport::from_payload(Payload::from_map(
            result.get_map("transport").cloned().expect("transport"),
        ))
    }

    fn read_user(action: &mut Action) -> HandlerResult {
        let id = action.param("id").value()?;
        let mut entity = Map::new();
        entity.insert("id".to_owned(), id);
        action.set_entity(entity)?;
        Ok(())
    }

    #[rstest]
    #[tokio::test]
    async fn services_reply_with_the_transport(context: WorkerContext) {
        let mut adapter = ServiceAdapter::new();
        adapter.register("read", Callback::blocking(read_user));
        assert!(adapter.has_action("read"));

        let reply = adapter.process(&context, "read", service_command("read")).await;
        assert!(reply.meta.is_empty());
        let transport = transport_of(&reply);
        assert_eq!(transport.request_id(), "req-1");
        assert_eq!(
            transport.data(Some("ktp://out"), Some("users"), Some("1.0.0")),
            json!({"read": [{"id": 7}]})
        );
    }

    #[rstest]
    #[tokio::test]
    async fn handler_failures_land_in_the_transport_errors(context: WorkerContext) {
        let mut adapter = ServiceAdapter::new();
        adapter.register(
            "read",
            Callback::cooperative(|action: &mut Action| {
                Box::pin(async move {
                    action.set_entity(Map::new())?;
                    Err::<(), _>(HandlerError::new("boom"))
                })
            }),
        );
        let reply = adapter.process(&context, "read", service_command("read")).await;
        let transport = transport_of(&reply);

        let errors = transport.errors(Some("ktp://out"));
        let recorded = errors
            .pointer("/users/1.0.0/0")
            .cloned()
            .expect("recorded error");
        let error = ErrorPayload::from_payload(Payload::from_value(recorded));
        assert_eq!(error.message(), "boom");
        assert_eq!(
            transport.data(Some("ktp://out"), Some("users"), Some("1.0.0")),
            json!({"read": [{}]})
        );
    }

    fn middleware_command(arguments: serde_json::Value) -> CommandPayload {
        let serde_json::Value::Object(arguments) = arguments else {
            return CommandPayload::new("request", "gateway", None);
        };
        CommandPayload::new("request", "gateway", Some(arguments))
    }

    fn request_arguments() -> serde_json::Value {
        json!({
            "type": 1,
            "request": {"method": "GET", "url": "http://example.com/users/7", "version": "1.1"},
            "call": {"service": "users", "version": "1.0.0", "action": "read"}
        })
    }

    #[rstest]
    #[tokio::test]
    async fn request_middlewares_retarget_calls(context: WorkerContext) {
        let mut adapter = MiddlewareAdapter::new();
        adapter.set_request(Callback::blocking(|request: &mut Request| {
            request.set_action_name("list");
            Ok(RequestOutcome::Continue)
        }));
        assert!(adapter.has_action(REQUEST_ACTION));
        assert!(!adapter.has_action(RESPONSE_ACTION));

        let reply = adapter
            .process(&context, REQUEST_ACTION, middleware_command(request_arguments()))
            .await;
        let result = result_of(&reply);
        assert_eq!(result.get_str("call/action"), Some("list"));
        assert_eq!(result.get_str("call/service"), Some("users"));
    }

    #[rstest]
    #[tokio::test]
    async fn request_middlewares_may_answer_directly(context: WorkerContext) {
        let mut adapter = MiddlewareAdapter::new();
        adapter.set_request(Callback::blocking(|request: &mut Request| {
            let mut response = request.new_response(403, "Forbidden");
            response.http_response_mut().set_body("denied");
            Ok(RequestOutcome::Respond(response))
        }));
        let reply = adapter
            .process(&context, REQUEST_ACTION, middleware_command(request_arguments()))
            .await;
        let result = result_of(&reply);
        assert_eq!(result.get_str("response/status"), Some("403 Forbidden"));
        assert_eq!(result.get_str("response/body"), Some("denied"));
    }

    #[rstest]
    #[tokio::test]
    async fn failing_middlewares_answer_with_a_server_error(context: WorkerContext) {
        let mut adapter = MiddlewareAdapter::new();
        adapter.set_request(Callback::blocking(|_: &mut Request| {
            Err(HandlerError::new("no upstream"))
        }));
        let reply = adapter
            .process(&context, REQUEST_ACTION, middleware_command(request_arguments()))
            .await;
        let result = result_of(&reply);
        assert_eq!(result.get_str("response/status"), Some(FAILURE_STATUS));
        assert_eq!(result.get_str("response/body"), Some("no upstream"));
        assert_eq!(result.get_str("response/version"), Some("1.1"));
    }

    #[rstest]
    #[tokio::test]
    async fn response_middlewares_amend_the_response(context: WorkerContext) {
        let mut adapter = MiddlewareAdapter::new();
        adapter.set_response(Callback::blocking(|response: &mut Response| {
            response
                .http_response_mut()
                .set_header("X-Component", "audit");
            Ok(())
        }));
        let arguments = json!({
            "type": 2,
            "response": {"version": "1.1", "status": "200 OK", "body": "{}"},
            "transport": {"meta": {"id": "req-1"}}
        });
        let reply = adapter
            .process(&context, RESPONSE_ACTION, middleware_command(arguments))
            .await;
        let result = result_of(&reply);
        assert_eq!(result.get_str("response/status"), Some("200 OK"));
        assert_eq!(
            result.get_opt("response/headers/X-Component"),
            Some(&json!(["audit"]))
        );
    }

    #[rstest]
    #[tokio::test]
    async fn unknown_middleware_types_fail(context: WorkerContext) {
        let mut adapter = MiddlewareAdapter::new();
        adapter.set_request(Callback::blocking(|_: &mut Request| Ok(RequestOutcome::Continue)));
        let reply = adapter
            .process(&context, REQUEST_ACTION, middleware_command(json!({"type": 9})))
            .await;
        let error = ErrorPayload::from_payload(Payload::from_map(
            result_of(&reply).get_map("error").cloned().expect("error"),
        ));
        assert_eq!(error.message(), INTERNAL_FAILURE);
    }
}
