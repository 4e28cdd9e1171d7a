//! Command dispatch keyed by caller scope and command name.
//!
//! [`CommandsManager`] runs handlers synchronously while
//! [`AsyncCommandsManager`] awaits them, letting the worker task suspend while
//! a handler waits on I/O. Both unpack the command envelope, resolve the
//! handler, and wrap its result in a `command_reply`.

mod errors;
mod registry;

use std::sync::Arc;

use futures::future::BoxFuture;
use katana_payload::{CommandPayload, CommandResultPayload, Payload, Value, unpack};
use tracing::{debug, warn};

use crate::callback::HandlerResult;

pub use errors::CommandError;
pub use registry::CommandRegistry;

/// Tracing target for dispatch operations.
pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

/// Synchronous command handler.
pub trait CommandHandler: Send + Sync {
    /// Runs the command with its decoded arguments.
    fn handle(&self, arguments: &Payload) -> HandlerResult<Value>;
}

impl<F> CommandHandler for F
where
    F: Fn(&Payload) -> HandlerResult<Value> + Send + Sync,
{
    fn handle(&self, arguments: &Payload) -> HandlerResult<Value> {
        self(arguments)
    }
}

/// Command handler that may suspend.
pub trait AsyncCommandHandler: Send + Sync {
    /// Runs the command with its decoded arguments.
    fn handle<'a>(&'a self, arguments: &'a Payload) -> BoxFuture<'a, HandlerResult<Value>>;
}

impl<F> AsyncCommandHandler for F
where
    F: for<'a> Fn(&'a Payload) -> BoxFuture<'a, HandlerResult<Value>> + Send + Sync,
{
    fn handle<'a>(&'a self, arguments: &'a Payload) -> BoxFuture<'a, HandlerResult<Value>> {
        self(arguments)
    }
}

fn prepare(payload: Payload) -> (CommandPayload, Payload) {
    let command = CommandPayload::from_payload(payload);
    let arguments = Payload::from_map(command.arguments());
    (command, arguments)
}

fn unpack_stream(stream: &[u8]) -> Result<Payload, CommandError> {
    unpack(stream).map_err(|source| {
        warn!(target: DISPATCH_TARGET, error = %source, "undecodable command stream");
        CommandError::InvalidCommandPayload { source }
    })
}

fn into_reply(
    command: &CommandPayload,
    result: HandlerResult<Value>,
) -> Result<CommandResultPayload, CommandError> {
    match result {
        Ok(value) => Ok(CommandResultPayload::new(command.name(), value)),
        Err(error) => {
            warn!(
                target: DISPATCH_TARGET,
                scope = command.scope(),
                command = command.name(),
                error = %error,
                "command handler failed"
            );
            Err(CommandError::Failed {
                reason: error.message().to_owned(),
            })
        }
    }
}

/// Dispatcher running synchronous handlers.
#[derive(Default)]
pub struct CommandsManager {
    registry: CommandRegistry<dyn CommandHandler>,
}

impl CommandsManager {
    /// An empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `name` under `scope`; the last registration wins.
    pub fn register_handler<H>(&mut self, scope: &str, name: &str, handler: H)
    where
        H: CommandHandler + 'static,
    {
        self.registry.register_handler(scope, name, Arc::new(handler));
    }

    /// Registers one handler under several scopes.
    pub fn register_shared_handler<'s, I, H>(&mut self, scopes: I, name: &str, handler: H)
    where
        I: IntoIterator<Item = &'s str>,
        H: CommandHandler + 'static,
    {
        let handler: Arc<dyn CommandHandler> = Arc::new(handler);
        self.registry.register_shared_handler(scopes, name, &handler);
    }

    /// Reports whether the command would resolve to a handler.
    #[must_use]
    pub fn is_valid_command(&self, command: &CommandPayload) -> bool {
        self.registry.is_valid_command(command)
    }

    /// Resolves a handler.
    ///
    /// # Errors
    ///
    /// See [`CommandRegistry::get_handler`].
    pub fn get_handler(
        &self,
        scope: &str,
        name: &str,
    ) -> Result<&Arc<dyn CommandHandler>, CommandError> {
        self.registry.get_handler(scope, name)
    }

    /// Runs the command held in `payload`.
    ///
    /// # Errors
    ///
    /// Dispatch errors propagate unchanged; handler failures become
    /// [`CommandError::Failed`].
    pub fn process_payload(&self, payload: Payload) -> Result<CommandResultPayload, CommandError> {
        let (command, arguments) = prepare(payload);
        let handler = self.get_handler(command.scope(), command.name())?;
        debug!(
            target: DISPATCH_TARGET,
            scope = command.scope(),
            command = command.name(),
            "dispatching command"
        );
        into_reply(&command, handler.handle(&arguments))
    }

    /// Decodes `stream` and runs the command it holds.
    ///
    /// # Errors
    ///
    /// Undecodable bytes yield [`CommandError::InvalidCommandPayload`]; other
    /// failures follow [`CommandsManager::process_payload`].
    pub fn process_stream(&self, stream: &[u8]) -> Result<CommandResultPayload, CommandError> {
        self.process_payload(unpack_stream(stream)?)
    }
}

/// Dispatcher awaiting asynchronous handlers.
#[derive(Default)]
pub struct AsyncCommandsManager {
    registry: CommandRegistry<dyn AsyncCommandHandler>,
}

impl AsyncCommandsManager {
    /// An empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `name` under `scope`; the last registration wins.
    pub fn register_handler<H>(&mut self, scope: &str, name: &str, handler: H)
    where
        H: AsyncCommandHandler + 'static,
    {
        self.registry.register_handler(scope, name, Arc::new(handler));
    }

    /// Registers one handler under several scopes.
    pub fn register_shared_handler<'s, I, H>(&mut self, scopes: I, name: &str, handler: H)
    where
        I: IntoIterator<Item = &'s str>,
        H: AsyncCommandHandler + 'static,
    {
        let handler: Arc<dyn AsyncCommandHandler> = Arc::new(handler);
        self.registry.register_shared_handler(scopes, name, &handler);
    }

    /// Reports whether the command would resolve to a handler.
    #[must_use]
    pub fn is_valid_command(&self, command: &CommandPayload) -> bool {
        self.registry.is_valid_command(command)
    }

    /// Resolves a handler.
    ///
    /// # Errors
    ///
    /// See [`CommandRegistry::get_handler`].
    pub fn get_handler(
        &self,
        scope: &str,
        name: &str,
    ) -> Result<&Arc<dyn AsyncCommandHandler>, CommandError> {
        self.registry.get_handler(scope, name)
    }

    /// Runs the command held in `payload`, suspending while the handler runs.
    ///
    /// # Errors
    ///
    /// Same as [`CommandsManager::process_payload`].
    pub async fn process_payload(
        &self,
        payload: Payload,
    ) -> Result<CommandResultPayload, CommandError> {
        let (command, arguments) = prepare(payload);
        let handler = self.get_handler(command.scope(), command.name())?;
        debug!(
            target: DISPATCH_TARGET,
            scope = command.scope(),
            command = command.name(),
            "dispatching command"
        );
        let result = handler.handle(&arguments).await;
        into_reply(&command, result)
    }

    /// Decodes `stream` and runs the command it holds.
    ///
    /// # Errors
    ///
    /// Same as [`CommandsManager::process_stream`].
    pub async fn process_stream(
        &self,
        stream: &[u8],
    ) -> Result<CommandResultPayload, CommandError> {
        let payload = unpack_stream(stream)?;
        self.process_payload(payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use katana_payload::{Entity, pack};
    use rstest::{fixture, rstest};
    use serde_json::json;

    use crate::callback::HandlerError;

    fn echo(arguments: &Payload) -> HandlerResult<Value> {
        Ok(arguments.clone().into_value())
    }

    fn async_echo(arguments: &Payload) -> BoxFuture<'_, HandlerResult<Value>> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            Ok(arguments.clone().into_value())
        })
    }

    fn fail(_: &Payload) -> HandlerResult<Value> {
        Err(HandlerError::new("boom"))
    }

    fn echo_command() -> Payload {
        let mut args = katana_payload::Map::new();
        args.insert("x".to_owned(), json!(1));
        CommandPayload::new("echo", "gateway", Some(args)).into_payload()
    }

    #[fixture]
    fn manager() -> CommandsManager {
        let mut manager = CommandsManager::new();
        manager.register_handler("gateway", "echo", echo);
        manager.register_handler("gateway", "fail", fail);
        manager
    }

    #[rstest]
    fn echo_round_trips_through_the_codec(manager: CommandsManager) {
        let stream = pack(&echo_command()).expect("pack command");
        let reply = manager.process_stream(&stream).expect("reply").entity();
        let decoded = katana_payload::unpack(&pack(&reply).expect("pack reply")).expect("unpack");
        assert_eq!(decoded.get("command_reply/name").expect("name"), "echo");
        assert_eq!(
            decoded.get("command_reply/result").expect("result"),
            &json!({"x": 1})
        );
    }

    #[rstest]
    fn missing_envelope_fields_fail_lookup(manager: CommandsManager) {
        let error = manager.process_payload(Payload::new()).expect_err("no scope");
        assert!(matches!(
            error,
            CommandError::InvalidCommandScope { ref scope } if scope == "MISSING"
        ));
        assert!(error.is_dispatch_error());
    }

    #[rstest]
    fn handler_failures_are_generic(manager: CommandsManager) {
        let command = CommandPayload::new("fail", "gateway", None).into_payload();
        let error = manager.process_payload(command).expect_err("handler fails");
        assert!(matches!(error, CommandError::Failed { ref reason } if reason == "boom"));
        assert!(!error.is_dispatch_error());
        assert_eq!(error.to_string(), "Operation failed");
    }

    #[rstest]
    fn undecodable_streams_are_invalid_payloads(manager: CommandsManager) {
        let error = manager.process_stream(&[0xc1]).expect_err("bad bytes");
        assert!(matches!(error, CommandError::InvalidCommandPayload { .. }));
    }

    #[tokio::test]
    async fn async_manager_awaits_handlers() {
        let mut manager = AsyncCommandsManager::new();
        manager.register_shared_handler(["gateway", "service"], "echo", async_echo);
        let stream = pack(&echo_command()).expect("pack command");
        let reply = manager.process_stream(&stream).await.expect("reply");
        assert_eq!(reply.result(), Some(&json!({"x": 1})));
        assert!(manager.is_valid_command(&CommandPayload::new("echo", "service", None)));
    }
}
