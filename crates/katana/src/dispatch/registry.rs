//! Scope and name keyed handler registry.

use std::collections::HashMap;
use std::sync::Arc;

use katana_payload::CommandPayload;

use super::errors::CommandError;

/// Maps `scope -> name -> handler`.
///
/// Registration happens before the registry is shared; lookups afterwards are
/// read-only and need no locking.
pub struct CommandRegistry<H: ?Sized> {
    scopes: HashMap<String, HashMap<String, Arc<H>>>,
}

impl<H: ?Sized> Default for CommandRegistry<H> {
    fn default() -> Self {
        Self {
            scopes: HashMap::new(),
        }
    }
}

impl<H: ?Sized> CommandRegistry<H> {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `name` under `scope`, replacing any previous one.
    pub fn register_handler(&mut self, scope: &str, name: &str, handler: Arc<H>) {
        self.scopes
            .entry(scope.to_owned())
            .or_default()
            .insert(name.to_owned(), handler);
    }

    /// Registers one handler for `name` under every scope in `scopes`.
    pub fn register_shared_handler<'s, I>(&mut self, scopes: I, name: &str, handler: &Arc<H>)
    where
        I: IntoIterator<Item = &'s str>,
    {
        for scope in scopes {
            self.register_handler(scope, name, Arc::clone(handler));
        }
    }

    /// Reports whether the command names a registered scope and handler.
    #[must_use]
    pub fn is_valid_command(&self, command: &CommandPayload) -> bool {
        self.get_handler(command.scope(), command.name()).is_ok()
    }

    /// Resolves the handler for `name` under `scope`.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::InvalidCommandScope`] for an unknown scope and
    /// [`CommandError::InvalidCommand`] for an unknown name in a known scope.
    pub fn get_handler(&self, scope: &str, name: &str) -> Result<&Arc<H>, CommandError> {
        let handlers = self
            .scopes
            .get(scope)
            .ok_or_else(|| CommandError::invalid_scope(scope))?;
        handlers
            .get(name)
            .ok_or_else(|| CommandError::invalid_command(scope, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    type Label = &'static str;

    #[fixture]
    fn registry() -> CommandRegistry<Label> {
        let mut registry = CommandRegistry::new();
        registry.register_handler("gateway", "ping", Arc::new("ping"));
        registry
    }

    #[rstest]
    fn unknown_scopes_and_names_are_distinct(registry: CommandRegistry<Label>) {
        assert!(matches!(
            registry.get_handler("other", "ping"),
            Err(CommandError::InvalidCommandScope { scope }) if scope == "other"
        ));
        assert!(matches!(
            registry.get_handler("gateway", "missing"),
            Err(CommandError::InvalidCommand { name, .. }) if name == "missing"
        ));
    }

    #[rstest]
    fn last_registration_wins(mut registry: CommandRegistry<Label>) {
        registry.register_handler("gateway", "ping", Arc::new("pong"));
        let handler = registry.get_handler("gateway", "ping").expect("handler");
        assert_eq!(**handler, "pong");
    }

    #[rstest]
    fn shared_handlers_cover_every_scope(mut registry: CommandRegistry<Label>) {
        registry.register_shared_handler(["gateway", "service"], "status", &Arc::new("status"));
        for scope in ["gateway", "service"] {
            assert!(registry.get_handler(scope, "status").is_ok());
        }
        assert!(registry.get_handler("gateway", "ping").is_ok());
    }

    #[rstest]
    #[case("gateway", "ping", true)]
    #[case("gateway", "pong", false)]
    #[case("MISSING", "ping", false)]
    fn validity_follows_registration(
        registry: CommandRegistry<Label>,
        #[case] scope: &str,
        #[case] name: &str,
        #[case] expected: bool,
    ) {
        let command = CommandPayload::new(name, scope, None);
        assert_eq!(registry.is_valid_command(&command), expected);
    }
}
