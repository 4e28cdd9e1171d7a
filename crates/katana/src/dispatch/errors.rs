//! Error types for command dispatch failures.

use katana_payload::CodecError;
use thiserror::Error;

/// Errors surfaced while resolving or running a command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The caller scope has no registered handlers.
    #[error("Invalid command scope: \"{scope}\"")]
    InvalidCommandScope {
        /// Scope named by the command.
        scope: String,
    },
    /// The scope is known but the command name is not registered under it.
    #[error("Invalid component command {scope}:{name}")]
    InvalidCommand {
        /// Scope named by the command.
        scope: String,
        /// Command name.
        name: String,
    },
    /// The command bytes could not be decoded.
    #[error("Invalid command payload")]
    InvalidCommandPayload {
        /// Decoder failure.
        #[source]
        source: CodecError,
    },
    /// The handler failed.
    #[error("Operation failed")]
    Failed {
        /// Handler message.
        reason: String,
    },
}

impl CommandError {
    /// Reports whether the error comes from handler resolution.
    ///
    /// Dispatch errors propagate to callers unchanged; everything else is
    /// collapsed into [`CommandError::Failed`].
    #[must_use]
    pub const fn is_dispatch_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidCommandScope { .. } | Self::InvalidCommand { .. }
        )
    }

    pub(crate) fn invalid_scope(scope: &str) -> Self {
        Self::InvalidCommandScope {
            scope: scope.to_owned(),
        }
    }

    pub(crate) fn invalid_command(scope: &str, name: &str) -> Self {
        Self::InvalidCommand {
            scope: scope.to_owned(),
            name: name.to_owned(),
        }
    }
}
