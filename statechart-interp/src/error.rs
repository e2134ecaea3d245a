//! Runtime error types.

use statechart_core::{BoxError, ConfigurationError, DefinitionError};
use thiserror::Error;

/// Errors from the interpreter.
///
/// Only failures modeled in the statechart itself (service error
/// reactions, guarded fallbacks) are recovered by the machine; everything
/// here is surfaced to the embedding application.
#[derive(Debug, Error)]
pub enum InterpreterError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error("guard evaluation failed on '{node}' for event '{event}': {source}")]
    Guard {
        node: String,
        event: String,
        #[source]
        source: BoxError,
    },

    #[error("action failed during {phase} of '{node}': {source}")]
    Action {
        node: String,
        /// "entry", "exit", or "transition".
        phase: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("unhandled failure of service '{service}': {reason}")]
    UnhandledServiceFailure { service: String, reason: String },

    #[error("interpreter has not been started")]
    NotStarted,

    #[error("interpreter was already started")]
    AlreadyStarted,

    #[error("no pending services or timers to wait for")]
    NoPendingWork,

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}
