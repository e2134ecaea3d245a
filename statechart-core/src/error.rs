//! Construction-time errors.

use thiserror::Error;

/// Errors raised while resolving a statechart definition. All are fatal:
/// the statechart is not constructed and no execution starts.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("cannot resolve target '{target}' from state '{node}'")]
    UnresolvedTarget { node: String, target: String },

    #[error("initial child '{initial}' of compound state '{node}' is not among its children")]
    InvalidInitialChild { node: String, initial: String },

    #[error("duplicate sibling name '{name}' under '{parent}'")]
    DuplicateSiblingName { parent: String, name: String },

    #[error("compound state '{node}' has no children")]
    EmptyCompound { node: String },

    #[error("orthogonal state '{node}' has {count} region(s); at least 2 are required")]
    TooFewRegions { node: String, count: usize },

    #[error("no state at path '{path}'")]
    UnknownState { path: String },

    #[error("context (de)serialization failed: {0}")]
    Context(#[from] serde_json::Error),
}
