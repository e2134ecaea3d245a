//! # statechart-core
//!
//! Static side of the statechart engine.
//!
//! This crate provides:
//! - The declarative definition model (states, transitions, events,
//!   actions, services, targets)
//! - The resolver/linker producing a flattened, indexable resolved graph
//! - State configurations and the serializable interpreter state value
//! - Construction-time validation errors
//!
//! Execution lives in `statechart-interp`.

pub mod action;
pub mod config;
pub mod definition;
pub mod error;
pub mod event;
pub mod graph;
pub mod guard;
pub mod id;
pub mod service;
pub mod transition;

pub use action::{Action, AssignAction, BoxError, EffectAction, LogAction};
pub use config::{ConfigurationError, State, StateConfiguration, StateSnapshot};
pub use definition::{MachineDef, StateDef, StateDefKind};
pub use error::DefinitionError;
pub use event::Event;
pub use graph::{
    ResolvedGraph, ResolvedNode, ResolvedService, ResolvedTarget, ResolvedTransition, StateKind,
    Statechart, TimerSpec, Trigger,
};
pub use guard::Guard;
pub use id::{NodeId, Segment};
pub use service::{ActivityFn, ServiceDef, ServiceKind, TaskDataFn, TaskFn};
pub use transition::{ReactionDef, Target, TransitionDef};
