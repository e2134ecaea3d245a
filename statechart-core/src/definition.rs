//! Declarative statechart definitions.
//!
//! A `MachineDef` is pure data: a state-node tree plus the initial context
//! value. It is produced by an authoring layer, consumed exactly once by
//! [`crate::graph::ResolvedGraph::resolve`], and never mutated afterwards.
//! The constructors here are plain data builders, enough to assemble a tree
//! by hand or from a front end.

use crate::action::Action;
use crate::service::ServiceDef;
use crate::transition::{ReactionDef, TransitionDef};

/// Variant-specific parts of a state definition.
#[derive(Debug)]
pub enum StateDefKind<C> {
    /// Leaf state. No children.
    Atomic,
    /// Leaf that signals completion of its parent when entered.
    Final,
    /// Exactly one child active whenever the state is active; `initial`
    /// names the default child.
    Compound {
        initial: String,
        children: Vec<StateDef<C>>,
    },
    /// All children active simultaneously whenever the state is active.
    Orthogonal { children: Vec<StateDef<C>> },
}

/// One node of the definition tree.
#[derive(Debug)]
pub struct StateDef<C> {
    pub name: String,
    pub kind: StateDefKind<C>,
    pub entry_actions: Vec<Action<C>>,
    pub exit_actions: Vec<Action<C>>,
    /// Outgoing transitions in priority (declaration) order.
    pub transitions: Vec<TransitionDef<C>>,
    /// Services invoked for the lifetime of this node.
    pub services: Vec<ServiceDef<C>>,
    /// Fired when the state completes (a final descendant becomes active).
    /// Ignored on Atomic/Final states.
    pub on_done: Option<ReactionDef<C>>,
}

impl<C> StateDef<C> {
    fn new(name: impl Into<String>, kind: StateDefKind<C>) -> Self {
        Self {
            name: name.into(),
            kind,
            entry_actions: Vec::new(),
            exit_actions: Vec::new(),
            transitions: Vec::new(),
            services: Vec::new(),
            on_done: None,
        }
    }

    pub fn atomic(name: impl Into<String>) -> Self {
        Self::new(name, StateDefKind::Atomic)
    }

    pub fn final_state(name: impl Into<String>) -> Self {
        Self::new(name, StateDefKind::Final)
    }

    pub fn compound(
        name: impl Into<String>,
        initial: impl Into<String>,
        children: Vec<StateDef<C>>,
    ) -> Self {
        Self::new(
            name,
            StateDefKind::Compound {
                initial: initial.into(),
                children,
            },
        )
    }

    pub fn orthogonal(name: impl Into<String>, children: Vec<StateDef<C>>) -> Self {
        Self::new(name, StateDefKind::Orthogonal { children })
    }

    pub fn on(mut self, transition: TransitionDef<C>) -> Self {
        self.transitions.push(transition);
        self
    }

    pub fn on_entry(mut self, action: Action<C>) -> Self {
        self.entry_actions.push(action);
        self
    }

    pub fn on_exit(mut self, action: Action<C>) -> Self {
        self.exit_actions.push(action);
        self
    }

    pub fn invoke(mut self, service: ServiceDef<C>) -> Self {
        self.services.push(service);
        self
    }

    pub fn on_done(mut self, reaction: ReactionDef<C>) -> Self {
        self.on_done = Some(reaction);
        self
    }

    pub fn children(&self) -> &[StateDef<C>] {
        match &self.kind {
            StateDefKind::Atomic | StateDefKind::Final => &[],
            StateDefKind::Compound { children, .. }
            | StateDefKind::Orthogonal { children } => children,
        }
    }
}

/// A complete statechart definition: the root state node (whose name is the
/// machine name) plus the initial context value.
#[derive(Debug)]
pub struct MachineDef<C> {
    pub root: StateDef<C>,
    pub context: C,
}

impl<C> MachineDef<C> {
    pub fn new(root: StateDef<C>, context: C) -> Self {
        Self { root, context }
    }

    pub fn name(&self) -> &str {
        &self.root.name
    }
}
