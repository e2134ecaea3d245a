//! Transition and target definitions.

use crate::action::Action;
use crate::event::Event;
use crate::guard::Guard;
use std::fmt;

/// Symbolic reference to a destination node, relative to the declaring
/// transition's source. Resolved once by the resolver into concrete nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Full path of names below the root (the root name itself is implied).
    Absolute(Vec<String>),
    /// A state sharing the source's parent.
    Sibling(String),
    /// A direct child of the source.
    Child(String),
    /// The source itself; exits and re-enters only the source node.
    This,
}

impl Target {
    pub fn absolute<I, S>(path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Target::Absolute(path.into_iter().map(Into::into).collect())
    }

    pub fn sibling(name: impl Into<String>) -> Self {
        Target::Sibling(name.into())
    }

    pub fn child(name: impl Into<String>) -> Self {
        Target::Child(name.into())
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Absolute(path) => write!(f, "/{}", path.join(".")),
            Target::Sibling(name) => write!(f, "^{name}"),
            Target::Child(name) => write!(f, "./{name}"),
            Target::This => f.write_str("self"),
        }
    }
}

/// A declared transition on a state node.
///
/// Declaration order is the per-node priority order: the first matching,
/// enabled transition wins. A matching Forbidden transition swallows the
/// event for its node without a state change.
#[derive(Debug, Clone)]
pub enum TransitionDef<C> {
    /// Explicitly swallows the event.
    Forbidden { event: Event },
    /// Event match is sufficient.
    Unguarded {
        event: Event,
        targets: Vec<Target>,
        actions: Vec<Action<C>>,
    },
    /// Event match plus guard evaluation.
    Guarded {
        event: Event,
        guards: Vec<Guard<C>>,
        targets: Vec<Target>,
        actions: Vec<Action<C>>,
    },
}

impl<C> TransitionDef<C> {
    /// Unguarded transition to a single target.
    pub fn on(event: Event, target: Target) -> Self {
        TransitionDef::Unguarded {
            event,
            targets: vec![target],
            actions: Vec::new(),
        }
    }

    /// Unguarded, targetless transition: runs actions without exiting or
    /// entering any state.
    pub fn internal(event: Event, actions: Vec<Action<C>>) -> Self {
        TransitionDef::Unguarded {
            event,
            targets: Vec::new(),
            actions,
        }
    }

    pub fn guarded(event: Event, guard: Guard<C>, target: Target) -> Self {
        TransitionDef::Guarded {
            event,
            guards: vec![guard],
            targets: vec![target],
            actions: Vec::new(),
        }
    }

    pub fn forbidden(event: Event) -> Self {
        TransitionDef::Forbidden { event }
    }

    /// Appends actions to run when the transition fires.
    pub fn with_actions(mut self, extra: Vec<Action<C>>) -> Self {
        match &mut self {
            TransitionDef::Forbidden { .. } => {}
            TransitionDef::Unguarded { actions, .. }
            | TransitionDef::Guarded { actions, .. } => actions.extend(extra),
        }
        self
    }

    /// Appends a target.
    pub fn and_target(mut self, target: Target) -> Self {
        match &mut self {
            TransitionDef::Forbidden { .. } => {}
            TransitionDef::Unguarded { targets, .. }
            | TransitionDef::Guarded { targets, .. } => targets.push(target),
        }
        self
    }

    pub fn event(&self) -> &Event {
        match self {
            TransitionDef::Forbidden { event }
            | TransitionDef::Unguarded { event, .. }
            | TransitionDef::Guarded { event, .. } => event,
        }
    }
}

/// Targets and actions of a completion or service reaction, declared without
/// an event. The resolver supplies the synthetic trigger (`done.state.*`,
/// `done.invoke.*`, `error.invoke.*`).
#[derive(Debug, Clone)]
pub struct ReactionDef<C> {
    pub guards: Vec<Guard<C>>,
    pub targets: Vec<Target>,
    pub actions: Vec<Action<C>>,
}

impl<C> ReactionDef<C> {
    pub fn to(target: Target) -> Self {
        Self {
            guards: Vec::new(),
            targets: vec![target],
            actions: Vec::new(),
        }
    }

    /// Reaction that only runs actions.
    pub fn run(actions: Vec<Action<C>>) -> Self {
        Self {
            guards: Vec::new(),
            targets: Vec::new(),
            actions,
        }
    }

    pub fn with_guard(mut self, guard: Guard<C>) -> Self {
        self.guards.push(guard);
        self
    }

    pub fn with_actions(mut self, actions: Vec<Action<C>>) -> Self {
        self.actions.extend(actions);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_display() {
        assert_eq!(Target::absolute(["a", "b"]).to_string(), "/a.b");
        assert_eq!(Target::sibling("b").to_string(), "^b");
        assert_eq!(Target::child("c").to_string(), "./c");
        assert_eq!(Target::This.to_string(), "self");
    }

    #[test]
    fn test_with_actions_ignores_forbidden() {
        let t: TransitionDef<()> = TransitionDef::forbidden(Event::named("X"))
            .with_actions(vec![Action::log("never")]);
        assert!(matches!(t, TransitionDef::Forbidden { .. }));
    }
}
