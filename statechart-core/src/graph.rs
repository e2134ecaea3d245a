//! Resolver/linker: definition tree to resolved graph.
//!
//! The resolver walks the definition tree exactly once and produces a
//! flattened arena of interpreter-side nodes: parent/child relations as
//! indices, symbolic targets resolved to concrete nodes, service reactions
//! and completion reactions compiled into ordinary transitions on their
//! owning node, and a synthetic root-completion transition. Arena order is
//! pre-order, so the node index doubles as document order and every subtree
//! is a contiguous index range.

use crate::action::Action;
use crate::definition::{MachineDef, StateDef, StateDefKind};
use crate::error::DefinitionError;
use crate::event::Event;
use crate::guard::Guard;
use crate::id::NodeId;
use crate::service::{ServiceDef, ServiceKind};
use crate::transition::{ReactionDef, Target, TransitionDef};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Kind of a resolved state node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    Atomic,
    Final,
    Compound,
    Orthogonal,
}

impl StateKind {
    pub fn is_leaf(self) -> bool {
        matches!(self, StateKind::Atomic | StateKind::Final)
    }
}

/// What fires a resolved transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Eventless; matches any probe.
    Immediate,
    /// Matches Named/Custom events with this name.
    Named(String),
}

impl Trigger {
    /// Whether an incoming event fires this trigger. The eventless probe
    /// (`Event::Immediate`) only fires Immediate triggers; Immediate
    /// triggers fire on every event.
    pub fn matches(&self, event: &Event) -> bool {
        match self {
            Trigger::Immediate => true,
            Trigger::Named(name) => event.name() == Some(name.as_str()),
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Immediate => f.write_str("<immediate>"),
            Trigger::Named(name) => f.write_str(name),
        }
    }
}

/// A resolved transition target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub node: usize,
    /// Self-transition: exit and re-enter only the source node.
    pub reflexive: bool,
}

/// A transition with concrete source and targets.
pub struct ResolvedTransition<C> {
    pub source: usize,
    pub trigger: Trigger,
    /// Matching Forbidden transitions swallow the event for their node.
    pub forbidden: bool,
    /// Guards sorted by kind: in-state, condition, condition+data. The
    /// first guard present governs enablement.
    pub guards: Vec<Guard<C>>,
    /// Empty for targetless (action-only) transitions.
    pub targets: Vec<ResolvedTarget>,
    pub actions: Vec<Action<C>>,
    /// Set only on the synthetic root-completion transition.
    pub completes_machine: bool,
}

impl<C> fmt::Debug for ResolvedTransition<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedTransition")
            .field("source", &self.source)
            .field("trigger", &self.trigger)
            .field("forbidden", &self.forbidden)
            .field("guards", &self.guards.len())
            .field("targets", &self.targets)
            .field("completes_machine", &self.completes_machine)
            .finish()
    }
}

/// A service with its resolved id. Success/error reactions are compiled
/// into transitions on the owning node.
#[derive(Clone)]
pub struct ResolvedService {
    pub id: String,
    pub kind: ServiceKind,
    /// Whether a failure has a declared error reaction; without one the
    /// failure is surfaced to the caller as unhandled.
    pub handles_error: bool,
}

impl fmt::Debug for ResolvedService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ServiceKind::Task(_) => "Task",
            ServiceKind::TaskWithData(_) => "TaskWithData",
            ServiceKind::Activity { .. } => "Activity",
        };
        f.debug_struct("ResolvedService")
            .field("id", &self.id)
            .field("kind", &kind)
            .finish()
    }
}

/// A timer armed when the owning node is entered. Firing enqueues `event`
/// only if the owner is still active at fire time.
#[derive(Debug, Clone)]
pub struct TimerSpec {
    pub delay: Duration,
    pub event: Event,
}

/// One node of the resolved graph.
pub struct ResolvedNode<C> {
    pub idx: usize,
    pub id: NodeId,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    /// Exclusive end of this node's pre-order subtree range.
    pub subtree_end: usize,
    pub kind: StateKind,
    /// Default child of a Compound.
    pub initial: Option<usize>,
    pub entry_actions: Vec<Action<C>>,
    pub exit_actions: Vec<Action<C>>,
    pub transitions: Vec<ResolvedTransition<C>>,
    pub services: Vec<ResolvedService>,
    pub timers: Vec<TimerSpec>,
}

impl<C> fmt::Debug for ResolvedNode<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedNode")
            .field("idx", &self.idx)
            .field("id", &self.id.to_string())
            .field("kind", &self.kind)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("transitions", &self.transitions.len())
            .field("services", &self.services.len())
            .finish()
    }
}

/// Flattened, indexable statechart: the static, shared, read-only input of
/// the interpreter.
pub struct ResolvedGraph<C> {
    nodes: Vec<ResolvedNode<C>>,
    index: HashMap<NodeId, usize>,
}

impl<C> fmt::Debug for ResolvedGraph<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedGraph")
            .field("nodes", &self.nodes)
            .finish()
    }
}

/// A resolved statechart plus its initial context value.
pub struct Statechart<C> {
    pub graph: ResolvedGraph<C>,
    pub initial_context: C,
}

impl<C> Statechart<C> {
    /// Resolves a definition into an executable statechart.
    pub fn new(def: MachineDef<C>) -> Result<Self, DefinitionError> {
        let MachineDef { root, context } = def;
        Ok(Self {
            graph: ResolvedGraph::resolve(root)?,
            initial_context: context,
        })
    }
}

// Per-node definition parts held between the flatten and link phases.
struct RawNode<C> {
    transitions: Vec<TransitionDef<C>>,
    services: Vec<ServiceDef<C>>,
    on_done: Option<ReactionDef<C>>,
    initial_name: Option<String>,
}

impl<C> ResolvedGraph<C> {
    /// Resolves a definition tree rooted at `root`. Fails on unresolved
    /// targets, invalid initial children, duplicate sibling names, and
    /// malformed container states. Resolution is pure and deterministic.
    pub fn resolve(root: StateDef<C>) -> Result<Self, DefinitionError> {
        let mut nodes: Vec<ResolvedNode<C>> = Vec::new();
        let mut raw: Vec<RawNode<C>> = Vec::new();

        Self::flatten(root, None, &mut nodes, &mut raw)?;

        let index: HashMap<NodeId, usize> =
            nodes.iter().map(|n| (n.id.clone(), n.idx)).collect();
        let mut graph = Self { nodes, index };

        // Initial children, now that child indices exist.
        for idx in 0..graph.nodes.len() {
            if let Some(name) = raw[idx].initial_name.take() {
                let child = graph.nodes[idx]
                    .children
                    .iter()
                    .copied()
                    .find(|&c| graph.nodes[c].id.name() == name);
                match child {
                    Some(child) => graph.nodes[idx].initial = Some(child),
                    None => {
                        return Err(DefinitionError::InvalidInitialChild {
                            node: graph.nodes[idx].id.to_string(),
                            initial: name,
                        })
                    }
                }
            }
        }

        // Link transitions, services, and completion reactions.
        for (idx, parts) in raw.into_iter().enumerate() {
            graph.link_node(idx, parts)?;
        }

        // Synthetic root completion: fires on the root's own done event and
        // marks the machine done without special-casing the run loop.
        let done_trigger = Trigger::Named(
            Event::done_state(&graph.nodes[0].id)
                .name()
                .expect("done events are named")
                .to_string(),
        );
        graph.nodes[0].transitions.push(ResolvedTransition {
            source: 0,
            trigger: done_trigger,
            forbidden: false,
            guards: Vec::new(),
            targets: Vec::new(),
            actions: Vec::new(),
            completes_machine: true,
        });

        tracing::debug!(
            nodes = graph.nodes.len(),
            transitions = graph
                .nodes
                .iter()
                .map(|n| n.transitions.len())
                .sum::<usize>(),
            machine = %graph.nodes[0].id,
            "statechart resolved"
        );

        Ok(graph)
    }

    fn flatten(
        def: StateDef<C>,
        parent: Option<usize>,
        nodes: &mut Vec<ResolvedNode<C>>,
        raw: &mut Vec<RawNode<C>>,
    ) -> Result<usize, DefinitionError> {
        let idx = nodes.len();
        let id = match parent {
            None => NodeId::root(&def.name),
            Some(p) => {
                if nodes[p]
                    .children
                    .iter()
                    .any(|&c| nodes[c].id.name() == def.name)
                {
                    return Err(DefinitionError::DuplicateSiblingName {
                        parent: nodes[p].id.to_string(),
                        name: def.name,
                    });
                }
                nodes[p].id.child(&def.name)
            }
        };

        let StateDef {
            name: _,
            kind,
            entry_actions,
            exit_actions,
            transitions,
            services,
            on_done,
        } = def;

        let (state_kind, initial_name, children_defs) = match kind {
            StateDefKind::Atomic => (StateKind::Atomic, None, Vec::new()),
            StateDefKind::Final => (StateKind::Final, None, Vec::new()),
            StateDefKind::Compound { initial, children } => {
                if children.is_empty() {
                    return Err(DefinitionError::EmptyCompound { node: id.to_string() });
                }
                (StateKind::Compound, Some(initial), children)
            }
            StateDefKind::Orthogonal { children } => {
                if children.len() < 2 {
                    return Err(DefinitionError::TooFewRegions {
                        node: id.to_string(),
                        count: children.len(),
                    });
                }
                (StateKind::Orthogonal, None, children)
            }
        };

        nodes.push(ResolvedNode {
            idx,
            id,
            parent,
            children: Vec::new(),
            subtree_end: idx + 1,
            kind: state_kind,
            initial: None,
            entry_actions,
            exit_actions,
            transitions: Vec::new(),
            services: Vec::new(),
            timers: Vec::new(),
        });
        raw.push(RawNode {
            transitions,
            services,
            on_done,
            initial_name,
        });

        for child in children_defs {
            let child_idx = Self::flatten(child, Some(idx), nodes, raw)?;
            nodes[idx].children.push(child_idx);
        }
        nodes[idx].subtree_end = nodes.len();

        Ok(idx)
    }

    fn link_node(&mut self, idx: usize, parts: RawNode<C>) -> Result<(), DefinitionError> {
        let mut resolved: Vec<ResolvedTransition<C>> = Vec::new();
        let mut timers: Vec<TimerSpec> = Vec::new();

        for def in parts.transitions {
            resolved.push(self.link_transition(idx, def, &mut timers)?);
        }

        // Completion reaction, triggered by this node's own done event.
        if let Some(reaction) = parts.on_done {
            if self.nodes[idx].kind.is_leaf() {
                tracing::warn!(node = %self.nodes[idx].id, "done reaction on a leaf state is never fired");
            } else {
                let trigger = self.done_trigger(idx);
                resolved.push(self.link_reaction(idx, trigger, reaction)?);
            }
        }

        // Services: assign ids, compile success/error reactions.
        let mut services = Vec::new();
        for (i, service) in parts.services.into_iter().enumerate() {
            let ServiceDef {
                id,
                kind,
                on_done,
                on_error,
            } = service;
            let sid = id.unwrap_or_else(|| format!("{}:{}", self.nodes[idx].id, i));
            let handles_error = on_error.is_some();

            if let Some(reaction) = on_done {
                let name = Event::service_done(&sid, None);
                let trigger = Trigger::Named(name.name().expect("named").to_string());
                resolved.push(self.link_reaction(idx, trigger, reaction)?);
            }
            if let Some(reaction) = on_error {
                let name = Event::service_error(&sid, "");
                let trigger = Trigger::Named(name.name().expect("named").to_string());
                resolved.push(self.link_reaction(idx, trigger, reaction)?);
            }

            services.push(ResolvedService {
                id: sid,
                kind,
                handles_error,
            });
        }

        let node = &mut self.nodes[idx];
        node.transitions = resolved;
        node.services = services;
        node.timers = timers;
        Ok(())
    }

    fn link_transition(
        &self,
        source: usize,
        def: TransitionDef<C>,
        timers: &mut Vec<TimerSpec>,
    ) -> Result<ResolvedTransition<C>, DefinitionError> {
        let (event, guards, targets, actions, forbidden) = match def {
            TransitionDef::Forbidden { event } => (event, Vec::new(), Vec::new(), Vec::new(), true),
            TransitionDef::Unguarded {
                event,
                targets,
                actions,
            } => (event, Vec::new(), targets, actions, false),
            TransitionDef::Guarded {
                event,
                guards,
                targets,
                actions,
            } => (event, guards, targets, actions, false),
        };

        let trigger = self.link_trigger(source, event, timers);

        let mut guards = guards;
        guards.sort_by_key(Guard::kind_rank);

        let targets = targets
            .into_iter()
            .map(|t| self.resolve_target(source, &t))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ResolvedTransition {
            source,
            trigger,
            forbidden,
            guards,
            targets,
            actions,
            completes_machine: false,
        })
    }

    fn link_reaction(
        &self,
        source: usize,
        trigger: Trigger,
        reaction: ReactionDef<C>,
    ) -> Result<ResolvedTransition<C>, DefinitionError> {
        let ReactionDef {
            mut guards,
            targets,
            actions,
        } = reaction;
        guards.sort_by_key(Guard::kind_rank);
        let targets = targets
            .into_iter()
            .map(|t| self.resolve_target(source, &t))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ResolvedTransition {
            source,
            trigger,
            forbidden: false,
            guards,
            targets,
            actions,
            completes_machine: false,
        })
    }

    /// Rewrites a trigger event; Delayed triggers become named timer events
    /// armed on node entry.
    fn link_trigger(&self, source: usize, event: Event, timers: &mut Vec<TimerSpec>) -> Trigger {
        match event {
            Event::Immediate => Trigger::Immediate,
            Event::Named(name) => Trigger::Named(name),
            Event::Custom { name, .. } => Trigger::Named(name),
            Event::Delayed { delay, event } => {
                let fired = match *event {
                    // Anonymous delay: synthesize a per-node unique name.
                    Event::Immediate => {
                        Event::Named(Event::after_name(delay, &self.nodes[source].id))
                    }
                    inner => inner,
                };
                let name = fired
                    .name()
                    .expect("delayed inner event is named after rewrite")
                    .to_string();
                timers.push(TimerSpec {
                    delay,
                    event: fired,
                });
                Trigger::Named(name)
            }
        }
    }

    fn done_trigger(&self, idx: usize) -> Trigger {
        Trigger::Named(
            Event::done_state(&self.nodes[idx].id)
                .name()
                .expect("done events are named")
                .to_string(),
        )
    }

    fn resolve_target(
        &self,
        source: usize,
        target: &Target,
    ) -> Result<ResolvedTarget, DefinitionError> {
        let unresolved = || DefinitionError::UnresolvedTarget {
            node: self.nodes[source].id.to_string(),
            target: target.to_string(),
        };

        let node = match target {
            Target::This => {
                return Ok(ResolvedTarget {
                    node: source,
                    reflexive: true,
                })
            }
            Target::Sibling(name) => {
                let parent = self.nodes[source].parent.ok_or_else(unresolved)?;
                self.child_by_name(parent, name).ok_or_else(unresolved)?
            }
            Target::Child(name) => self.child_by_name(source, name).ok_or_else(unresolved)?,
            Target::Absolute(path) => self.node_at_path(path).ok_or_else(unresolved)?,
        };

        Ok(ResolvedTarget {
            node,
            reflexive: false,
        })
    }

    fn child_by_name(&self, parent: usize, name: &str) -> Option<usize> {
        self.nodes[parent]
            .children
            .iter()
            .copied()
            .find(|&c| self.nodes[c].id.name() == name)
    }

    // =========================================================================
    // Topology
    // =========================================================================

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root(&self) -> usize {
        0
    }

    pub fn node(&self, idx: usize) -> &ResolvedNode<C> {
        &self.nodes[idx]
    }

    pub fn nodes(&self) -> &[ResolvedNode<C>] {
        &self.nodes
    }

    pub fn id(&self, idx: usize) -> &NodeId {
        &self.nodes[idx].id
    }

    /// O(1) id lookup.
    pub fn index_of(&self, id: &NodeId) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Node at a path of names below the root (root name excluded).
    pub fn node_at_path<S: AsRef<str>>(&self, path: &[S]) -> Option<usize> {
        let mut idx = 0;
        for name in path {
            idx = self.child_by_name(idx, name.as_ref())?;
        }
        Some(idx)
    }

    pub fn parent(&self, idx: usize) -> Option<usize> {
        self.nodes[idx].parent
    }

    /// Proper ancestors, bottom-up.
    pub fn ancestors(&self, idx: usize) -> impl Iterator<Item = usize> + '_ {
        std::iter::successors(self.nodes[idx].parent, move |&p| self.nodes[p].parent)
    }

    /// True if `anc` properly contains `node`.
    pub fn is_ancestor(&self, anc: usize, node: usize) -> bool {
        node > anc && node < self.nodes[anc].subtree_end
    }

    /// True if `node` lies in `anc`'s subtree (reflexive).
    pub fn subtree_contains(&self, anc: usize, node: usize) -> bool {
        node >= anc && node < self.nodes[anc].subtree_end
    }

    /// Lowest node whose subtree contains both `a` and `b`.
    pub fn lca(&self, a: usize, b: usize) -> usize {
        if self.subtree_contains(a, b) {
            return a;
        }
        self.ancestors(a)
            .find(|&anc| self.subtree_contains(anc, b))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn traffic_light() -> StateDef<()> {
        StateDef::compound(
            "light",
            "red",
            vec![
                StateDef::atomic("red")
                    .on(TransitionDef::on(Event::named("GO"), Target::sibling("green"))),
                StateDef::atomic("green")
                    .on(TransitionDef::on(Event::named("STOP"), Target::sibling("red"))),
            ],
        )
    }

    #[test]
    fn test_resolve_assigns_document_order() {
        let graph = ResolvedGraph::resolve(traffic_light()).unwrap();
        assert_eq!(graph.len(), 3);
        assert_eq!(graph.id(0).to_string(), "light");
        assert_eq!(graph.id(1).to_string(), "light.red");
        assert_eq!(graph.id(2).to_string(), "light.green");
        assert_eq!(graph.node(0).initial, Some(1));
    }

    #[test]
    fn test_sibling_target_resolution() {
        let graph = ResolvedGraph::resolve(traffic_light()).unwrap();
        let red = graph.node(1);
        assert_eq!(red.transitions[0].targets, vec![ResolvedTarget { node: 2, reflexive: false }]);
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let a = ResolvedGraph::resolve(traffic_light()).unwrap();
        let b = ResolvedGraph::resolve(traffic_light()).unwrap();
        let ids_a: Vec<String> = a.nodes().iter().map(|n| n.id.to_string()).collect();
        let ids_b: Vec<String> = b.nodes().iter().map(|n| n.id.to_string()).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[test]
    fn test_duplicate_sibling_name() {
        let def: StateDef<()> = StateDef::compound(
            "m",
            "a",
            vec![StateDef::atomic("a"), StateDef::atomic("a")],
        );
        let err = ResolvedGraph::resolve(def).unwrap_err();
        assert!(matches!(err, DefinitionError::DuplicateSiblingName { .. }));
    }

    #[test]
    fn test_invalid_initial_child() {
        let def: StateDef<()> = StateDef::compound("m", "missing", vec![StateDef::atomic("a")]);
        let err = ResolvedGraph::resolve(def).unwrap_err();
        assert!(matches!(err, DefinitionError::InvalidInitialChild { .. }));
    }

    #[test]
    fn test_unresolved_target() {
        let def: StateDef<()> = StateDef::compound(
            "m",
            "a",
            vec![StateDef::atomic("a")
                .on(TransitionDef::on(Event::named("GO"), Target::sibling("nope")))],
        );
        let err = ResolvedGraph::resolve(def).unwrap_err();
        assert!(matches!(err, DefinitionError::UnresolvedTarget { .. }));
    }

    #[test]
    fn test_orthogonal_needs_two_regions() {
        let def: StateDef<()> = StateDef::orthogonal(
            "m",
            vec![StateDef::compound("only", "a", vec![StateDef::atomic("a")])],
        );
        let err = ResolvedGraph::resolve(def).unwrap_err();
        assert!(matches!(err, DefinitionError::TooFewRegions { count: 1, .. }));
    }

    #[test]
    fn test_root_completion_transition_synthesized() {
        let graph = ResolvedGraph::resolve(traffic_light()).unwrap();
        let root = graph.node(0);
        let done = root.transitions.last().unwrap();
        assert!(done.completes_machine);
        assert_eq!(done.trigger, Trigger::Named("done.state.light".to_string()));
    }

    #[test]
    fn test_delayed_trigger_rewrite() {
        let def: StateDef<()> = StateDef::compound(
            "m",
            "a",
            vec![
                StateDef::atomic("a").on(TransitionDef::on(
                    Event::delayed(Duration::from_millis(100), Event::Immediate),
                    Target::sibling("b"),
                )),
                StateDef::atomic("b"),
            ],
        );
        let graph = ResolvedGraph::resolve(def).unwrap();
        let a = graph.node(1);
        assert_eq!(a.timers.len(), 1);
        assert_eq!(a.timers[0].delay, Duration::from_millis(100));
        assert_eq!(
            a.transitions[0].trigger,
            Trigger::Named("after.100.m.a".to_string())
        );
    }

    #[test]
    fn test_subtree_ranges() {
        let def: StateDef<()> = StateDef::compound(
            "m",
            "a",
            vec![
                StateDef::compound("a", "x", vec![StateDef::atomic("x"), StateDef::atomic("y")]),
                StateDef::atomic("b"),
            ],
        );
        let graph = ResolvedGraph::resolve(def).unwrap();
        // Pre-order: m=0 a=1 x=2 y=3 b=4
        assert!(graph.is_ancestor(0, 3));
        assert!(graph.is_ancestor(1, 2));
        assert!(!graph.is_ancestor(1, 4));
        assert_eq!(graph.lca(2, 3), 1);
        assert_eq!(graph.lca(2, 4), 0);
        assert_eq!(graph.lca(1, 3), 1);
    }
}
