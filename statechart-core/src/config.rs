//! Active-state configuration and the interpreter state value.
//!
//! A configuration is the set of currently active nodes of the resolved
//! graph, kept in document order. Configurations are immutable values:
//! every microstep produces a new one, the previous is superseded, nothing
//! is mutated in place.

use crate::error::DefinitionError;
use crate::graph::{ResolvedGraph, StateKind};
use crate::id::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

/// Violation of the configuration invariant.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("active node '{node}' has an inactive parent")]
    OrphanNode { node: String },

    #[error("active compound '{node}' has {count} active children; exactly 1 required")]
    CompoundChildCount { node: String, count: usize },

    #[error("active orthogonal '{node}' is missing active region '{region}'")]
    MissingRegion { node: String, region: String },

    #[error("active leaf '{node}' has active descendants")]
    LeafWithChildren { node: String },
}

/// The set of active state nodes, in document order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StateConfiguration {
    active: BTreeSet<usize>,
}

impl StateConfiguration {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_nodes(nodes: impl IntoIterator<Item = usize>) -> Self {
        Self {
            active: nodes.into_iter().collect(),
        }
    }

    pub fn contains(&self, idx: usize) -> bool {
        self.active.contains(&idx)
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Active nodes in document order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.active.iter().copied()
    }

    /// New configuration with `exited` removed and `entered` added.
    pub fn apply(&self, exited: &[usize], entered: &[usize]) -> Self {
        let mut active = self.active.clone();
        for idx in exited {
            active.remove(idx);
        }
        for idx in entered {
            active.insert(*idx);
        }
        Self { active }
    }

    /// Active ids in document order.
    pub fn active_ids<'g, C>(&self, graph: &'g ResolvedGraph<C>) -> Vec<&'g NodeId> {
        self.iter().map(|idx| graph.id(idx)).collect()
    }

    /// Whether the node at `path` (names below the root) is active.
    pub fn in_state<C, S: AsRef<str>>(&self, graph: &ResolvedGraph<C>, path: &[S]) -> bool {
        graph
            .node_at_path(path)
            .map(|idx| self.contains(idx))
            .unwrap_or(false)
    }

    /// Active nodes within `anc`'s subtree (including `anc` itself if
    /// active), in document order.
    pub fn active_in_subtree<C>(&self, graph: &ResolvedGraph<C>, anc: usize) -> Vec<usize> {
        self.iter()
            .filter(|&idx| graph.subtree_contains(anc, idx))
            .collect()
    }

    /// Checks the configuration invariant: every active compound has
    /// exactly one active child, every active orthogonal has all regions
    /// active, leaves have no active descendants, parents of active nodes
    /// are active.
    pub fn validate<C>(&self, graph: &ResolvedGraph<C>) -> Result<(), ConfigurationError> {
        for idx in self.iter() {
            let node = graph.node(idx);
            if let Some(parent) = node.parent {
                if !self.contains(parent) {
                    return Err(ConfigurationError::OrphanNode {
                        node: node.id.to_string(),
                    });
                }
            }
            match node.kind {
                StateKind::Atomic | StateKind::Final => {
                    if node.children.iter().any(|c| self.contains(*c)) {
                        return Err(ConfigurationError::LeafWithChildren {
                            node: node.id.to_string(),
                        });
                    }
                }
                StateKind::Compound => {
                    let count = node.children.iter().filter(|c| self.contains(**c)).count();
                    if count != 1 {
                        return Err(ConfigurationError::CompoundChildCount {
                            node: node.id.to_string(),
                            count,
                        });
                    }
                }
                StateKind::Orthogonal => {
                    for &region in &node.children {
                        if !self.contains(region) {
                            return Err(ConfigurationError::MissingRegion {
                                node: node.id.to_string(),
                                region: graph.id(region).to_string(),
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Interpreter state: a configuration paired with the user context value.
/// Both are replaced wholesale, never mutated in place, on every microstep.
#[derive(Debug, Clone)]
pub struct State<C> {
    pub configuration: StateConfiguration,
    pub context: C,
    /// True once the root has completed; the machine is terminal.
    pub done: bool,
}

impl<C> State<C> {
    pub fn new(configuration: StateConfiguration, context: C) -> Self {
        Self {
            configuration,
            context,
            done: false,
        }
    }

    /// Serializable snapshot: active paths plus opaque context data.
    pub fn snapshot<G>(&self, graph: &ResolvedGraph<G>) -> Result<StateSnapshot, DefinitionError>
    where
        C: Serialize,
    {
        Ok(StateSnapshot {
            active: self
                .configuration
                .active_ids(graph)
                .into_iter()
                .cloned()
                .collect(),
            context: serde_json::to_value(&self.context)?,
            done: self.done,
        })
    }
}

/// Persisted form of a [`State`]: ordered list of active node paths plus
/// opaque context data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub active: Vec<NodeId>,
    pub context: serde_json::Value,
    #[serde(default)]
    pub done: bool,
}

impl StateSnapshot {
    /// Restores a `State` against a resolved graph. Fails if any recorded
    /// path no longer names a node.
    pub fn restore<C, G>(&self, graph: &ResolvedGraph<G>) -> Result<State<C>, DefinitionError>
    where
        C: for<'de> Deserialize<'de>,
    {
        let mut active = Vec::with_capacity(self.active.len());
        for id in &self.active {
            let idx = graph
                .index_of(id)
                .ok_or_else(|| DefinitionError::UnknownState {
                    path: id.to_string(),
                })?;
            active.push(idx);
        }
        Ok(State {
            configuration: StateConfiguration::from_nodes(active),
            context: serde_json::from_value(self.context.clone())?,
            done: self.done,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::StateDef;

    fn graph() -> ResolvedGraph<()> {
        // m=0 { a=1 { x=2, y=3 }, p=4 [ r1=5 { i=6 }, r2=7 { j=8 } ] }
        ResolvedGraph::resolve(StateDef::compound(
            "m",
            "a",
            vec![
                StateDef::compound("a", "x", vec![StateDef::atomic("x"), StateDef::atomic("y")]),
                StateDef::orthogonal(
                    "p",
                    vec![
                        StateDef::compound("r1", "i", vec![StateDef::atomic("i")]),
                        StateDef::compound("r2", "j", vec![StateDef::atomic("j")]),
                    ],
                ),
            ],
        ))
        .unwrap()
    }

    #[test]
    fn test_validate_accepts_compound_configuration() {
        let g = graph();
        let config = StateConfiguration::from_nodes([0, 1, 2]);
        config.validate(&g).unwrap();
    }

    #[test]
    fn test_validate_rejects_two_active_children() {
        let g = graph();
        let config = StateConfiguration::from_nodes([0, 1, 2, 3]);
        assert!(matches!(
            config.validate(&g),
            Err(ConfigurationError::CompoundChildCount { count: 2, .. })
        ));
    }

    #[test]
    fn test_validate_rejects_missing_region() {
        let g = graph();
        let config = StateConfiguration::from_nodes([0, 4, 5, 6]);
        assert!(matches!(
            config.validate(&g),
            Err(ConfigurationError::MissingRegion { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_orphan() {
        let g = graph();
        let config = StateConfiguration::from_nodes([0, 2]);
        assert!(matches!(
            config.validate(&g),
            Err(ConfigurationError::OrphanNode { .. })
        ));
    }

    #[test]
    fn test_apply_is_a_new_value() {
        let before = StateConfiguration::from_nodes([0, 1, 2]);
        let after = before.apply(&[2], &[3]);
        assert!(before.contains(2));
        assert!(!after.contains(2));
        assert!(after.contains(3));
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let g = graph();
        let state = State::new(StateConfiguration::from_nodes([0, 1, 2]), 41u32);
        let snapshot = state.snapshot(&g).unwrap();
        assert_eq!(
            snapshot.active.iter().map(|p| p.to_string()).collect::<Vec<_>>(),
            vec!["m", "m.a", "m.a.x"]
        );

        let restored: State<u32> = snapshot.restore(&g).unwrap();
        assert_eq!(restored.context, 41);
        assert_eq!(restored.configuration, state.configuration);
    }

    #[test]
    fn test_restore_unknown_path() {
        let g = graph();
        let snapshot = StateSnapshot {
            active: vec![NodeId::root("m").child("gone")],
            context: serde_json::Value::Null,
            done: false,
        };
        let err = snapshot.restore::<(), ()>(&g).unwrap_err();
        assert!(matches!(err, DefinitionError::UnknownState { .. }));
    }
}
