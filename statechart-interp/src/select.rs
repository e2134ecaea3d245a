//! Transition selection.
//!
//! For every active node, in document order, the first declared transition
//! whose trigger matches and whose guard passes is that node's candidate.
//! Candidates whose claimed node sets intersect conflict; a transition
//! sourced on a descendant preempts one sourced on an ancestor, and among
//! the rest the earlier candidate in document order survives. The
//! surviving set fires together in one microstep.

use crate::error::InterpreterError;
use crate::microstep::conflict_set;
use serde_json::Value;
use statechart_core::{Event, Guard, ResolvedGraph, ResolvedTransition, StateConfiguration};
use std::collections::BTreeSet;

/// Index of a transition within the resolved graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRef {
    /// Source node index.
    pub node: usize,
    /// Position in the source node's transition list.
    pub index: usize,
}

/// Evaluates the governing guard of a transition. Guards are stored sorted
/// by kind (in-state, condition, condition+data); the first present one
/// decides, later kinds are not consulted.
pub(crate) fn guard_passes<C>(
    graph: &ResolvedGraph<C>,
    config: &StateConfiguration,
    ctx: &C,
    event: &Event,
    transition: &ResolvedTransition<C>,
) -> Result<bool, InterpreterError> {
    let guard_err = |source| InterpreterError::Guard {
        node: graph.id(transition.source).to_string(),
        event: event.to_string(),
        source,
    };

    match transition.guards.first() {
        None => Ok(true),
        Some(Guard::InState(path)) => Ok(config.in_state(graph, path)),
        Some(Guard::Cond(f)) => f(ctx).map_err(guard_err),
        Some(Guard::CondData(f)) => {
            f(ctx, event.data().unwrap_or(&Value::Null)).map_err(guard_err)
        }
    }
}

/// Selects the maximal conflict-free transition set for `event`.
///
/// All guards are evaluated before any microstep is applied; a guard error
/// aborts the whole pass with no configuration change.
pub fn select<C>(
    graph: &ResolvedGraph<C>,
    config: &StateConfiguration,
    ctx: &C,
    event: &Event,
) -> Result<Vec<TransitionRef>, InterpreterError> {
    // At most one candidate per active node.
    let mut candidates: Vec<TransitionRef> = Vec::new();
    for idx in config.iter() {
        for (index, transition) in graph.node(idx).transitions.iter().enumerate() {
            if !transition.trigger.matches(event) {
                continue;
            }
            if transition.forbidden {
                // Explicitly swallowed for this node.
                break;
            }
            if guard_passes(graph, config, ctx, event, transition)? {
                candidates.push(TransitionRef { node: idx, index });
                break;
            }
        }
    }

    // Conflict resolution: candidates arrive in document order, so
    // ancestors precede their descendants.
    let mut selected: Vec<(TransitionRef, BTreeSet<usize>)> = Vec::new();
    'candidates: for cand in candidates {
        let transition = &graph.node(cand.node).transitions[cand.index];
        let claimed = conflict_set(graph, config, transition);

        let mut i = 0;
        while i < selected.len() {
            if selected[i].1.is_disjoint(&claimed) {
                i += 1;
                continue;
            }
            if graph.is_ancestor(selected[i].0.node, cand.node) {
                // Inner transition preempts the outer one.
                selected.remove(i);
            } else {
                // Earlier candidate wins the tie.
                continue 'candidates;
            }
        }
        selected.push((cand, claimed));
    }

    Ok(selected.into_iter().map(|(cand, _)| cand).collect())
}
