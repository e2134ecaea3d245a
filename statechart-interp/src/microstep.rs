//! Microstep computation: LCA-based exit and entry sets.
//!
//! Given a conflict-free transition set, this module computes the atomic
//! configuration change: which nodes exit (deepest first), which enter
//! (document order). Action execution and the configuration swap are
//! applied by the interpreter.

use crate::select::TransitionRef;
use statechart_core::{ResolvedGraph, ResolvedTransition, StateConfiguration, StateKind};
use std::collections::BTreeSet;

/// One atomic configuration change.
#[derive(Debug, Clone)]
pub struct Microstep {
    pub transitions: Vec<TransitionRef>,
    /// Exited nodes, deepest first (reverse document order).
    pub exited: Vec<usize>,
    /// Entered nodes, document order (parents before children).
    pub entered: Vec<usize>,
}

/// The transition's domain: the lowest ancestor of the source whose subtree
/// contains the target, excluding the target itself. Exit and entry stay
/// strictly inside the domain.
fn domain<C>(graph: &ResolvedGraph<C>, source: usize, target: usize) -> usize {
    graph
        .ancestors(source)
        .find(|&anc| anc != target && graph.subtree_contains(anc, target))
        .unwrap_or(graph.root())
}

// Ancestor-or-self of `node` that is a direct child of `domain`, i.e. the
// topmost node left when crossing out of the domain.
fn child_of_domain<C>(graph: &ResolvedGraph<C>, domain: usize, node: usize) -> Option<usize> {
    std::iter::once(node)
        .chain(graph.ancestors(node))
        .find(|&n| graph.parent(n) == Some(domain))
}

/// Nodes exited when `transition` fires: for every target, the chain from
/// the source up to the domain plus all currently active descendants of the
/// branch being abandoned. Self-targets exit only the source.
pub fn exit_set<C>(
    graph: &ResolvedGraph<C>,
    config: &StateConfiguration,
    transition: &ResolvedTransition<C>,
) -> BTreeSet<usize> {
    let mut out = BTreeSet::new();
    for target in &transition.targets {
        if target.reflexive {
            out.insert(transition.source);
            continue;
        }
        let dom = domain(graph, transition.source, target.node);
        match child_of_domain(graph, dom, transition.source) {
            Some(top) => out.extend(config.active_in_subtree(graph, top)),
            // Source is the domain itself (root-sourced transition): the
            // whole active interior is abandoned, the domain stays.
            None => out.extend(
                config
                    .active_in_subtree(graph, transition.source)
                    .into_iter()
                    .filter(|&n| n != transition.source),
            ),
        }
    }
    out
}

/// Nodes claimed by a transition for conflict detection: its exit set plus
/// the active subtree of its source. A transition sourced on an ancestor
/// always claims its active descendants, so inner transitions conflict
/// with (and preempt) outer ones even when the applied exit sets differ.
pub fn conflict_set<C>(
    graph: &ResolvedGraph<C>,
    config: &StateConfiguration,
    transition: &ResolvedTransition<C>,
) -> BTreeSet<usize> {
    let mut out = exit_set(graph, config, transition);
    out.extend(config.active_in_subtree(graph, transition.source));
    out
}

/// Adds default descents to an entry set: every entered Compound without a
/// surviving-or-entered child gets its initial child, every entered
/// Orthogonal gets all regions, recursively.
pub fn expand_entry<C>(
    graph: &ResolvedGraph<C>,
    entered: &mut BTreeSet<usize>,
    exited: &BTreeSet<usize>,
    config: &StateConfiguration,
) {
    let remains_active =
        |n: usize, entered: &BTreeSet<usize>| entered.contains(&n) || (config.contains(n) && !exited.contains(&n));

    let mut work: Vec<usize> = entered.iter().copied().collect();
    while let Some(idx) = work.pop() {
        let node = graph.node(idx);
        match node.kind {
            StateKind::Atomic | StateKind::Final => {}
            StateKind::Compound => {
                let occupied = node.children.iter().any(|&c| remains_active(c, entered));
                if !occupied {
                    if let Some(init) = node.initial {
                        if entered.insert(init) {
                            work.push(init);
                        }
                    }
                }
            }
            StateKind::Orthogonal => {
                for &region in &node.children {
                    if !remains_active(region, entered) && entered.insert(region) {
                        work.push(region);
                    }
                }
            }
        }
    }
}

/// Computes the microstep for a conflict-free transition set.
pub fn plan<C>(
    graph: &ResolvedGraph<C>,
    config: &StateConfiguration,
    transitions: &[TransitionRef],
) -> Microstep {
    let mut exited: BTreeSet<usize> = BTreeSet::new();
    let mut entered: BTreeSet<usize> = BTreeSet::new();

    for tr in transitions {
        let t = &graph.node(tr.node).transitions[tr.index];
        exited.extend(exit_set(graph, config, t));

        for target in &t.targets {
            if target.reflexive {
                entered.insert(t.source);
                continue;
            }
            let dom = domain(graph, t.source, target.node);
            // Chain from the domain (exclusive) down to the target.
            let mut chain: Vec<usize> = std::iter::once(target.node)
                .chain(graph.ancestors(target.node))
                .take_while(|&n| n != dom)
                .collect();
            chain.reverse();
            entered.extend(chain);
        }
    }

    expand_entry(graph, &mut entered, &exited, config);

    Microstep {
        transitions: transitions.to_vec(),
        exited: exited.into_iter().rev().collect(),
        entered: entered.into_iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use statechart_core::{Event, StateDef, Target, TransitionDef};

    // m=0 { a=1 { x=2, y=3 }, b=4, p=5 [ r1=6 { i=7 }, r2=8 { j=9 } ] }
    fn graph() -> ResolvedGraph<()> {
        ResolvedGraph::resolve(StateDef::compound(
            "m",
            "a",
            vec![
                StateDef::compound(
                    "a",
                    "x",
                    vec![
                        StateDef::atomic("x")
                            .on(TransitionDef::on(Event::named("NEXT"), Target::sibling("y")))
                            .on(TransitionDef::on(Event::named("OUT"), Target::absolute(["b"]))),
                        StateDef::atomic("y"),
                    ],
                ),
                StateDef::atomic("b"),
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

    fn transition<'g>(
        graph: &'g ResolvedGraph<()>,
        node: usize,
        index: usize,
    ) -> &'g ResolvedTransition<()> {
        &graph.node(node).transitions[index]
    }

    #[test]
    fn test_sibling_exit_entry() {
        let g = graph();
        let config = StateConfiguration::from_nodes([0, 1, 2]);
        let step = plan(&g, &config, &[TransitionRef { node: 2, index: 0 }]);

        assert_eq!(step.exited, vec![2]);
        assert_eq!(step.entered, vec![3]);
    }

    #[test]
    fn test_absolute_target_exits_abandoned_branch() {
        let g = graph();
        let config = StateConfiguration::from_nodes([0, 1, 2]);
        let step = plan(&g, &config, &[TransitionRef { node: 2, index: 1 }]);

        // Leaving a.x for b abandons the whole `a` branch, deepest first.
        assert_eq!(step.exited, vec![2, 1]);
        assert_eq!(step.entered, vec![4]);
    }

    #[test]
    fn test_entering_orthogonal_activates_all_regions() {
        let def: StateDef<()> = StateDef::compound(
            "m",
            "b",
            vec![
                StateDef::atomic("b").on(TransitionDef::on(Event::named("GO"), Target::sibling("p"))),
                StateDef::orthogonal(
                    "p",
                    vec![
                        StateDef::compound("r1", "i", vec![StateDef::atomic("i")]),
                        StateDef::compound("r2", "j", vec![StateDef::atomic("j")]),
                    ],
                ),
            ],
        );
        let g = ResolvedGraph::resolve(def).unwrap();
        // m=0 b=1 p=2 r1=3 i=4 r2=5 j=6
        let config = StateConfiguration::from_nodes([0, 1]);
        let step = plan(&g, &config, &[TransitionRef { node: 1, index: 0 }]);

        assert_eq!(step.exited, vec![1]);
        assert_eq!(step.entered, vec![2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_reflexive_transition_touches_only_source() {
        let def: StateDef<()> = StateDef::compound(
            "m",
            "a",
            vec![StateDef::compound(
                "a",
                "x",
                vec![StateDef::atomic("x")],
            )
            .on(TransitionDef::on(Event::named("SELF"), Target::This))],
        );
        let g = ResolvedGraph::resolve(def).unwrap();
        // m=0 a=1 x=2
        let config = StateConfiguration::from_nodes([0, 1, 2]);
        let step = plan(&g, &config, &[TransitionRef { node: 1, index: 0 }]);

        assert_eq!(step.exited, vec![1]);
        assert_eq!(step.entered, vec![1]);
    }

    #[test]
    fn test_child_target_reenters_source() {
        let def: StateDef<()> = StateDef::compound(
            "m",
            "a",
            vec![StateDef::compound(
                "a",
                "x",
                vec![StateDef::atomic("x"), StateDef::atomic("y")],
            )
            .on(TransitionDef::on(Event::named("RESET"), Target::child("y")))],
        );
        let g = ResolvedGraph::resolve(def).unwrap();
        // m=0 a=1 x=2 y=3
        let config = StateConfiguration::from_nodes([0, 1, 2]);
        let step = plan(&g, &config, &[TransitionRef { node: 1, index: 0 }]);

        // External child transition: the source exits and re-enters.
        assert_eq!(step.exited, vec![2, 1]);
        assert_eq!(step.entered, vec![1, 3]);
    }

    #[test]
    fn test_conflict_set_claims_active_descendants() {
        // A reflexive transition on `a` applies as {a} only, but for
        // conflict purposes it claims its active subtree.
        let def: StateDef<()> = StateDef::compound(
            "m",
            "a",
            vec![StateDef::compound("a", "x", vec![StateDef::atomic("x")])
                .on(TransitionDef::on(Event::named("E"), Target::This))],
        );
        let g = ResolvedGraph::resolve(def).unwrap();
        let config = StateConfiguration::from_nodes([0, 1, 2]);
        let t = transition(&g, 1, 0);
        let claimed = conflict_set(&g, &config, t);
        assert!(claimed.contains(&1));
        assert!(claimed.contains(&2));

        let applied = exit_set(&g, &config, t);
        assert_eq!(applied.into_iter().collect::<Vec<_>>(), vec![1]);
    }
}
