//! Service and timer lifecycle.
//!
//! Every entry of a node arms its timers and starts its services under a
//! fresh cancellation token; exiting the node cancels the token and stops
//! its activities. Completions are delivered to the run loop over an
//! unbounded channel, tagged with a per-entry invocation id so results from
//! a superseded entry are dropped instead of misfiring against a newer one.

use statechart_core::{ActivityFn, Event, ResolvedGraph, ServiceKind};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// A timer or service outcome awaiting admission by the run loop.
#[derive(Debug)]
pub(crate) enum SelfEvent {
    /// A timer fired or a task succeeded.
    Fired {
        node: usize,
        invocation: Uuid,
        event: Event,
    },
    /// A task failed. `handled` mirrors whether the service declared an
    /// error reaction; without one the failure is surfaced as an error.
    Failed {
        node: usize,
        invocation: Uuid,
        service: String,
        reason: String,
        handled: bool,
    },
}

struct NodeServices {
    cancel: CancellationToken,
    /// Outstanding timers and tasks of the current entry.
    invocations: HashSet<Uuid>,
    /// Activity stop callbacks, run synchronously on exit.
    stops: Vec<ActivityFn>,
}

/// Owns the live timers and services of all active nodes.
pub(crate) struct ServiceManager {
    tx: mpsc::UnboundedSender<SelfEvent>,
    rx: mpsc::UnboundedReceiver<SelfEvent>,
    nodes: HashMap<usize, NodeServices>,
}

impl ServiceManager {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx,
            nodes: HashMap::new(),
        }
    }

    /// Arms timers and starts services declared on `idx`. Called after the
    /// node's entry actions have run.
    pub(crate) fn start_node<C>(&mut self, graph: &ResolvedGraph<C>, idx: usize) {
        let node = graph.node(idx);
        if node.timers.is_empty() && node.services.is_empty() {
            return;
        }

        let cancel = CancellationToken::new();
        let mut entry = NodeServices {
            cancel: cancel.clone(),
            invocations: HashSet::new(),
            stops: Vec::new(),
        };

        for timer in &node.timers {
            let invocation = Uuid::new_v4();
            entry.invocations.insert(invocation);
            let tx = self.tx.clone();
            let token = cancel.child_token();
            let delay = timer.delay;
            let event = timer.event.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {
                        let _ = tx.send(SelfEvent::Fired { node: idx, invocation, event });
                    }
                }
            });
        }

        for service in &node.services {
            match &service.kind {
                ServiceKind::Task(f) => {
                    let invocation = Uuid::new_v4();
                    entry.invocations.insert(invocation);
                    let fut = f(cancel.child_token());
                    let tx = self.tx.clone();
                    let token = cancel.child_token();
                    let sid = service.id.clone();
                    let handled = service.handles_error;
                    tracing::debug!(node = %graph.id(idx), service = %sid, "task started");
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = token.cancelled() => {}
                            result = fut => {
                                let msg = match result {
                                    Ok(()) => SelfEvent::Fired {
                                        node: idx,
                                        invocation,
                                        event: Event::service_done(&sid, None),
                                    },
                                    Err(err) => SelfEvent::Failed {
                                        node: idx,
                                        invocation,
                                        service: sid,
                                        reason: err.to_string(),
                                        handled,
                                    },
                                };
                                let _ = tx.send(msg);
                            }
                        }
                    });
                }
                ServiceKind::TaskWithData(f) => {
                    let invocation = Uuid::new_v4();
                    entry.invocations.insert(invocation);
                    let fut = f(cancel.child_token());
                    let tx = self.tx.clone();
                    let token = cancel.child_token();
                    let sid = service.id.clone();
                    let handled = service.handles_error;
                    tracing::debug!(node = %graph.id(idx), service = %sid, "task started");
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = token.cancelled() => {}
                            result = fut => {
                                let msg = match result {
                                    Ok(data) => SelfEvent::Fired {
                                        node: idx,
                                        invocation,
                                        event: Event::service_done(&sid, Some(data)),
                                    },
                                    Err(err) => SelfEvent::Failed {
                                        node: idx,
                                        invocation,
                                        service: sid,
                                        reason: err.to_string(),
                                        handled,
                                    },
                                };
                                let _ = tx.send(msg);
                            }
                        }
                    });
                }
                ServiceKind::Activity { start, stop } => {
                    tracing::debug!(node = %graph.id(idx), service = %service.id, "activity started");
                    start();
                    entry.stops.push(stop.clone());
                }
            }
        }

        self.nodes.insert(idx, entry);
    }

    /// Arms a one-shot timer owned by `node` that enqueues `event` after
    /// `delay`. Used for delayed events reaching the runtime, which belong
    /// to the machine root and die with it.
    pub(crate) fn schedule(&mut self, node: usize, delay: Duration, event: Event) {
        let entry = self.nodes.entry(node).or_insert_with(|| NodeServices {
            cancel: CancellationToken::new(),
            invocations: HashSet::new(),
            stops: Vec::new(),
        });
        let invocation = Uuid::new_v4();
        entry.invocations.insert(invocation);
        let tx = self.tx.clone();
        let token = entry.cancel.child_token();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(SelfEvent::Fired { node, invocation, event });
                }
            }
        });
    }

    /// Cancels everything owned by `idx`: timers and tasks stop producing
    /// events, activities get their stop callback. Called after the node's
    /// exit actions have run.
    pub(crate) fn cancel_node(&mut self, idx: usize) {
        if let Some(entry) = self.nodes.remove(&idx) {
            entry.cancel.cancel();
            for stop in &entry.stops {
                stop();
            }
        }
    }

    /// Whether `invocation` belongs to the current entry of `node`.
    pub(crate) fn is_current(&self, node: usize, invocation: Uuid) -> bool {
        self.nodes
            .get(&node)
            .map(|entry| entry.invocations.contains(&invocation))
            .unwrap_or(false)
    }

    /// Marks an invocation as delivered; it no longer counts as pending.
    pub(crate) fn retire(&mut self, node: usize, invocation: Uuid) {
        if let Some(entry) = self.nodes.get_mut(&node) {
            entry.invocations.remove(&invocation);
        }
    }

    fn has_pending(&self) -> bool {
        self.nodes.values().any(|entry| !entry.invocations.is_empty())
    }

    /// Next timer/service outcome, or `None` when nothing is outstanding
    /// and the channel is drained.
    pub(crate) async fn next(&mut self) -> Option<SelfEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(mpsc::error::TryRecvError::Empty) => {
                if self.has_pending() {
                    self.rx.recv().await
                } else {
                    None
                }
            }
            Err(mpsc::error::TryRecvError::Disconnected) => None,
        }
    }
}
