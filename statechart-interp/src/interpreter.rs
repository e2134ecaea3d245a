//! The run loop.
//!
//! `start` enters the initial configuration; `send` feeds an external event
//! and runs the machine to quiescence (eventless transitions and raised
//! events drain before the next external event is taken); `wait` parks on
//! the next timer or service outcome. The configuration invariant is
//! checked after every macrostep.

use crate::error::InterpreterError;
use crate::microstep;
use crate::select::{self, TransitionRef};
use crate::services::{SelfEvent, ServiceManager};
use serde_json::Value;
use statechart_core::{
    Action, AssignAction, BoxError, EffectAction, Event, LogAction, ResolvedGraph, State,
    StateConfiguration, StateKind, StateSnapshot, Statechart, Trigger,
};
use std::collections::{BTreeSet, VecDeque};

/// Lifecycle of an interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Constructed, not yet started.
    Idle,
    /// Started and accepting events.
    Running,
    /// The root completed; all events are ignored.
    Done,
}

type MacrostepHook<C> = Box<dyn FnMut(&State<C>) + Send>;

/// Executes one statechart instance.
///
/// Timers and services are spawned on the ambient tokio runtime; a machine
/// without either runs fine outside one.
pub struct Interpreter<C> {
    graph: ResolvedGraph<C>,
    state: State<C>,
    status: Status,
    services: ServiceManager,
    /// Raised events, drained before the next external event.
    internal: VecDeque<Event>,
    /// Sent events, processed in arrival order.
    external: VecDeque<Event>,
    hook: Option<MacrostepHook<C>>,
}

impl<C> Interpreter<C> {
    pub fn new(chart: Statechart<C>) -> Self {
        let Statechart {
            graph,
            initial_context,
        } = chart;
        Self {
            graph,
            state: State::new(StateConfiguration::empty(), initial_context),
            status: Status::Idle,
            services: ServiceManager::new(),
            internal: VecDeque::new(),
            external: VecDeque::new(),
            hook: None,
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn state(&self) -> &State<C> {
        &self.state
    }

    pub fn graph(&self) -> &ResolvedGraph<C> {
        &self.graph
    }

    /// Active node paths in document order.
    pub fn active(&self) -> Vec<String> {
        self.state
            .configuration
            .active_ids(&self.graph)
            .into_iter()
            .map(|id| id.to_string())
            .collect()
    }

    /// Registers a callback invoked with the settled state after every
    /// macrostep.
    pub fn on_macrostep(&mut self, hook: impl FnMut(&State<C>) + Send + 'static) {
        self.hook = Some(Box::new(hook));
    }

    /// Enters the initial configuration and settles.
    pub fn start(&mut self) -> Result<&State<C>, InterpreterError> {
        if self.status != Status::Idle {
            return Err(InterpreterError::AlreadyStarted);
        }
        self.status = Status::Running;
        tracing::debug!(machine = %self.graph.id(self.graph.root()), "starting");

        let mut entered = BTreeSet::new();
        entered.insert(self.graph.root());
        microstep::expand_entry(
            &self.graph,
            &mut entered,
            &BTreeSet::new(),
            &self.state.configuration,
        );
        let entered: Vec<usize> = entered.into_iter().collect();

        self.state.configuration = self.state.configuration.apply(&[], &entered);
        for &idx in &entered {
            Self::run_actions(
                &self.graph,
                &mut self.state,
                &mut self.internal,
                &mut self.external,
                &mut self.services,
                idx,
                "entry",
                &self.graph.node(idx).entry_actions,
                &Event::Immediate,
            )?;
            self.services.start_node(&self.graph, idx);
        }
        self.raise_completions(&entered);
        if self.state.done {
            self.shutdown();
        }
        self.settle()?;
        self.finish_macrostep()?;
        self.pump()?;
        Ok(&self.state)
    }

    /// Resumes from a persisted snapshot: the configuration and context are
    /// restored, timers and services of active nodes are re-armed, entry
    /// actions are not replayed.
    pub fn start_from(&mut self, snapshot: &StateSnapshot) -> Result<&State<C>, InterpreterError>
    where
        C: for<'de> serde::Deserialize<'de>,
    {
        if self.status != Status::Idle {
            return Err(InterpreterError::AlreadyStarted);
        }
        let state: State<C> = snapshot.restore(&self.graph)?;
        state.configuration.validate(&self.graph)?;
        self.state = state;
        if self.state.done {
            self.status = Status::Done;
            return Ok(&self.state);
        }
        self.status = Status::Running;
        tracing::debug!(machine = %self.graph.id(self.graph.root()), "resuming from snapshot");

        let active: Vec<usize> = self.state.configuration.iter().collect();
        for idx in active {
            self.services.start_node(&self.graph, idx);
        }
        self.settle()?;
        self.finish_macrostep()?;
        self.pump()?;
        Ok(&self.state)
    }

    /// Feeds an external event and runs to quiescence. Events sent to a
    /// done machine are ignored; events no active node handles are
    /// dropped. A `Delayed` event is not dispatched here: it becomes a
    /// root-owned timer and arrives through [`Interpreter::wait`] after
    /// its delay.
    pub fn send(&mut self, event: Event) -> Result<&State<C>, InterpreterError> {
        match self.status {
            Status::Idle => return Err(InterpreterError::NotStarted),
            Status::Done => return Ok(&self.state),
            Status::Running => {}
        }
        self.enqueue_external(event);
        self.pump()?;
        Ok(&self.state)
    }

    /// Parks until the next timer or service outcome arrives, admits it,
    /// and runs to quiescence. Outcomes from a superseded node entry are
    /// dropped without waking the machine.
    pub async fn wait(&mut self) -> Result<&State<C>, InterpreterError> {
        if self.status == Status::Idle {
            return Err(InterpreterError::NotStarted);
        }
        loop {
            if self.status == Status::Done {
                return Ok(&self.state);
            }
            match self.services.next().await {
                None => return Err(InterpreterError::NoPendingWork),
                Some(SelfEvent::Fired {
                    node,
                    invocation,
                    event,
                }) => {
                    if !self.services.is_current(node, invocation) {
                        tracing::trace!(event = %event, "stale completion dropped");
                        continue;
                    }
                    self.services.retire(node, invocation);
                    self.enqueue_external(event);
                    self.pump()?;
                    return Ok(&self.state);
                }
                Some(SelfEvent::Failed {
                    node,
                    invocation,
                    service,
                    reason,
                    handled,
                }) => {
                    if !self.services.is_current(node, invocation) {
                        tracing::trace!(service = %service, "stale failure dropped");
                        continue;
                    }
                    self.services.retire(node, invocation);
                    if !handled {
                        return Err(InterpreterError::UnhandledServiceFailure { service, reason });
                    }
                    self.enqueue_external(Event::service_error(&service, reason));
                    self.pump()?;
                    return Ok(&self.state);
                }
            }
        }
    }

    /// Drives timers and services until the root completes. Fails with
    /// [`InterpreterError::NoPendingWork`] if the machine quiesces with
    /// nothing outstanding before then.
    pub async fn run(&mut self) -> Result<&State<C>, InterpreterError> {
        while self.status != Status::Done {
            self.wait().await?;
        }
        Ok(&self.state)
    }

    /// Event names that would fire a transition from the current state.
    pub fn next_events(&self) -> Vec<String> {
        let mut names: BTreeSet<&str> = BTreeSet::new();
        for idx in self.state.configuration.iter() {
            for transition in &self.graph.node(idx).transitions {
                if transition.completes_machine {
                    continue;
                }
                if let Trigger::Named(name) = &transition.trigger {
                    names.insert(name);
                }
            }
        }
        names
            .into_iter()
            .filter(|name| {
                select::select(
                    &self.graph,
                    &self.state.configuration,
                    &self.state.context,
                    &Event::named(*name),
                )
                .map(|selected| !selected.is_empty())
                .unwrap_or(false)
            })
            .map(String::from)
            .collect()
    }

    /// SCXML-style final check: a compound is final when its active child
    /// is a final state, an orthogonal when every region is.
    pub fn in_final_state(&self, idx: usize) -> bool {
        let node = self.graph.node(idx);
        match node.kind {
            StateKind::Atomic => false,
            StateKind::Final => true,
            StateKind::Compound => node.children.iter().any(|&c| {
                self.state.configuration.contains(c) && self.graph.node(c).kind == StateKind::Final
            }),
            StateKind::Orthogonal => node.children.iter().all(|&r| self.in_final_state(r)),
        }
    }

    // =========================================================================
    // Run-to-quiescence machinery
    // =========================================================================

    /// Drains the external queue: each event is dispatched, settled, and
    /// published as one macrostep.
    fn pump(&mut self) -> Result<(), InterpreterError> {
        while !self.state.done {
            let Some(event) = self.external.pop_front() else {
                break;
            };
            self.dispatch(&event)?;
            self.settle()?;
            self.finish_macrostep()?;
        }
        Ok(())
    }

    /// Validates the settled configuration and fires the observation hook.
    fn finish_macrostep(&mut self) -> Result<(), InterpreterError> {
        self.state.configuration.validate(&self.graph)?;
        if let Some(hook) = &mut self.hook {
            hook(&self.state);
        }
        Ok(())
    }

    /// Delayed events never queue directly; everything else does.
    fn enqueue_external(&mut self, event: Event) {
        match event {
            Event::Delayed { delay, event } => {
                self.services.schedule(self.graph.root(), delay, *event)
            }
            event => self.external.push_back(event),
        }
    }

    /// Runs raised events and eventless transitions to fixpoint. The
    /// internal queue drains first; the eventless probe runs on the
    /// resulting configuration.
    fn settle(&mut self) -> Result<(), InterpreterError> {
        loop {
            if self.state.done {
                break;
            }
            if let Some(event) = self.internal.pop_front() {
                self.dispatch(&event)?;
                continue;
            }
            let selected = select::select(
                &self.graph,
                &self.state.configuration,
                &self.state.context,
                &Event::Immediate,
            )?;
            if selected.is_empty() {
                break;
            }
            self.apply_step(&Event::Immediate, &selected)?;
        }
        Ok(())
    }

    fn dispatch(&mut self, event: &Event) -> Result<(), InterpreterError> {
        let selected = select::select(
            &self.graph,
            &self.state.configuration,
            &self.state.context,
            event,
        )?;
        if selected.is_empty() {
            tracing::trace!(event = %event, "event dropped, no enabled transition");
            return Ok(());
        }
        self.apply_step(event, &selected)
    }

    /// Applies one microstep: exit actions and service cancellation deepest
    /// first, transition actions in document order, configuration swap,
    /// entry actions and service start in document order, then completion
    /// events for entered final states.
    fn apply_step(
        &mut self,
        event: &Event,
        selected: &[TransitionRef],
    ) -> Result<(), InterpreterError> {
        let step = microstep::plan(&self.graph, &self.state.configuration, selected);
        tracing::trace!(
            event = %event,
            exited = ?step.exited,
            entered = ?step.entered,
            "microstep"
        );

        for &idx in &step.exited {
            Self::run_actions(
                &self.graph,
                &mut self.state,
                &mut self.internal,
                &mut self.external,
                &mut self.services,
                idx,
                "exit",
                &self.graph.node(idx).exit_actions,
                event,
            )?;
            self.services.cancel_node(idx);
        }

        for tr in &step.transitions {
            let transition = &self.graph.node(tr.node).transitions[tr.index];
            Self::run_actions(
                &self.graph,
                &mut self.state,
                &mut self.internal,
                &mut self.external,
                &mut self.services,
                tr.node,
                "transition",
                &transition.actions,
                event,
            )?;
            if transition.completes_machine {
                self.state.done = true;
            }
        }

        self.state.configuration = self.state.configuration.apply(&step.exited, &step.entered);

        for &idx in &step.entered {
            Self::run_actions(
                &self.graph,
                &mut self.state,
                &mut self.internal,
                &mut self.external,
                &mut self.services,
                idx,
                "entry",
                &self.graph.node(idx).entry_actions,
                event,
            )?;
            self.services.start_node(&self.graph, idx);
        }

        self.raise_completions(&step.entered);

        if self.state.done {
            self.shutdown();
        }
        Ok(())
    }

    /// Raises `done.state.{parent}` for every entered final state, and the
    /// orthogonal grandparent's done event once all its regions are final.
    /// A compound completes as soon as its final child enters; an
    /// orthogonal parent completes only when every region is final. Each
    /// container's done event is raised at most once per microstep.
    fn raise_completions(&mut self, entered: &[usize]) {
        let mut raised: BTreeSet<usize> = BTreeSet::new();
        for &idx in entered {
            if self.graph.node(idx).kind != StateKind::Final {
                continue;
            }
            let Some(parent) = self.graph.parent(idx) else {
                // A final root completes the machine outright.
                self.state.done = true;
                continue;
            };
            let parent_done = self.graph.node(parent).kind != StateKind::Orthogonal
                || self.in_final_state(parent);
            if parent_done && raised.insert(parent) {
                self.internal.push_back(Event::done_state(self.graph.id(parent)));
            }
            if let Some(grand) = self.graph.parent(parent) {
                if self.graph.node(grand).kind == StateKind::Orthogonal
                    && self.in_final_state(grand)
                    && raised.insert(grand)
                {
                    self.internal
                        .push_back(Event::done_state(self.graph.id(grand)));
                }
            }
        }
    }

    /// Terminal cleanup: cancel all live services, drop queued events. The
    /// final configuration remains observable.
    fn shutdown(&mut self) {
        let active: Vec<usize> = self.state.configuration.iter().collect();
        for idx in active {
            self.services.cancel_node(idx);
        }
        self.internal.clear();
        self.external.clear();
        self.status = Status::Done;
        tracing::debug!(machine = %self.graph.id(self.graph.root()), "machine done");
    }

    #[allow(clippy::too_many_arguments)]
    fn run_actions(
        graph: &ResolvedGraph<C>,
        state: &mut State<C>,
        internal: &mut VecDeque<Event>,
        external: &mut VecDeque<Event>,
        services: &mut ServiceManager,
        node: usize,
        phase: &'static str,
        actions: &[Action<C>],
        event: &Event,
    ) -> Result<(), InterpreterError> {
        let data = event.data().unwrap_or(&Value::Null);
        for action in actions {
            match action {
                // Delayed events never queue directly; they become
                // root-owned timers and arrive after their delay.
                Action::Send(Event::Delayed { delay, event }) => {
                    services.schedule(graph.root(), *delay, (**event).clone())
                }
                Action::Raise(Event::Delayed { delay, event }) => {
                    services.schedule(graph.root(), *delay, (**event).clone())
                }
                Action::Send(e) => external.push_back(e.clone()),
                Action::Raise(e) => internal.push_back(e.clone()),
                Action::Log(LogAction::Message(message)) => {
                    tracing::info!(node = %graph.id(node), "{message}")
                }
                Action::Log(LogAction::FromContext(f)) => {
                    tracing::info!(node = %graph.id(node), "{}", f(&state.context))
                }
                Action::Log(LogAction::FromContextAndData(f)) => {
                    tracing::info!(node = %graph.id(node), "{}", f(&state.context, data))
                }
                Action::Assign(AssignAction::Replace(f)) => state.context = f(),
                Action::Assign(AssignAction::Map(f)) => {
                    state.context =
                        f(&state.context).map_err(|e| action_error(graph, node, phase, e))?
                }
                Action::Assign(AssignAction::MapWithData(f)) => {
                    state.context =
                        f(&state.context, data).map_err(|e| action_error(graph, node, phase, e))?
                }
                Action::Effect(EffectAction::Run(f)) => {
                    f().map_err(|e| action_error(graph, node, phase, e))?
                }
                Action::Effect(EffectAction::WithContext(f)) => {
                    f(&state.context).map_err(|e| action_error(graph, node, phase, e))?
                }
                Action::Effect(EffectAction::WithContextAndData(f)) => {
                    f(&state.context, data).map_err(|e| action_error(graph, node, phase, e))?
                }
            }
        }
        Ok(())
    }
}

fn action_error<C>(
    graph: &ResolvedGraph<C>,
    node: usize,
    phase: &'static str,
    source: BoxError,
) -> InterpreterError {
    InterpreterError::Action {
        node: graph.id(node).to_string(),
        phase,
        source,
    }
}
