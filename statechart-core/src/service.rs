//! Invoked services.
//!
//! A service is work bound to the active lifetime of the state node that
//! declares it. Tasks are cancelable async operations whose completion is
//! translated into a synthetic success/error event; activities are a
//! start/stop pair with no inherent completion. Exiting the declaring node
//! cancels the service via the token handed to its entry point.

use crate::action::BoxError;
use crate::transition::ReactionDef;
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Async entry point of a Task service.
pub type TaskFn =
    Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// Async entry point of a TaskWithData service; the produced value is
/// delivered as the payload of the success event.
pub type TaskDataFn =
    Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, Result<Value, BoxError>> + Send + Sync>;

/// Synchronous start/stop callback of an Activity service.
pub type ActivityFn = Arc<dyn Fn() + Send + Sync>;

/// The kind of work a service performs.
#[derive(Clone)]
pub enum ServiceKind {
    /// Cancelable async operation producing success or failure.
    Task(TaskFn),
    /// Same, producing a typed result as event data.
    TaskWithData(TaskDataFn),
    /// Start/stop pair; stop runs synchronously on node exit.
    Activity { start: ActivityFn, stop: ActivityFn },
}

/// A service declared on a state node.
#[derive(Clone)]
pub struct ServiceDef<C> {
    /// Stable service id; defaults to `{node}:{index}` when absent.
    pub id: Option<String>,
    pub kind: ServiceKind,
    /// Fired on Task success, triggered by `done.invoke.{id}`.
    pub on_done: Option<ReactionDef<C>>,
    /// Fired on Task failure, triggered by `error.invoke.{id}`. A failure
    /// with no error reaction is surfaced to the caller as unhandled.
    pub on_error: Option<ReactionDef<C>>,
}

impl<C> ServiceDef<C> {
    pub fn task(
        f: impl Fn(CancellationToken) -> BoxFuture<'static, Result<(), BoxError>>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            id: None,
            kind: ServiceKind::Task(Arc::new(f)),
            on_done: None,
            on_error: None,
        }
    }

    pub fn task_with_data(
        f: impl Fn(CancellationToken) -> BoxFuture<'static, Result<Value, BoxError>>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            id: None,
            kind: ServiceKind::TaskWithData(Arc::new(f)),
            on_done: None,
            on_error: None,
        }
    }

    pub fn activity(
        start: impl Fn() + Send + Sync + 'static,
        stop: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: None,
            kind: ServiceKind::Activity {
                start: Arc::new(start),
                stop: Arc::new(stop),
            },
            on_done: None,
            on_error: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn on_done(mut self, reaction: ReactionDef<C>) -> Self {
        self.on_done = Some(reaction);
        self
    }

    pub fn on_error(mut self, reaction: ReactionDef<C>) -> Self {
        self.on_error = Some(reaction);
        self
    }
}

impl<C> fmt::Debug for ServiceDef<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ServiceKind::Task(_) => "Task",
            ServiceKind::TaskWithData(_) => "TaskWithData",
            ServiceKind::Activity { .. } => "Activity",
        };
        f.debug_struct("ServiceDef")
            .field("id", &self.id)
            .field("kind", &kind)
            .field("on_done", &self.on_done.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}
