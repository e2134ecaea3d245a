//! Transition guards.
//!
//! A guarded transition carries one or more guards. Evaluation order is
//! fixed by kind: in-state predicate, then condition over context, then
//! condition over context plus event data. The first guard present in that
//! order governs enablement; later kinds on the same transition are not
//! consulted.

use crate::action::BoxError;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// A guard on a transition.
#[derive(Clone)]
pub enum Guard<C> {
    /// Holds when the node at the given absolute path (names from the root,
    /// root name excluded) is in the active configuration.
    InState(Vec<String>),
    /// Boolean condition over the context.
    Cond(Arc<dyn Fn(&C) -> Result<bool, BoxError> + Send + Sync>),
    /// Boolean condition over the context and the triggering event's data.
    CondData(Arc<dyn Fn(&C, &Value) -> Result<bool, BoxError> + Send + Sync>),
}

impl<C> Guard<C> {
    pub fn in_state<I, S>(path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Guard::InState(path.into_iter().map(Into::into).collect())
    }

    pub fn cond(f: impl Fn(&C) -> bool + Send + Sync + 'static) -> Self {
        Guard::Cond(Arc::new(move |c| Ok(f(c))))
    }

    pub fn try_cond(f: impl Fn(&C) -> Result<bool, BoxError> + Send + Sync + 'static) -> Self {
        Guard::Cond(Arc::new(f))
    }

    pub fn cond_data(f: impl Fn(&C, &Value) -> bool + Send + Sync + 'static) -> Self {
        Guard::CondData(Arc::new(move |c, d| Ok(f(c, d))))
    }

    pub fn try_cond_data(
        f: impl Fn(&C, &Value) -> Result<bool, BoxError> + Send + Sync + 'static,
    ) -> Self {
        Guard::CondData(Arc::new(f))
    }

    /// Rank used to order guard kinds for evaluation.
    pub fn kind_rank(&self) -> u8 {
        match self {
            Guard::InState(_) => 0,
            Guard::Cond(_) => 1,
            Guard::CondData(_) => 2,
        }
    }
}

impl<C> fmt::Debug for Guard<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Guard::InState(path) => write!(f, "InState({})", path.join(".")),
            Guard::Cond(_) => f.write_str("Cond(<fn>)"),
            Guard::CondData(_) => f.write_str("CondData(<fn>)"),
        }
    }
}
