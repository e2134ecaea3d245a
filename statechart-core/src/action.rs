//! Actions attached to transitions and to state entry/exit.
//!
//! Log, Assign, and Effect come in three arities: context-free,
//! context-aware, and context-plus-event-data. Assign and Effect are
//! fallible; an error aborts the remainder of the action list for the
//! current microstep and is surfaced to the caller. The infallible
//! constructors wrap the closure in `Ok` for the common case.

use crate::event::Event;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Boxed error type carried out of user closures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// An action run during a microstep.
#[derive(Clone)]
pub enum Action<C> {
    /// Enqueue an external event for the machine.
    Send(Event),
    /// Enqueue an internal event, processed before the macrostep settles.
    Raise(Event),
    /// Emit a log line.
    Log(LogAction<C>),
    /// Replace the context value.
    Assign(AssignAction<C>),
    /// Arbitrary side effect.
    Effect(EffectAction<C>),
}

#[derive(Clone)]
pub enum LogAction<C> {
    Message(String),
    FromContext(Arc<dyn Fn(&C) -> String + Send + Sync>),
    FromContextAndData(Arc<dyn Fn(&C, &Value) -> String + Send + Sync>),
}

#[derive(Clone)]
pub enum AssignAction<C> {
    Replace(Arc<dyn Fn() -> C + Send + Sync>),
    Map(Arc<dyn Fn(&C) -> Result<C, BoxError> + Send + Sync>),
    MapWithData(Arc<dyn Fn(&C, &Value) -> Result<C, BoxError> + Send + Sync>),
}

#[derive(Clone)]
pub enum EffectAction<C> {
    Run(Arc<dyn Fn() -> Result<(), BoxError> + Send + Sync>),
    WithContext(Arc<dyn Fn(&C) -> Result<(), BoxError> + Send + Sync>),
    WithContextAndData(Arc<dyn Fn(&C, &Value) -> Result<(), BoxError> + Send + Sync>),
}

impl<C> Action<C> {
    pub fn send(event: Event) -> Self {
        Action::Send(event)
    }

    pub fn raise(event: Event) -> Self {
        Action::Raise(event)
    }

    pub fn log(message: impl Into<String>) -> Self {
        Action::Log(LogAction::Message(message.into()))
    }

    pub fn log_ctx(f: impl Fn(&C) -> String + Send + Sync + 'static) -> Self {
        Action::Log(LogAction::FromContext(Arc::new(f)))
    }

    pub fn log_ctx_data(f: impl Fn(&C, &Value) -> String + Send + Sync + 'static) -> Self {
        Action::Log(LogAction::FromContextAndData(Arc::new(f)))
    }

    /// Context-free assignment: replaces the context wholesale.
    pub fn assign_value(f: impl Fn() -> C + Send + Sync + 'static) -> Self {
        Action::Assign(AssignAction::Replace(Arc::new(f)))
    }

    /// Context-aware assignment.
    pub fn assign(f: impl Fn(&C) -> C + Send + Sync + 'static) -> Self {
        Action::Assign(AssignAction::Map(Arc::new(move |c| Ok(f(c)))))
    }

    pub fn try_assign(f: impl Fn(&C) -> Result<C, BoxError> + Send + Sync + 'static) -> Self {
        Action::Assign(AssignAction::Map(Arc::new(f)))
    }

    /// Assignment that also sees the triggering event's payload.
    pub fn assign_data(f: impl Fn(&C, &Value) -> C + Send + Sync + 'static) -> Self {
        Action::Assign(AssignAction::MapWithData(Arc::new(move |c, d| Ok(f(c, d)))))
    }

    pub fn try_assign_data(
        f: impl Fn(&C, &Value) -> Result<C, BoxError> + Send + Sync + 'static,
    ) -> Self {
        Action::Assign(AssignAction::MapWithData(Arc::new(f)))
    }

    pub fn effect(f: impl Fn() + Send + Sync + 'static) -> Self {
        Action::Effect(EffectAction::Run(Arc::new(move || {
            f();
            Ok(())
        })))
    }

    pub fn try_effect(f: impl Fn() -> Result<(), BoxError> + Send + Sync + 'static) -> Self {
        Action::Effect(EffectAction::Run(Arc::new(f)))
    }

    pub fn effect_ctx(f: impl Fn(&C) + Send + Sync + 'static) -> Self {
        Action::Effect(EffectAction::WithContext(Arc::new(move |c| {
            f(c);
            Ok(())
        })))
    }

    pub fn effect_ctx_data(f: impl Fn(&C, &Value) + Send + Sync + 'static) -> Self {
        Action::Effect(EffectAction::WithContextAndData(Arc::new(move |c, d| {
            f(c, d);
            Ok(())
        })))
    }
}

impl<C> fmt::Debug for Action<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Send(e) => write!(f, "Send({e})"),
            Action::Raise(e) => write!(f, "Raise({e})"),
            Action::Log(LogAction::Message(m)) => write!(f, "Log({m:?})"),
            Action::Log(_) => f.write_str("Log(<fn>)"),
            Action::Assign(_) => f.write_str("Assign(<fn>)"),
            Action::Effect(_) => f.write_str("Effect(<fn>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_constructors_wrap_infallible() {
        let action: Action<u32> = Action::assign(|c| c + 1);
        match action {
            Action::Assign(AssignAction::Map(f)) => assert_eq!(f(&1).unwrap(), 2),
            _ => panic!("expected Map assignment"),
        }
    }

    #[test]
    fn test_debug_does_not_require_closure_debug() {
        let action: Action<u32> = Action::effect(|| {});
        assert_eq!(format!("{action:?}"), "Effect(<fn>)");
    }
}
