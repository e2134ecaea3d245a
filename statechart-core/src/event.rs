//! Events.
//!
//! Named and custom-data events are equal when their names are equal; the
//! payload never participates in matching. Immediate is the eventless
//! trigger used for "always" transitions and for the settle probe. Delayed
//! events only appear as transition triggers; the resolver rewrites them
//! into timer-scheduled named events.

use crate::id::NodeId;
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// An event, either external input or internally raised.
#[derive(Debug, Clone)]
pub enum Event {
    /// String-identified event.
    Named(String),
    /// Eventless trigger; always eligible, highest priority.
    Immediate,
    /// Fires `event` after `delay`, counted from entry of the declaring node.
    Delayed { delay: Duration, event: Box<Event> },
    /// Named event with a payload.
    Custom { name: String, data: Value },
}

impl Event {
    pub fn named(name: impl Into<String>) -> Self {
        Event::Named(name.into())
    }

    pub fn custom(name: impl Into<String>, data: Value) -> Self {
        Event::Custom {
            name: name.into(),
            data,
        }
    }

    pub fn delayed(delay: Duration, event: Event) -> Self {
        Event::Delayed {
            delay,
            event: Box::new(event),
        }
    }

    /// Completion event raised when a final child of `node` is entered.
    pub fn done_state(node: &NodeId) -> Self {
        Event::Named(format!("done.state.{node}"))
    }

    /// Success event for a completed service invocation.
    pub fn service_done(service: &str, data: Option<Value>) -> Self {
        let name = format!("done.invoke.{service}");
        match data {
            Some(data) => Event::Custom { name, data },
            None => Event::Named(name),
        }
    }

    /// Failure event for a service invocation.
    pub fn service_error(service: &str, reason: impl Into<String>) -> Self {
        Event::Custom {
            name: format!("error.invoke.{service}"),
            data: Value::String(reason.into()),
        }
    }

    /// Synthetic trigger name for a delayed transition on `node`.
    pub fn after_name(delay: Duration, node: &NodeId) -> String {
        format!("after.{}.{node}", delay.as_millis())
    }

    /// The event name, if any (`None` for Immediate).
    pub fn name(&self) -> Option<&str> {
        match self {
            Event::Named(name) | Event::Custom { name, .. } => Some(name),
            Event::Delayed { event, .. } => event.name(),
            Event::Immediate => None,
        }
    }

    /// Payload carried by the event, if any.
    pub fn data(&self) -> Option<&Value> {
        match self {
            Event::Custom { data, .. } => Some(data),
            _ => None,
        }
    }

    pub fn is_immediate(&self) -> bool {
        matches!(self, Event::Immediate)
    }
}

// Equality by name for Named/Custom; payloads are ignored.
impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Event::Immediate, Event::Immediate) => true,
            (
                Event::Delayed { delay: a, event: x },
                Event::Delayed { delay: b, event: y },
            ) => a == b && x == y,
            _ => match (self.name(), other.name()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

impl Eq for Event {}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Immediate => f.write_str("<immediate>"),
            Event::Delayed { delay, event } => {
                write!(f, "<after {:?}: {event}>", delay)
            }
            Event::Named(name) | Event::Custom { name, .. } => f.write_str(name),
        }
    }
}
