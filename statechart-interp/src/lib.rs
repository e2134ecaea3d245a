//! # statechart-interp
//!
//! Execution side of the statechart engine: transition selection, microstep
//! planning, the run-to-quiescence loop, and timer/service lifecycle bound
//! to state activity. The static model lives in `statechart-core`.
//!
//! ```no_run
//! use statechart_core::{Event, MachineDef, StateDef, Statechart, Target, TransitionDef};
//! use statechart_interp::Interpreter;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let def = MachineDef::new(
//!     StateDef::compound(
//!         "light",
//!         "red",
//!         vec![
//!             StateDef::atomic("red")
//!                 .on(TransitionDef::on(Event::named("GO"), Target::sibling("green"))),
//!             StateDef::atomic("green")
//!                 .on(TransitionDef::on(Event::named("STOP"), Target::sibling("red"))),
//!         ],
//!     ),
//!     (),
//! );
//! let mut machine = Interpreter::new(Statechart::new(def)?);
//! machine.start()?;
//! machine.send(Event::named("GO"))?;
//! assert_eq!(machine.active(), vec!["light", "light.green"]);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod interpreter;
pub mod microstep;
pub mod select;
mod services;

pub use error::InterpreterError;
pub use interpreter::{Interpreter, Status};
pub use microstep::Microstep;
pub use select::TransitionRef;
