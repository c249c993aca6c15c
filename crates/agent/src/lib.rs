//! The Stepwise agent loop.
//!
//! The agent follows a **Query → Act → Observe** cycle:
//!
//! 1. **Check limits** (steps taken, money spent)
//! 2. **Query** the model with the whole conversation
//! 3. **Extract** exactly one shell action from the reply
//! 4. **Execute** it in the environment and append the observation
//!
//! The loop continues until a terminal signal: a limit is reached or the
//! model submits its final output. Every transition is streamed as a JSON
//! Lines event.

pub mod action;
pub mod loop_runner;
pub mod output;
pub mod signal;
pub mod template;
pub mod trajectory;

#[cfg(test)]
mod test_helpers;

pub use action::{ActionParser, SUBMIT_MARKER};
pub use loop_runner::{Agent, error_chain, traceback};
pub use output::{ErrorData, JsonOutputHandler};
pub use signal::{Observation, Recoverable, StepOutcome, Terminal};
pub use template::Templates;
pub use trajectory::{ModelStats, Trajectory, TrajectoryInfo};
