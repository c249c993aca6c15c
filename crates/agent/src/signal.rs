//! Step outcomes.
//!
//! Every step ends in exactly one [`StepOutcome`]. Recoverable signals feed
//! their message back to the model and the loop continues; terminal
//! signals end the run with a named status. Anything else is an
//! unclassified [`stepwise_core::Error`] and propagates out of the loop.

use serde::Serialize;

/// The result of executing one action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    pub action: String,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

/// Signals that append feedback and let the loop continue.
#[derive(Debug, Clone, PartialEq)]
pub enum Recoverable {
    /// The reply held zero or several actions.
    FormatError(String),
    /// The command exceeded the environment timeout.
    ExecutionTimeout(String),
    /// The environment failed to run the command.
    EnvironmentError(String),
}

impl Recoverable {
    pub fn name(&self) -> &'static str {
        match self {
            Self::FormatError(_) => "FormatError",
            Self::ExecutionTimeout(_) => "ExecutionTimeoutError",
            Self::EnvironmentError(_) => "EnvironmentError",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::FormatError(m) | Self::ExecutionTimeout(m) | Self::EnvironmentError(m) => m,
        }
    }
}

/// Signals that end the run.
#[derive(Debug, Clone, PartialEq)]
pub enum Terminal {
    StepLimit(String),
    CostLimit(String),
    /// The model submitted its final output.
    Submitted(String),
}

impl Terminal {
    /// Status reported in the `finish` event and the trajectory.
    pub fn status(&self) -> &'static str {
        match self {
            Self::StepLimit(_) => "StepLimit",
            Self::CostLimit(_) => "CostLimit",
            Self::Submitted(_) => "Submitted",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::StepLimit(m) | Self::CostLimit(m) | Self::Submitted(m) => m,
        }
    }
}

/// How one step ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Observed(Observation),
    Continue(Recoverable),
    Terminate(Terminal),
}
