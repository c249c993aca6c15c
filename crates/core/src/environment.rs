//! Environment trait: the abstraction over command execution.
//!
//! The agent hands every extracted action to an Environment and turns the
//! result into an observation. Process and filesystem side effects are the
//! environment's business, not the loop's.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EnvironmentError;

/// The raw result of executing one command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutput {
    /// Combined command output
    pub output: String,

    /// Process exit code (None when killed by a signal)
    pub returncode: Option<i32>,
}

impl ExecutionOutput {
    pub fn new(output: impl Into<String>, returncode: Option<i32>) -> Self {
        Self {
            output: output.into(),
            returncode,
        }
    }
}

/// A sandbox able to run shell commands.
#[async_trait]
pub trait Environment: Send + Sync {
    /// Execute `command`. An empty `cwd` means the environment's default
    /// working directory.
    async fn execute(
        &self,
        command: &str,
        cwd: &str,
    ) -> std::result::Result<ExecutionOutput, EnvironmentError>;

    /// The working directory commands run in by default.
    fn cwd(&self) -> String;

    /// Variables exposed to prompt templates.
    fn template_vars(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut vars = serde_json::Map::new();
        vars.insert("cwd".into(), self.cwd().into());
        vars
    }
}
