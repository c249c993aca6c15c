//! Run trajectories: the conversation and outcome of one run, saved as JSON.

use std::path::Path;

use serde::{Deserialize, Serialize};
use stepwise_core::error::Result;
use stepwise_core::message::Message;
use tracing::info;

use crate::loop_runner::Agent;

pub const TRAJECTORY_FORMAT: &str = "stepwise-1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelStats {
    pub instance_cost: f64,
    pub api_calls: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectoryInfo {
    /// Id of the run's conversation
    pub run_id: String,
    pub exit_status: Option<String>,
    pub submission: Option<String>,
    pub model_stats: ModelStats,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trajectory {
    pub info: TrajectoryInfo,
    pub messages: Vec<Message>,
    pub trajectory_format: String,
}

impl Trajectory {
    /// Snapshot `agent` after a run ended with `exit_status` and `submission`.
    pub fn from_agent(
        agent: &Agent,
        exit_status: Option<String>,
        submission: Option<String>,
    ) -> Self {
        Self {
            info: TrajectoryInfo {
                run_id: agent.conversation().id.to_string(),
                exit_status,
                submission,
                model_stats: ModelStats {
                    instance_cost: agent.model().cost(),
                    api_calls: agent.model().n_calls(),
                },
                version: env!("CARGO_PKG_VERSION").to_string(),
                traceback: None,
            },
            messages: agent.conversation().messages.clone(),
            trajectory_format: TRAJECTORY_FORMAT.to_string(),
        }
    }

    pub fn with_traceback(mut self, traceback: impl Into<String>) -> Self {
        self.info.traceback = Some(traceback.into());
        self
    }

    /// Write the trajectory as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!(path = %path.display(), "Saved trajectory");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}
