//! `stepwise run`: headless agent run with JSON Lines output.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Args;
use stepwise_agent::{Agent, ErrorData, JsonOutputHandler, Trajectory, error_chain, traceback};
use stepwise_config::{AgentMode, AppConfig};
use stepwise_core::event::{Event, EventKind, OutputHandler};
use stepwise_environment::LocalEnvironment;
use stepwise_providers::LlmModel;
use stepwise_telemetry::GlobalModelStats;
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::{ConfigArgs, describe};

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Task for the agent
    #[arg(short, long)]
    pub task: Option<String>,

    #[command(flatten)]
    pub source: ConfigArgs,

    /// Model name, optionally prefixed with its provider (e.g. "openai/gpt-4o")
    #[arg(short, long)]
    pub model: Option<String>,

    /// Cost limit in USD (0 disables)
    #[arg(short = 'l', long)]
    pub cost_limit: Option<f64>,

    /// Step limit (0 disables)
    #[arg(long)]
    pub step_limit: Option<u32>,

    /// Run actions without confirmation
    #[arg(short, long)]
    pub yolo: bool,

    /// Trajectory file (default: .stepwise/data/last_run.traj.json)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Omit timestamps from events
    #[arg(long)]
    pub no_timestamps: bool,
}

impl RunArgs {
    /// Apply command-line overrides on top of the loaded configuration.
    pub fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(model) = &self.model {
            config.model.model_name = Some(model.clone());
        }
        if let Some(limit) = self.cost_limit {
            config.agent.cost_limit = limit;
        }
        if let Some(limit) = self.step_limit {
            config.agent.step_limit = limit;
        }
        if self.yolo {
            config.agent.mode = AgentMode::Yolo;
        }
        if self.no_timestamps {
            config.headless.include_timestamps = false;
        }
    }
}

const MISSING_TASK: &str = "--task is required in headless mode";

/// Emit an `error` event for a failure that happened before the agent ran.
fn fail(output: &dyn OutputHandler, kind: &str, error: &dyn std::error::Error) -> ExitCode {
    let traceback = error_chain(kind, error);
    emit_error(
        output,
        &ErrorData {
            error: &error.to_string(),
            kind,
            traceback: &traceback,
        },
    )
}

fn emit_error(output: &dyn OutputHandler, data: &ErrorData<'_>) -> ExitCode {
    error!(kind = data.kind, "{}", data.error);
    match Event::new(EventKind::Error, data) {
        Ok(event) => output.emit(event),
        Err(e) => output.report_failure(&format!("JSON output error: {e}")),
    }
    output.flush();
    ExitCode::FAILURE
}

pub async fn run(args: RunArgs) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let home = args.source.home();
    let setup_output = JsonOutputHandler::stdout(!args.no_timestamps);

    let (mut config, source) = match args.source.load(&home) {
        Ok(loaded) => loaded,
        Err(e) => return Ok(fail(&setup_output, "ConfigError", &e)),
    };
    args.apply_overrides(&mut config);
    if let Err(e) = config.validate() {
        return Ok(fail(&setup_output, "ConfigError", &e));
    }
    info!(source = %describe(&source), model = %config.model.model_name(), "Configuration loaded");

    let Some(task) = args.task.as_deref().filter(|t| !t.trim().is_empty()) else {
        let data = ErrorData {
            error: MISSING_TASK,
            kind: "UsageError",
            traceback: "",
        };
        return Ok(emit_error(&setup_output, &data));
    };

    let (interrupt_tx, interrupt_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, aborting the current model query");
            let _ = interrupt_tx.send(true);
        }
    });

    let stats = GlobalModelStats::shared();
    let model = match LlmModel::from_config(config.model.clone(), stats.clone()) {
        Ok(model) => model.with_interrupt(interrupt_rx),
        Err(e) => return Ok(fail(&setup_output, e.kind(), &e)),
    };

    let cwd = match &config.environment.cwd {
        Some(cwd) => home.workdir().join(cwd),
        None => home.workdir().to_path_buf(),
    };
    let env = LocalEnvironment::new(&config.environment).with_cwd(cwd);

    let output = Arc::new(JsonOutputHandler::stdout(config.headless.include_timestamps));
    let mut agent = match Agent::new(Box::new(model), Arc::new(env), output.clone(), config.agent.clone()) {
        Ok(agent) => agent.with_max_output_length(config.headless.max_output_length),
        Err(e) => return Ok(fail(&*output, e.kind(), &e)),
    };

    let outcome = agent.run(task).await;

    let (trajectory, code) = match &outcome {
        Ok((status, result)) => (
            Trajectory::from_agent(&agent, Some(status.clone()), Some(result.clone())),
            ExitCode::SUCCESS,
        ),
        Err(e) => {
            error!(error = %e, "Error running agent");
            (
                Trajectory::from_agent(&agent, Some(e.kind().to_string()), Some(e.to_string()))
                    .with_traceback(traceback(e)),
                ExitCode::FAILURE,
            )
        }
    };

    let path = args.output.clone().unwrap_or_else(|| home.last_run_path());
    if let Err(e) = trajectory.save(&path) {
        error!(path = %path.display(), error = %e, "Failed to save trajectory");
    }

    let usage = stats.snapshot();
    info!(
        total_cost = usage.cost,
        total_calls = usage.n_calls,
        "Global model usage"
    );

    Ok(code)
}
