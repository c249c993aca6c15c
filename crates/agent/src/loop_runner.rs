//! The agent loop.
//!
//! A run renders the system and task prompts, then repeats one step until a
//! terminal signal: check limits, query the model, extract exactly one
//! action, execute it, append the observation. Every transition is
//! reported to the [`OutputHandler`] as one event.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value, json};
use stepwise_config::{AgentConfig, AgentMode};
use stepwise_core::environment::Environment;
use stepwise_core::error::{EnvironmentError, Error, Result};
use stepwise_core::event::{Event, EventKind, OutputHandler};
use stepwise_core::message::{Conversation, Message};
use stepwise_core::model::Model;
use tracing::{debug, info, warn};

use crate::action::{self, ActionParser};
use crate::output::{
    CostData, ErrorData, FinishData, LogData, StartData, StepData, ThoughtData,
};
use crate::signal::{Observation, Recoverable, StepOutcome, Terminal};
use crate::template::{self, Templates};

/// Default cut-off for outputs in `step` events.
pub const DEFAULT_MAX_OUTPUT_LENGTH: usize = 10_000;

/// What a step did, for its `step` event.
struct StepTrace {
    action: String,
    output: String,
}

/// Drives one task from prompt to terminal signal.
pub struct Agent {
    model: Box<dyn Model>,
    env: Arc<dyn Environment>,
    output: Arc<dyn OutputHandler>,
    config: AgentConfig,
    templates: Templates,
    parser: ActionParser,
    conversation: Conversation,
    step_count: u32,
    max_output_length: usize,
    extra_vars: Map<String, Value>,
}

impl Agent {
    /// Build an agent. Fails when a template or the action regex does not
    /// compile.
    pub fn new(
        model: Box<dyn Model>,
        env: Arc<dyn Environment>,
        output: Arc<dyn OutputHandler>,
        config: AgentConfig,
    ) -> Result<Self> {
        if config.mode == AgentMode::Confirm {
            warn!("Confirm mode is not available headless; actions run without confirmation");
        }

        Ok(Self {
            templates: Templates::from_config(&config)?,
            parser: ActionParser::new(&config.action_regex)?,
            model,
            env,
            output,
            config,
            conversation: Conversation::new(),
            step_count: 0,
            max_output_length: DEFAULT_MAX_OUTPUT_LENGTH,
            extra_vars: Map::new(),
        })
    }

    /// Cut outputs in `step` events to this many characters.
    pub fn with_max_output_length(mut self, max: usize) -> Self {
        self.max_output_length = max;
        self
    }

    /// Expose an extra variable to every template.
    pub fn with_template_var(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra_vars.insert(key.into(), value.into());
        self
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn step_count(&self) -> u32 {
        self.step_count
    }

    pub fn model(&self) -> &dyn Model {
        self.model.as_ref()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Run `task` to completion.
    ///
    /// Returns the terminal status and its message. Unclassified failures
    /// are reported as an `error` event and returned unchanged.
    pub async fn run(&mut self, task: &str) -> Result<(String, String)> {
        let workdir = self.env.cwd();
        self.emit(
            EventKind::Start,
            &StartData {
                task,
                model: self.model.model_name(),
                workdir: &workdir,
            },
        );
        info!(model = %self.model.model_name(), workdir = %workdir, "Agent run started");

        match self.run_steps(task).await {
            Ok(signal) => {
                info!(
                    status = signal.status(),
                    steps = self.step_count,
                    cost = self.model.cost(),
                    "Agent run finished"
                );
                self.emit(
                    EventKind::Finish,
                    &FinishData {
                        status: signal.status(),
                        result: signal.message(),
                    },
                );
                self.emit(
                    EventKind::Cost,
                    &CostData {
                        total: self.model.cost(),
                        calls: self.model.n_calls(),
                    },
                );
                self.output.flush();
                Ok((signal.status().to_string(), signal.message().to_string()))
            }
            Err(e) => {
                warn!(error = %e, kind = e.kind(), "Agent run failed");
                let traceback = traceback(&e);
                self.emit(
                    EventKind::Error,
                    &ErrorData {
                        error: &e.to_string(),
                        kind: e.kind(),
                        traceback: &traceback,
                    },
                );
                self.output.flush();
                Err(e)
            }
        }
    }

    async fn run_steps(&mut self, task: &str) -> Result<Terminal> {
        self.extra_vars.insert("task".into(), task.into());
        self.conversation = Conversation::new();
        self.step_count = 0;

        let system = self.render(template::SYSTEM, Map::new())?;
        self.conversation.push(Message::system(system));
        let instance = self.render(template::INSTANCE, Map::new())?;
        self.conversation.push(Message::user(instance));

        loop {
            match self.step().await? {
                StepOutcome::Observed(_) => {}
                StepOutcome::Continue(signal) => {
                    debug!(signal = signal.name(), "Recoverable signal");
                    self.conversation.push(Message::user(signal.message()));
                    self.log("warning", signal.message());
                }
                StepOutcome::Terminate(signal) => {
                    self.conversation.push(Message::user(signal.message()));
                    return Ok(signal);
                }
            }
        }
    }

    /// Perform one step.
    ///
    /// Limits are checked first; a step that hits one ends without querying
    /// the model and without a `step` event.
    pub async fn step(&mut self) -> Result<StepOutcome> {
        if let Some(signal) = self.check_limits() {
            return Ok(StepOutcome::Terminate(signal));
        }
        self.step_count += 1;

        let response = self.model.query(&self.conversation.messages).await?;
        self.conversation
            .push(Message::assistant(response.content.as_str()).with_metadata(response.extra));

        for thought in self.parser.thoughts(&response.content) {
            self.emit(EventKind::Thought, &ThoughtData { content: &thought });
        }

        let (outcome, trace) = self.observe(&response.content).await?;

        let output = action::truncate_output(&trace.output, self.max_output_length);
        self.emit(
            EventKind::Step,
            &StepData {
                step: self.step_count,
                action: &action::truncate_action(&trace.action),
                output: &output,
                cost_so_far: self.model.cost(),
            },
        );

        Ok(outcome)
    }

    fn check_limits(&self) -> Option<Terminal> {
        let step_limit = self.config.step_limit;
        if step_limit > 0 && self.step_count >= step_limit {
            return Some(Terminal::StepLimit(format!(
                "Step limit of {step_limit} steps reached."
            )));
        }

        let cost_limit = self.config.cost_limit;
        let cost = self.model.cost();
        if cost_limit > 0.0 && cost >= cost_limit {
            return Some(Terminal::CostLimit(format!(
                "Cost limit of ${cost_limit:.2} reached (spent ${cost:.4})."
            )));
        }

        None
    }

    /// Parse the reply, execute its action and classify the result.
    async fn observe(&mut self, content: &str) -> Result<(StepOutcome, StepTrace)> {
        let actions = self.parser.actions(content);
        if actions.len() != 1 {
            let locals = locals(json!({"actions": actions, "n_actions": actions.len()}));
            let message = self.render(template::FORMAT_ERROR, locals)?;
            let trace = StepTrace {
                action: String::new(),
                output: message.clone(),
            };
            return Ok((StepOutcome::Continue(Recoverable::FormatError(message)), trace));
        }
        let action = actions.into_iter().next().unwrap_or_default();

        match self.env.execute(&action, "").await {
            Ok(result) => {
                if let Some(submission) = action::submission(&result.output) {
                    let trace = StepTrace {
                        action,
                        output: result.output,
                    };
                    return Ok((StepOutcome::Terminate(Terminal::Submitted(submission)), trace));
                }

                let locals = locals(json!({"action": action, "output": result}));
                let observation = self.render(template::OBSERVATION, locals)?;
                self.conversation.push(Message::user(observation));

                let trace = StepTrace {
                    action: action.clone(),
                    output: result.output.clone(),
                };
                Ok((
                    StepOutcome::Observed(Observation {
                        action,
                        output: result.output,
                        exit_code: result.returncode,
                    }),
                    trace,
                ))
            }
            Err(EnvironmentError::Timeout { partial_output, .. }) => {
                let locals = locals(json!({
                    "action": action,
                    "output": {"output": partial_output, "returncode": null},
                }));
                let message = self.render(template::TIMEOUT, locals)?;
                let trace = StepTrace {
                    action,
                    output: message.clone(),
                };
                Ok((StepOutcome::Continue(Recoverable::ExecutionTimeout(message)), trace))
            }
            Err(e) if self.config.environment_errors_fatal => Err(e.into()),
            Err(e) => {
                let message = format!("The last command could not be executed: {e}");
                let trace = StepTrace {
                    action,
                    output: message.clone(),
                };
                Ok((StepOutcome::Continue(Recoverable::EnvironmentError(message)), trace))
            }
        }
    }

    /// Config, environment, model and extra variables, then `locals`.
    fn template_vars(&self, locals: Map<String, Value>) -> Map<String, Value> {
        let mut vars = match serde_json::to_value(&self.config) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        vars.extend(self.env.template_vars());
        vars.extend(self.model.template_vars());
        vars.extend(self.extra_vars.clone());
        vars.extend(locals);
        vars
    }

    fn render(&self, name: &str, locals: Map<String, Value>) -> Result<String> {
        self.templates.render(name, &self.template_vars(locals))
    }

    fn log(&self, level: &str, content: &str) {
        self.emit(EventKind::Log, &LogData { level, content });
    }

    fn emit<T: Serialize>(&self, kind: EventKind, data: &T) {
        match Event::new(kind, data) {
            Ok(event) => self.output.emit(event),
            Err(e) => self.output.report_failure(&format!("JSON output error: {e}")),
        }
    }
}

fn locals(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// The error, its causes and, when enabled, a backtrace.
pub fn traceback(error: &Error) -> String {
    error_chain(error.kind(), error)
}

/// `"{kind}: {error}"`, one `Caused by:` line per source, then the
/// backtrace when one was captured.
pub fn error_chain(kind: &str, error: &dyn std::error::Error) -> String {
    let mut lines = vec![format!("{kind}: {error}")];
    let mut source = error.source();
    while let Some(cause) = source {
        lines.push(format!("Caused by: {cause}"));
        source = cause.source();
    }
    let backtrace = Backtrace::capture();
    if backtrace.status() == BacktraceStatus::Captured {
        lines.push(backtrace.to_string());
    }
    lines.join("\n")
}
