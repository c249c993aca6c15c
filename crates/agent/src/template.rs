//! Prompt templates.
//!
//! Five Handlebars templates drive the conversation: the system prompt, the
//! task statement, the observation after each command, and the feedback for
//! malformed replies and timed-out commands. Output is never HTML-escaped.

use handlebars::Handlebars;
use serde_json::{Map, Value};
use stepwise_config::AgentConfig;
use stepwise_core::error::{Error, Result};

pub const SYSTEM: &str = "system";
pub const INSTANCE: &str = "instance";
pub const OBSERVATION: &str = "action_observation";
pub const FORMAT_ERROR: &str = "format_error";
pub const TIMEOUT: &str = "timeout";

pub const DEFAULT_SYSTEM_TEMPLATE: &str = "\
You are a helpful assistant that can interact with a computer by running shell commands.

Your response must contain exactly ONE bash code block with ONE command (or commands connected with && or ||).
Include a THOUGHT section before your command explaining your reasoning.

<system_information>
{{os}} {{arch}}, working directory {{cwd}}
</system_information>";

pub const DEFAULT_INSTANCE_TEMPLATE: &str = "\
Please solve this task: {{task}}

Reply with a single shell command in triple backticks, for example:

```bash
ls -la
```

Every command runs in a fresh subshell, so directory changes and environment variables do not persist.
When you are done, run a command whose output starts with the line COMPLETE_TASK_AND_SUBMIT_FINAL_OUTPUT.
Everything after that line is your final answer, e.g.

```bash
echo COMPLETE_TASK_AND_SUBMIT_FINAL_OUTPUT && cat summary.txt
```";

pub const DEFAULT_OBSERVATION_TEMPLATE: &str = "\
<returncode>{{output.returncode}}</returncode>
<output>
{{output.output}}</output>";

pub const DEFAULT_FORMAT_ERROR_TEMPLATE: &str = "\
Please always provide EXACTLY ONE action in triple backticks, found {{n_actions}} actions.

If you want to end the task, run a command whose output starts with COMPLETE_TASK_AND_SUBMIT_FINAL_OUTPUT.";

pub const DEFAULT_TIMEOUT_TEMPLATE: &str = "\
The last command <command>{{action}}</command> timed out and has been killed.
The output of the command was:
<output>
{{output.output}}
</output>
Please try another command and make sure to avoid those requiring interactive input.";

/// The compiled template set of one agent.
pub struct Templates {
    hbs: Handlebars<'static>,
}

impl Templates {
    /// Compile the configured templates, falling back to the defaults for
    /// any that are not set.
    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        let mut hbs = Handlebars::new();
        hbs.register_escape_fn(handlebars::no_escape);

        let sources = [
            (SYSTEM, config.system_template.as_deref(), DEFAULT_SYSTEM_TEMPLATE),
            (INSTANCE, config.instance_template.as_deref(), DEFAULT_INSTANCE_TEMPLATE),
            (
                OBSERVATION,
                config.action_observation_template.as_deref(),
                DEFAULT_OBSERVATION_TEMPLATE,
            ),
            (
                FORMAT_ERROR,
                config.format_error_template.as_deref(),
                DEFAULT_FORMAT_ERROR_TEMPLATE,
            ),
            (TIMEOUT, config.timeout_template.as_deref(), DEFAULT_TIMEOUT_TEMPLATE),
        ];

        for (name, configured, default) in sources {
            hbs.register_template_string(name, configured.unwrap_or(default))
                .map_err(|e| Error::Template(format!("{name} template: {e}")))?;
        }

        Ok(Self { hbs })
    }

    /// Render `name` with `vars`. Missing variables render empty.
    pub fn render(&self, name: &str, vars: &Map<String, Value>) -> Result<String> {
        self.hbs
            .render(name, vars)
            .map_err(|e| Error::Template(format!("{name} template: {e}")))
    }
}
