//! Scripted collaborators for agent tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use stepwise_core::environment::{Environment, ExecutionOutput};
use stepwise_core::error::{EnvironmentError, Error, Result};
use stepwise_core::event::{Event, EventKind, OutputHandler};
use stepwise_core::message::Message;
use stepwise_core::model::{Model, ModelResponse};

/// Replies from a fixed script, charging a fixed price per call.
pub struct ScriptedModel {
    replies: VecDeque<Result<String>>,
    cost_per_call: f64,
    cost: f64,
    n_calls: u64,
    /// Conversation seen by each query.
    pub seen: Arc<Mutex<Vec<Vec<Message>>>>,
}

impl ScriptedModel {
    pub fn new(replies: &[&str]) -> Self {
        Self {
            replies: replies.iter().map(|r| Ok(r.to_string())).collect(),
            cost_per_call: 0.0,
            cost: 0.0,
            n_calls: 0,
            seen: Arc::default(),
        }
    }

    pub fn failing(error: Error) -> Self {
        let mut model = Self::new(&[]);
        model.replies.push_back(Err(error));
        model
    }

    pub fn with_cost_per_call(mut self, cost: f64) -> Self {
        self.cost_per_call = cost;
        self
    }
}

#[async_trait]
impl Model for ScriptedModel {
    fn model_name(&self) -> &str {
        "test-model"
    }

    async fn query(&mut self, messages: &[Message]) -> Result<ModelResponse> {
        self.seen.lock().unwrap().push(messages.to_vec());
        let reply = self
            .replies
            .pop_front()
            .unwrap_or_else(|| Err(Error::Internal("script exhausted".into())))?;
        self.n_calls += 1;
        self.cost += self.cost_per_call;
        Ok(ModelResponse {
            content: reply,
            extra: serde_json::Map::new(),
        })
    }

    fn cost(&self) -> f64 {
        self.cost
    }

    fn n_calls(&self) -> u64 {
        self.n_calls
    }
}

/// Returns scripted results and records every command.
#[derive(Default)]
pub struct ScriptedEnvironment {
    results: Mutex<VecDeque<std::result::Result<ExecutionOutput, EnvironmentError>>>,
    pub commands: Mutex<Vec<String>>,
}

impl ScriptedEnvironment {
    pub fn new(outputs: &[&str]) -> Self {
        let env = Self::default();
        for output in outputs {
            env.push(Ok(ExecutionOutput::new(*output, Some(0))));
        }
        env
    }

    pub fn push(&self, result: std::result::Result<ExecutionOutput, EnvironmentError>) {
        self.results.lock().unwrap().push_back(result);
    }
}

#[async_trait]
impl Environment for ScriptedEnvironment {
    async fn execute(
        &self,
        command: &str,
        _cwd: &str,
    ) -> std::result::Result<ExecutionOutput, EnvironmentError> {
        self.commands.lock().unwrap().push(command.to_string());
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ExecutionOutput::new("", Some(0))))
    }

    fn cwd(&self) -> String {
        "/work".into()
    }
}

/// Keeps every event in memory.
#[derive(Default)]
pub struct CapturingOutput {
    events: Mutex<Vec<Event>>,
}

impl CapturingOutput {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events().iter().map(|e| e.kind).collect()
    }

    pub fn of_kind(&self, kind: EventKind) -> Vec<serde_json::Value> {
        self.events()
            .into_iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.data)
            .collect()
    }
}

impl OutputHandler for CapturingOutput {
    fn emit(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    fn flush(&self) {}
}
