//! Run events: the records streamed to automation consumers.
//!
//! Every event is one self-contained JSON object with a `type`, a `data`
//! mapping and an optional ISO-8601 UTC `timestamp`. Consumers must ignore
//! unknown keys and unknown types.

use std::io::Write;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// All event types a run can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// The run began
    Start,
    /// One loop iteration completed
    Step,
    /// A reasoning block was found in a model reply
    Thought,
    /// Informational or diagnostic message
    Log,
    /// The run reached a terminal signal
    Finish,
    /// An unclassified error escaped the run
    Error,
    /// Final cost summary
    Cost,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Step => "step",
            Self::Thought => "thought",
            Self::Log => "log",
            Self::Finish => "finish",
            Self::Error => "error",
            Self::Cost => "cost",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable event record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,

    /// Event payload; always a JSON object
    pub data: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Event {
    /// Build an event from any serializable payload.
    ///
    /// Fails when the payload cannot be serialized or does not serialize to
    /// a JSON object.
    pub fn new<T: Serialize + ?Sized>(
        kind: EventKind,
        data: &T,
    ) -> Result<Self, serde_json::Error> {
        let data = serde_json::to_value(data)?;
        if !data.is_object() {
            return Err(serde::ser::Error::custom(format!(
                "{kind} event data must be a JSON object"
            )));
        }
        Ok(Self {
            kind,
            data,
            timestamp: None,
        })
    }

    /// Stamp the event with the current UTC time.
    pub fn stamped(mut self) -> Self {
        self.timestamp = Some(Utc::now());
        self
    }
}

/// A sink for run events.
///
/// Implementations must write each event completely before the next one
/// begins and must never fail the run: write errors go to
/// [`OutputHandler::report_failure`].
pub trait OutputHandler: Send + Sync {
    /// Write one event and flush it.
    fn emit(&self, event: Event);

    /// Flush any buffered output.
    fn flush(&self);

    /// Last-resort diagnostic channel, used when an event cannot be written.
    fn report_failure(&self, message: &str) {
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "{message}");
        let _ = stderr.flush();
    }
}
