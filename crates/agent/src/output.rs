//! JSON Lines event output.
//!
//! Each event becomes exactly one line on the underlying writer, flushed
//! immediately so consumers can follow a run as it happens.

use std::io::Write;
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use stepwise_core::event::{Event, OutputHandler};

/// Payload of the `start` event.
#[derive(Debug, Serialize)]
pub struct StartData<'a> {
    pub task: &'a str,
    pub model: &'a str,
    pub workdir: &'a str,
}

/// Payload of the `step` event.
#[derive(Debug, Serialize)]
pub struct StepData<'a> {
    pub step: u32,
    pub action: &'a str,
    pub output: &'a str,
    pub cost_so_far: f64,
}

/// Payload of the `thought` event.
#[derive(Debug, Serialize)]
pub struct ThoughtData<'a> {
    pub content: &'a str,
}

/// Payload of the `log` event.
#[derive(Debug, Serialize)]
pub struct LogData<'a> {
    pub level: &'a str,
    pub content: &'a str,
}

/// Payload of the `finish` event.
#[derive(Debug, Serialize)]
pub struct FinishData<'a> {
    pub status: &'a str,
    pub result: &'a str,
}

/// Payload of the `error` event.
#[derive(Debug, Serialize)]
pub struct ErrorData<'a> {
    pub error: &'a str,
    #[serde(rename = "type")]
    pub kind: &'a str,
    pub traceback: &'a str,
}

/// Payload of the `cost` event.
#[derive(Debug, Serialize)]
pub struct CostData {
    pub total: f64,
    pub calls: u64,
}

/// Writes events as JSON Lines.
pub struct JsonOutputHandler {
    writer: Mutex<Box<dyn Write + Send>>,
    include_timestamps: bool,
}

impl JsonOutputHandler {
    pub fn new(writer: impl Write + Send + 'static, include_timestamps: bool) -> Self {
        Self {
            writer: Mutex::new(Box::new(writer)),
            include_timestamps,
        }
    }

    /// Handler writing to standard output.
    pub fn stdout(include_timestamps: bool) -> Self {
        Self::new(std::io::stdout(), include_timestamps)
    }

    fn write_line(&self, line: &str) -> std::io::Result<()> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()
    }
}

impl OutputHandler for JsonOutputHandler {
    fn emit(&self, event: Event) {
        let event = if self.include_timestamps {
            event.stamped()
        } else {
            event
        };

        let written = serde_json::to_string(&event)
            .map_err(|e| e.to_string())
            .and_then(|line| self.write_line(&line).map_err(|e| e.to_string()));

        if let Err(e) = written {
            self.report_failure(&format!("JSON output error: {e}"));
        }
    }

    fn flush(&self) {
        let flushed = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush();
        if let Err(e) = flushed {
            self.report_failure(&format!("JSON output error: {e}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use stepwise_core::event::EventKind;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        fn lines(&self) -> Vec<serde_json::Value> {
            let bytes = self.0.lock().unwrap().clone();
            String::from_utf8(bytes)
                .unwrap()
                .lines()
                .map(|l| serde_json::from_str(l).unwrap())
                .collect()
        }
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn one_line_per_event() {
        let buf = SharedBuffer::default();
        let handler = JsonOutputHandler::new(buf.clone(), false);

        handler.emit(Event::new(EventKind::Thought, &ThoughtData { content: "hmm\nok" }).unwrap());
        handler.emit(Event::new(EventKind::Cost, &CostData { total: 0.5, calls: 2 }).unwrap());

        let lines = buf.lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["type"], "thought");
        assert_eq!(lines[0]["data"]["content"], "hmm\nok");
        assert_eq!(lines[1]["data"]["calls"], 2);
        assert!(lines[1].get("timestamp").is_none());
    }

    #[test]
    fn timestamps_when_enabled() {
        let buf = SharedBuffer::default();
        let handler = JsonOutputHandler::new(buf.clone(), true);
        handler.emit(
            Event::new(EventKind::Log, &LogData { level: "info", content: "hi" }).unwrap(),
        );
        assert!(buf.lines()[0]["timestamp"].is_string());
    }

    #[test]
    fn error_payload_uses_type_key() {
        let data = ErrorData {
            error: "boom",
            kind: "RuntimeError",
            traceback: "",
        };
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["type"], "RuntimeError");
    }

    #[test]
    fn write_failure_does_not_panic() {
        let handler = JsonOutputHandler::new(BrokenPipe, true);
        handler.emit(Event::new(EventKind::Finish, &FinishData { status: "Submitted", result: "" }).unwrap());
        handler.flush();
    }
}
