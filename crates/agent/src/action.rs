//! Parsing model replies: the action to run and any embedded thoughts.

use regex_lite::Regex;
use stepwise_core::error::{Error, Result};

/// First output line that marks the task as finished.
pub const SUBMIT_MARKER: &str = "COMPLETE_TASK_AND_SUBMIT_FINAL_OUTPUT";

/// Actions longer than this are cut in `step` events.
pub const MAX_ACTION_CHARS: usize = 500;

const THOUGHT_PATTERNS: [&str; 2] = [
    r"(?is)<thought>(.*?)</thought>",
    r"(?is)<thinking>(.*?)</thinking>",
];

/// Extracts actions and thoughts from model replies.
#[derive(Debug, Clone)]
pub struct ActionParser {
    action: Regex,
    thoughts: Vec<Regex>,
}

impl ActionParser {
    /// Compile `action_regex`. Its first capture group, if any, is the
    /// action; otherwise the whole match is.
    pub fn new(action_regex: &str) -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| Error::Config {
                message: format!("invalid regex '{pattern}': {e}"),
            })
        };

        Ok(Self {
            action: compile(action_regex)?,
            thoughts: THOUGHT_PATTERNS
                .iter()
                .map(|p| compile(p))
                .collect::<Result<_>>()?,
        })
    }

    /// Every action candidate in `content`, trimmed.
    pub fn actions(&self, content: &str) -> Vec<String> {
        self.action
            .captures_iter(content)
            .filter_map(|caps| caps.get(1).or_else(|| caps.get(0)))
            .map(|m| m.as_str().trim().to_string())
            .collect()
    }

    /// Trimmed contents of `<thought>` blocks, then of `<thinking>` blocks.
    pub fn thoughts(&self, content: &str) -> Vec<String> {
        self.thoughts
            .iter()
            .flat_map(|re| {
                re.captures_iter(content)
                    .filter_map(|caps| caps.get(1))
                    .map(|m| m.as_str().trim().to_string())
            })
            .collect()
    }
}

/// The submission carried by a command's output, if any.
///
/// Leading whitespace is ignored. When the first line is the submit
/// marker, the remaining lines (line endings kept) are the submission.
pub fn submission(output: &str) -> Option<String> {
    let rest = output.trim_start();
    let (first, remainder) = match rest.find('\n') {
        Some(idx) => (&rest[..idx], &rest[idx + 1..]),
        None => (rest, ""),
    };
    (first.trim() == SUBMIT_MARKER).then(|| remainder.to_string())
}

/// Cut `output` to `max_chars` characters, noting the original length.
pub fn truncate_output(output: &str, max_chars: usize) -> String {
    let total = output.chars().count();
    if total <= max_chars {
        return output.to_string();
    }
    let head: String = output.chars().take(max_chars).collect();
    format!("{head}\n... (truncated, {total} total chars)")
}

/// Cut `action` to [`MAX_ACTION_CHARS`] characters.
pub fn truncate_action(action: &str) -> String {
    action.chars().take(MAX_ACTION_CHARS).collect()
}
