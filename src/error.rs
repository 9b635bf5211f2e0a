use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Category of a failed invocation. Every failure that reaches a `JobResult` carries one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Missing or invalid configuration, detected before any work starts
    Configuration,
    /// Non-2xx response, connection error or unreadable body
    Transport,
    /// The fixed wait budget for the call was exhausted
    Timeout,
    /// The job endpoint answered but reported an error or a non-terminal status
    Job,
    /// The model executable could not be started or exited with a non-zero code
    Execution,
    /// The model finished but produced no video
    NoOutput,
}

impl Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Configuration => write!(f, "configuration error"),
            FailureKind::Transport => write!(f, "transport error"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Job => write!(f, "job error"),
            FailureKind::Execution => write!(f, "execution error"),
            FailureKind::NoOutput => write!(f, "no output"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct RunnerError {
    pub kind: FailureKind,
    pub message: String,
}

impl RunnerError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        RunnerError {
            kind,
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Configuration, message)
    }

}

/// Last `limit` bytes of `text`, cut on a char boundary.
pub fn tail(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        return text;
    }
    let mut start = text.len() - limit;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

impl From<reqwest::Error> for RunnerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RunnerError::new(FailureKind::Timeout, format!("request timed out: {err}"))
        } else {
            RunnerError::new(FailureKind::Transport, err.to_string())
        }
    }
}

impl From<std::io::Error> for RunnerError {
    fn from(err: std::io::Error) -> Self {
        RunnerError::new(FailureKind::Execution, err.to_string())
    }
}

pub type RunnerResult<T, E = RunnerError> = Result<T, E>;

#[macro_export]
macro_rules! bail_runner {
    ($kind:expr, $error_message:expr) => {
        return Err($crate::error::RunnerError::new($kind, $error_message))
    };
    ($kind:expr, $fmt:expr $(, $arg:expr)*) => {
        return Err($crate::error::RunnerError::new($kind, format!($fmt $(, $arg)*)))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn always_times_out() -> RunnerResult<()> {
        bail_runner!(FailureKind::Timeout, "gave up after {}s", 3)
    }

    #[test]
    fn bail_macro_formats_message() {
        let err = always_times_out().unwrap_err();
        assert_eq!(err.kind, FailureKind::Timeout);
        assert_eq!(err.message, "gave up after 3s");
        assert_eq!(err.to_string(), "timeout: gave up after 3s");
    }

    #[test]
    fn tail_respects_char_boundaries() {
        assert_eq!(tail("abcdef", 10), "abcdef");
        assert_eq!(tail("abcdef", 3), "def");
        // "é" is two bytes, cutting inside it moves forward
        assert_eq!(tail("aé", 1), "");
        assert_eq!(tail("aéb", 2), "b");
    }

    #[test]
    fn failure_kind_serializes_snake_case() {
        let json = serde_json::to_string(&FailureKind::NoOutput).unwrap();
        assert_eq!(json, "\"no_output\"");
    }
}
