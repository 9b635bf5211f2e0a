use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::error::{FailureKind, RunnerError};
use crate::models::ModelOptions;

/// Inputs for one model run. Built fresh per invocation and never changed afterwards.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub image_reference: Url,
    pub audio_reference: Url,
    #[serde(default)]
    pub model_options: ModelOptions,
}

/// Wire shape of a `runsync` request: `{"input": {...}}`
#[derive(Serialize, Debug)]
pub struct RunSyncBody<'a> {
    input: RunSyncInput<'a>,
}

#[derive(Serialize, Debug)]
struct RunSyncInput<'a> {
    input_image_url: &'a Url,
    input_audio_url: &'a Url,
    options: &'a ModelOptions,
}

impl JobRequest {
    pub fn new(image_reference: Url, audio_reference: Url, model_options: ModelOptions) -> Self {
        Self {
            image_reference,
            audio_reference,
            model_options,
        }
    }

    pub fn to_runsync_body(&self) -> RunSyncBody<'_> {
        RunSyncBody {
            input: RunSyncInput {
                input_image_url: &self.image_reference,
                input_audio_url: &self.audio_reference,
                options: &self.model_options,
            },
        }
    }
}

/// Terminal outcome of exactly one invocation.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobResult {
    Success {
        /// Processing time reported by the model, or the observed duration
        elapsed_seconds: f64,
        /// Client-observed duration including queueing and transfer
        wall_seconds: f64,
        output_reference: Url,
        output_size_bytes: u64,
        raw_payload: Map<String, Value>,
    },
    Failure {
        kind: FailureKind,
        error_message: String,
        elapsed_seconds: f64,
    },
}

impl JobResult {
    pub fn failure(error: RunnerError, elapsed_seconds: f64) -> Self {
        JobResult::Failure {
            kind: error.kind,
            error_message: error.message,
            elapsed_seconds,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobResult::Success { .. })
    }

    pub fn elapsed_seconds(&self) -> f64 {
        match self {
            JobResult::Success {
                elapsed_seconds, ..
            }
            | JobResult::Failure {
                elapsed_seconds, ..
            } => *elapsed_seconds,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            JobResult::Success { .. } => None,
            JobResult::Failure { kind, .. } => Some(*kind),
        }
    }

    pub fn output_size_bytes(&self) -> Option<u64> {
        match self {
            JobResult::Success {
                output_size_bytes, ..
            } => Some(*output_size_bytes),
            JobResult::Failure { .. } => None,
        }
    }

    /// Normalizes a `runsync` response body.
    ///
    /// The platform wraps the handler's return value in `output` next to `status`,
    /// `executionTime` and `delayTime`. Handlers report errors either through an
    /// `error` field, `status: "error"` or `success: false`.
    pub fn from_runsync_payload(payload: Value, wall_seconds: f64) -> Self {
        let Value::Object(payload) = payload else {
            return Self::failure(
                RunnerError::new(FailureKind::Job, "response body is not a JSON object"),
                wall_seconds,
            );
        };
        let output = payload.get("output").and_then(Value::as_object);

        let elapsed_seconds = output
            .and_then(|o| o.get("processing_time"))
            .and_then(Value::as_f64)
            .or_else(|| {
                payload
                    .get("executionTime")
                    .and_then(Value::as_f64)
                    .map(|ms| ms / 1000.0)
            })
            .unwrap_or(wall_seconds);

        if let Some(error) = payload.get("error").filter(|e| !e.is_null()) {
            return Self::failure(
                RunnerError::new(FailureKind::Job, describe_error(error)),
                elapsed_seconds,
            );
        }

        if let Some(status) = payload.get("status").and_then(Value::as_str) {
            if status != "COMPLETED" {
                return Self::failure(
                    RunnerError::new(
                        FailureKind::Job,
                        format!("job finished with status {status}"),
                    ),
                    elapsed_seconds,
                );
            }
        }

        let Some(output) = output else {
            return Self::failure(
                RunnerError::new(
                    FailureKind::NoOutput,
                    "no output produced: response has no output object",
                ),
                elapsed_seconds,
            );
        };

        if let Some(error) = handler_error(output) {
            return Self::failure(RunnerError::new(FailureKind::Job, error), elapsed_seconds);
        }

        let output_reference = match output.get("output_video_url").and_then(Value::as_str) {
            None => {
                return Self::failure(
                    RunnerError::new(
                        FailureKind::NoOutput,
                        "no output produced: output_video_url is missing",
                    ),
                    elapsed_seconds,
                )
            }
            Some(raw) => match Url::parse(raw) {
                Ok(url) => url,
                Err(err) => {
                    return Self::failure(
                        RunnerError::new(
                            FailureKind::Job,
                            format!("invalid output_video_url {raw:?}: {err}"),
                        ),
                        elapsed_seconds,
                    )
                }
            },
        };

        let output_size_bytes = ["file_size", "output_file_size"]
            .iter()
            .find_map(|key| output.get(*key).and_then(as_byte_count))
            .unwrap_or(0);

        JobResult::Success {
            elapsed_seconds,
            wall_seconds,
            output_reference,
            output_size_bytes,
            raw_payload: payload,
        }
    }
}

fn handler_error(output: &Map<String, Value>) -> Option<String> {
    if let Some(error) = output.get("error").filter(|e| !e.is_null()) {
        return Some(describe_error(error));
    }
    let errored = output.get("status").and_then(Value::as_str) == Some("error")
        || output.get("success").and_then(Value::as_bool) == Some(false);
    errored.then(|| {
        output
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("handler reported an error")
            .to_string()
    })
}

fn describe_error(error: &Value) -> String {
    match error {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn as_byte_count(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
}
