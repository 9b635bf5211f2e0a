use std::fmt::Display;
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use serde_json::Value;
use tracing::{info, warn};
use url::Url;

use crate::bail_runner;
use crate::error::{tail, FailureKind, RunnerError, RunnerResult};
use crate::job::{JobRequest, JobResult};

pub const DEFAULT_API_BASE_URL: &str = "https://api.runpod.ai";

const ERROR_BODY_LIMIT: usize = 1024;

/// Identifier of one serverless endpoint. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    id: String,
}

impl Endpoint {
    pub fn new(id: impl Into<String>) -> RunnerResult<Self> {
        let id = id.into().trim().to_string();
        if id.is_empty() {
            return Err(RunnerError::configuration("endpoint id is empty"));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(RunnerError::configuration(format!(
                "endpoint id {id:?} contains invalid characters"
            )));
        }
        Ok(Self { id })
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// Blocking client for `POST /v2/{endpoint}/runsync`.
pub struct RemoteClient {
    http: Client,
    base_url: Url,
    api_key: String,
}

impl RemoteClient {
    pub fn new(base_url: Url, api_key: &str) -> RunnerResult<Self> {
        if api_key.trim().is_empty() {
            return Err(RunnerError::configuration("API key is empty"));
        }
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(RunnerError::configuration(format!(
                "API base URL {base_url} is not an http(s) URL"
            )));
        }
        let http = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| {
                RunnerError::configuration(format!("failed to build HTTP client: {err}"))
            })?;

        Ok(Self {
            http,
            base_url,
            api_key: api_key.trim().to_string(),
        })
    }

    pub fn runsync_url(&self, endpoint: &Endpoint) -> RunnerResult<Url> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}/v2/{}/runsync", endpoint.id())).map_err(|err| {
            RunnerError::configuration(format!("invalid runsync URL for {endpoint}: {err}"))
        })
    }

    /// Sends `request` to `endpoint` and blocks until a terminal answer or `timeout`.
    ///
    /// Never retries. Every outcome, including transport errors, is a `JobResult`.
    #[tracing::instrument(level = "info", skip(self, endpoint, request), fields(endpoint = %endpoint))]
    pub fn invoke(&self, endpoint: &Endpoint, request: &JobRequest, timeout: Duration) -> JobResult {
        let start = Instant::now();
        match self.call(endpoint, request, timeout) {
            Ok(payload) => {
                let wall_seconds = start.elapsed().as_secs_f64();
                info!(wall_secs = wall_seconds, "Endpoint answered");
                JobResult::from_runsync_payload(payload, wall_seconds)
            }
            Err(err) => {
                warn!(kind = %err.kind, "Endpoint call failed: {}", err.message);
                JobResult::failure(err, start.elapsed().as_secs_f64())
            }
        }
    }

    fn call(&self, endpoint: &Endpoint, request: &JobRequest, timeout: Duration) -> RunnerResult<Value> {
        let url = self.runsync_url(endpoint)?;
        let timed_out = |err: reqwest::Error| {
            if err.is_timeout() {
                RunnerError::new(
                    FailureKind::Timeout,
                    format!(
                        "endpoint {endpoint} timed out after {}s",
                        timeout.as_secs_f64()
                    ),
                )
            } else {
                RunnerError::from(err)
            }
        };

        let response = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&request.to_runsync_body())
            .timeout(timeout)
            .send()
            .map_err(timed_out)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            bail_runner!(
                FailureKind::Transport,
                "endpoint {} answered {}: {}",
                endpoint,
                status,
                tail(body.trim(), ERROR_BODY_LIMIT)
            );
        }

        response.json::<Value>().map_err(|err| {
            if err.is_timeout() {
                timed_out(err)
            } else {
                RunnerError::new(
                    FailureKind::Transport,
                    format!("endpoint {endpoint} returned an unreadable body: {err}"),
                )
            }
        })
    }
}
