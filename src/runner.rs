use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use base64ct::{Base64, Encoding};
use reqwest::blocking::Client;
use serde_json::{json, Value};
use tracing::{info, warn};
use url::Url;

use crate::compare::{ComparisonReport, ModelRun, Transport};
use crate::config::Settings;
use crate::error::{FailureKind, RunnerError, RunnerResult};
use crate::job::{JobRequest, JobResult};
use crate::local::assets::{fetch_asset, url_extension};
use crate::local::execute;
use crate::local::workdir::WorkDir;
use crate::models::{LocalModel, ModelKind, ModelOptions};
use crate::remote::{Endpoint, RemoteClient};

/// Model defaults overlaid with `overrides`.
pub fn merged_options(kind: ModelKind, overrides: &ModelOptions) -> ModelOptions {
    let mut options = kind.default_options();
    options.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    options
}

/// Everything needed to call one model's endpoint.
#[derive(Debug, Clone)]
pub struct RemoteModelPlan {
    pub model: ModelKind,
    pub endpoint: Endpoint,
    pub request: JobRequest,
    pub timeout: Duration,
}

impl RemoteModelPlan {
    pub fn from_settings(settings: &Settings, model: ModelKind) -> Self {
        Self {
            model,
            endpoint: settings.endpoint_for(model).clone(),
            request: JobRequest::new(
                settings.image_url.clone(),
                settings.audio_for(model).clone(),
                model.default_options(),
            ),
            timeout: settings.timeout_for(model),
        }
    }
}

pub fn run_remote_model(client: &RemoteClient, plan: &RemoteModelPlan) -> ModelRun {
    info!(
        model = plan.model.id(),
        audio = %plan.request.audio_reference,
        timeout_secs = plan.timeout.as_secs(),
        "Invoking {}",
        plan.model
    );
    let result = client.invoke(&plan.endpoint, &plan.request, plan.timeout);
    ModelRun::new(
        plan.model.id(),
        plan.model.display_name(),
        plan.request.image_reference.clone(),
        plan.request.audio_reference.clone(),
        result,
    )
}

/// Calls both endpoints one after the other and compares the results.
pub fn run_remote_comparison(
    client: &RemoteClient,
    first: &RemoteModelPlan,
    second: &RemoteModelPlan,
) -> ComparisonReport {
    let start = Instant::now();
    let first_run = run_remote_model(client, first);
    let second_run = run_remote_model(client, second);
    ComparisonReport::new(
        Transport::Remote,
        first_run,
        second_run,
        start.elapsed().as_secs_f64(),
    )
}

/// A local job: where it runs and what it reads.
#[derive(Debug, Clone)]
pub struct LocalJob {
    pub job_id: String,
    pub work_root: PathBuf,
    pub image_url: Url,
    pub audio_url: Url,
    pub keep_work_dir: bool,
    pub embed_video: bool,
}

/// One installed model with the options and budget to run it with.
pub struct LocalModelRun<'a> {
    pub model: &'a dyn LocalModel,
    pub options: ModelOptions,
    pub timeout: Duration,
}

/// Downloaded inputs inside a job's working directory.
#[derive(Debug, Clone)]
pub struct LocalInputs {
    pub image: PathBuf,
    pub audio: PathBuf,
}

impl LocalJob {
    fn prepare(&self, client: &Client, prefix: &str) -> RunnerResult<(WorkDir, LocalInputs)> {
        let work_dir = WorkDir::create(&self.work_root, prefix, &self.job_id, !self.keep_work_dir)?;
        let image = work_dir.join(input_name("input_image", &self.image_url, "png"));
        let audio = work_dir.join(input_name("input_audio", &self.audio_url, "wav"));
        fetch_asset(client, &self.image_url, &image)?;
        fetch_asset(client, &self.audio_url, &audio)?;
        Ok((work_dir, LocalInputs { image, audio }))
    }

    fn model_run(&self, kind: ModelKind, result: JobResult) -> ModelRun {
        ModelRun::new(
            kind.id(),
            kind.display_name(),
            self.image_url.clone(),
            self.audio_url.clone(),
            result,
        )
    }
}

fn input_name(stem: &str, url: &Url, fallback: &str) -> String {
    let extension = url_extension(url).unwrap_or_else(|| fallback.to_string());
    format!("{stem}.{extension}")
}

/// Runs one model on inputs that are already in `work_dir`.
#[tracing::instrument(level = "info", skip_all, fields(job_id = %job.job_id, model = run.model.kind().id()))]
pub fn run_local_model(
    job: &LocalJob,
    work_dir: &WorkDir,
    inputs: &LocalInputs,
    run: &LocalModelRun<'_>,
) -> ModelRun {
    let kind = run.model.kind();
    let output_dir = match work_dir.subdir(&format!("{}_output", kind.id())) {
        Ok(dir) => dir,
        Err(err) => return job.model_run(kind, JobResult::failure(err, 0.0)),
    };

    let invocation = run
        .model
        .invocation(&inputs.image, &inputs.audio, &output_dir, &run.options);
    info!(command = %invocation.command_line(), "Running {kind}");

    let mut result = execute(&invocation, &output_dir, run.timeout);
    if let JobResult::Success {
        output_reference,
        raw_payload,
        ..
    } = &mut result
    {
        raw_payload.insert("job_id".into(), json!(job.job_id));
        raw_payload.insert("model".into(), json!(kind.id()));
        if job.embed_video {
            match read_video_base64(output_reference) {
                Ok(encoded) => {
                    raw_payload.insert("video_base64".into(), Value::String(encoded));
                }
                Err(err) => warn!("Skipping embedded video: {err}"),
            }
        }
    }
    job.model_run(kind, result)
}

fn read_video_base64(output_reference: &Url) -> RunnerResult<String> {
    let path = output_reference.to_file_path().map_err(|_| {
        RunnerError::new(
            FailureKind::NoOutput,
            format!("{output_reference} is not a local file"),
        )
    })?;
    let bytes = fs::read(path)?;
    Ok(Base64::encode_string(&bytes))
}

/// Downloads the inputs and runs a single model in `<work_root>/<model>_<job_id>`.
pub fn run_local_single(client: &Client, job: &LocalJob, run: &LocalModelRun<'_>) -> ModelRun {
    let kind = run.model.kind();
    let start = Instant::now();
    match job.prepare(client, kind.id()) {
        Ok((work_dir, inputs)) => run_local_model(job, &work_dir, &inputs, run),
        Err(err) => {
            warn!(kind = %err.kind, "Failed to prepare inputs: {}", err.message);
            job.model_run(kind, JobResult::failure(err, start.elapsed().as_secs_f64()))
        }
    }
}

/// Downloads the inputs once and runs both models on them, one after the other.
///
/// A failed download fails both sides with the same error.
pub fn run_local_comparison(
    client: &Client,
    job: &LocalJob,
    first: &LocalModelRun<'_>,
    second: &LocalModelRun<'_>,
) -> ComparisonReport {
    let start = Instant::now();
    let (first_run, second_run) = match job.prepare(client, "compare") {
        Ok((work_dir, inputs)) => {
            let first_run = run_local_model(job, &work_dir, &inputs, first);
            let second_run = run_local_model(job, &work_dir, &inputs, second);
            (first_run, second_run)
        }
        Err(err) => {
            warn!(kind = %err.kind, "Failed to prepare inputs: {}", err.message);
            let elapsed = start.elapsed().as_secs_f64();
            (
                job.model_run(first.model.kind(), JobResult::failure(err.clone(), elapsed)),
                job.model_run(second.model.kind(), JobResult::failure(err, elapsed)),
            )
        }
    };
    ComparisonReport::new(
        Transport::Local,
        first_run,
        second_run,
        start.elapsed().as_secs_f64(),
    )
}
