use std::fs::File;
use std::io::{BufWriter, IsTerminal, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use reqwest::blocking::Client;
use serde::Serialize;
use tracing::info;
use url::Url;
use uuid::Uuid;

use talking_head_runner::config::{DEFAULT_AUDIO_WAV_URL, DEFAULT_IMAGE_URL};
use talking_head_runner::exit_err;
use talking_head_runner::models::sadtalker::SadTalker;
use talking_head_runner::models::wav2lip::Wav2Lip;
use talking_head_runner::models::{LocalModel, ModelKind, ModelOptions};
use talking_head_runner::runner::{
    merged_options, run_local_comparison, run_local_single, LocalJob, LocalModelRun,
};
use talking_head_runner::telemetry::init_telemetry;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ModelSelection {
    Sadtalker,
    Wav2lip,
    Both,
}

/// Runs SadTalker and Wav2Lip as local subprocesses and reports the result as JSON.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Source image, http(s) or file URL
    #[arg(long, env = "GITHUB_IMAGE_URL", default_value = DEFAULT_IMAGE_URL)]
    image_url: Url,

    /// Driving audio, http(s) or file URL
    #[arg(long, env = "GITHUB_AUDIO_WAV_URL", default_value = DEFAULT_AUDIO_WAV_URL)]
    audio_url: Url,

    /// Which model to run
    #[arg(short, long, value_enum, default_value_t = ModelSelection::Both)]
    model: ModelSelection,

    /// Job identifier used to name the working directory, random when absent
    #[arg(long)]
    job_id: Option<String>,

    /// Parent of the per-job working directory
    #[arg(long, env = "WORK_ROOT")]
    work_root: Option<PathBuf>,

    /// Python interpreter running the model scripts
    #[arg(long, env = "PYTHON", default_value = "python")]
    python: PathBuf,

    /// SadTalker checkout
    #[arg(long, env = "SADTALKER_DIR", default_value = "/workspace/SadTalker")]
    sadtalker_dir: PathBuf,

    /// Wav2Lip checkout
    #[arg(long, env = "WAV2LIP_DIR", default_value = "/workspace/Wav2Lip")]
    wav2lip_dir: PathBuf,

    /// Wav2Lip weights, defaults to checkpoints/wav2lip_gan.pth inside the checkout
    #[arg(long, env = "WAV2LIP_CHECKPOINT")]
    wav2lip_checkpoint: Option<PathBuf>,

    /// Seconds SadTalker may run
    #[arg(long, env = "SADTALKER_TIMEOUT_SECS", default_value_t = 1800)]
    sadtalker_timeout_secs: u64,

    /// Seconds Wav2Lip may run
    #[arg(long, env = "WAV2LIP_TIMEOUT_SECS", default_value_t = 600)]
    wav2lip_timeout_secs: u64,

    /// SadTalker options as a JSON object, merged over the defaults
    #[arg(long, value_parser = parse_options)]
    sadtalker_options: Option<ModelOptions>,

    /// Wav2Lip options as a JSON object, merged over the defaults
    #[arg(long, value_parser = parse_options)]
    wav2lip_options: Option<ModelOptions>,

    /// Keep the working directory after the run
    #[arg(long)]
    keep_work_dir: bool,

    /// Embed produced videos as base64 in the result
    #[arg(long)]
    embed_video: bool,

    /// Write the JSON result to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Disable colored log output
    #[arg(long)]
    no_color: bool,
}

fn parse_options(raw: &str) -> Result<ModelOptions, String> {
    serde_json::from_str(raw).map_err(|err| format!("expected a JSON object: {err}"))
}

impl Args {
    fn timeout(&self, kind: ModelKind) -> Duration {
        let secs = match kind {
            ModelKind::SadTalker => self.sadtalker_timeout_secs,
            ModelKind::Wav2Lip => self.wav2lip_timeout_secs,
        };
        Duration::from_secs(secs)
    }

    fn options(&self, kind: ModelKind) -> ModelOptions {
        let overrides = match kind {
            ModelKind::SadTalker => self.sadtalker_options.clone(),
            ModelKind::Wav2Lip => self.wav2lip_options.clone(),
        };
        merged_options(kind, &overrides.unwrap_or_default())
    }

    fn model_run<'a>(&self, model: &'a dyn LocalModel) -> LocalModelRun<'a> {
        let kind = model.kind();
        LocalModelRun {
            model,
            options: self.options(kind),
            timeout: self.timeout(kind),
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_telemetry(!args.no_color && std::io::stderr().is_terminal());

    if args.sadtalker_timeout_secs == 0 || args.wav2lip_timeout_secs == 0 {
        exit_err!(1, "Timeouts must be greater than zero");
    }

    let job = LocalJob {
        job_id: args
            .job_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        work_root: args.work_root.clone().unwrap_or_else(std::env::temp_dir),
        image_url: args.image_url.clone(),
        audio_url: args.audio_url.clone(),
        keep_work_dir: args.keep_work_dir,
        embed_video: args.embed_video,
    };
    info!(job_id = %job.job_id, work_root = %job.work_root.display(), "Starting local job");

    let sadtalker = SadTalker::new(&args.python, &args.sadtalker_dir);
    let mut wav2lip = Wav2Lip::new(&args.python, &args.wav2lip_dir);
    if let Some(checkpoint) = &args.wav2lip_checkpoint {
        wav2lip = wav2lip.with_checkpoint(checkpoint);
    }

    let client = Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;

    let succeeded = match args.model {
        ModelSelection::Sadtalker => {
            let run = run_local_single(&client, &job, &args.model_run(&sadtalker));
            let succeeded = run.result.is_success();
            emit(&run, args.output.as_ref())?;
            succeeded
        }
        ModelSelection::Wav2lip => {
            let run = run_local_single(&client, &job, &args.model_run(&wav2lip));
            let succeeded = run.result.is_success();
            emit(&run, args.output.as_ref())?;
            succeeded
        }
        ModelSelection::Both => {
            let report = run_local_comparison(
                &client,
                &job,
                &args.model_run(&sadtalker),
                &args.model_run(&wav2lip),
            );
            eprintln!("{report}");
            let succeeded = report.is_compared();
            emit(&report, args.output.as_ref())?;
            succeeded
        }
    };

    if !succeeded {
        std::process::exit(2);
    }
    Ok(())
}

fn emit<T: Serialize>(value: &T, output: Option<&PathBuf>) -> Result<()> {
    match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, value)?;
            writer.flush()?;
            info!(path = %path.display(), "Wrote result");
        }
        None => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}
