use std::fmt::Debug;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap_serde_derive::ClapSerde;
use serde::Deserialize;
use url::Url;

use crate::error::RunnerError;
use crate::models::{AudioFormat, ModelKind};
use crate::remote::{Endpoint, DEFAULT_API_BASE_URL};

pub const DEFAULT_CONFIG_FILE: &str = "TalkingHeadRunner.toml";

pub const DEFAULT_IMAGE_URL: &str =
    "https://raw.githubusercontent.com/Su-minn/runpod-talking-head-test/main/assets/profile.png";
pub const DEFAULT_AUDIO_WAV_URL: &str =
    "https://raw.githubusercontent.com/Su-minn/runpod-talking-head-test/main/assets/test.wav";
pub const DEFAULT_AUDIO_MP3_URL: &str =
    "https://raw.githubusercontent.com/Su-minn/runpod-talking-head-test/main/assets/test.mp3";

#[derive(ClapSerde, Deserialize)]
pub struct Config {
    /// API key for the serverless platform
    #[default(String::new())]
    #[arg(long, env = "RUNPOD_API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// Endpoint id serving SadTalker
    #[default(String::new())]
    #[arg(long, env = "SADTALKER_ENDPOINT_ID")]
    pub sadtalker_endpoint_id: String,

    /// Endpoint id serving Wav2Lip
    #[default(String::new())]
    #[arg(long, env = "WAV2LIP_ENDPOINT_ID")]
    pub wav2lip_endpoint_id: String,

    /// Base URL of the serverless API
    #[default(DEFAULT_API_BASE_URL.to_string())]
    #[arg(long, env = "RUNPOD_API_BASE_URL")]
    pub api_base_url: String,

    /// Publicly reachable source image
    #[default(DEFAULT_IMAGE_URL.to_string())]
    #[arg(long, env = "GITHUB_IMAGE_URL")]
    pub image_url: String,

    /// Publicly reachable WAV audio, sent to Wav2Lip
    #[default(DEFAULT_AUDIO_WAV_URL.to_string())]
    #[arg(long, env = "GITHUB_AUDIO_WAV_URL")]
    pub audio_wav_url: String,

    /// Publicly reachable MP3 audio, sent to SadTalker
    #[default(DEFAULT_AUDIO_MP3_URL.to_string())]
    #[arg(long, env = "GITHUB_AUDIO_MP3_URL")]
    pub audio_mp3_url: String,

    /// Seconds to wait for the SadTalker endpoint
    #[default(ModelKind::SadTalker.default_timeout().as_secs())]
    #[arg(long, env = "SADTALKER_TIMEOUT_SECS")]
    pub sadtalker_timeout_secs: u64,

    /// Seconds to wait for the Wav2Lip endpoint
    #[default(ModelKind::Wav2Lip.default_timeout().as_secs())]
    #[arg(long, env = "WAV2LIP_TIMEOUT_SECS")]
    pub wav2lip_timeout_secs: u64,

    /// Directory the comparison report is written to
    #[default(".".to_string())]
    #[arg(long, env = "REPORT_DIR")]
    pub report_dir: String,
}

impl Config {
    /// Reads the optional configuration layer from a TOML file.
    pub fn from_toml(path: &str) -> Result<<Config as ClapSerde>::Opt> {
        let str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {path}"))?;
        let config = toml::from_str(&str)
            .with_context(|| format!("Failed to parse configuration file {path}"))?;
        Ok(config)
    }
}

/// Validated configuration of a remote comparison.
#[derive(Clone)]
pub struct Settings {
    pub api_key: String,
    pub api_base_url: Url,
    pub sadtalker_endpoint: Endpoint,
    pub wav2lip_endpoint: Endpoint,
    pub image_url: Url,
    pub audio_wav_url: Url,
    pub audio_mp3_url: Url,
    pub sadtalker_timeout: Duration,
    pub wav2lip_timeout: Duration,
    pub report_dir: PathBuf,
}

impl Settings {
    pub fn endpoint_for(&self, model: ModelKind) -> &Endpoint {
        match model {
            ModelKind::SadTalker => &self.sadtalker_endpoint,
            ModelKind::Wav2Lip => &self.wav2lip_endpoint,
        }
    }

    pub fn timeout_for(&self, model: ModelKind) -> Duration {
        match model {
            ModelKind::SadTalker => self.sadtalker_timeout,
            ModelKind::Wav2Lip => self.wav2lip_timeout,
        }
    }

    pub fn audio_for(&self, model: ModelKind) -> &Url {
        match model.preferred_audio() {
            AudioFormat::Mp3 => &self.audio_mp3_url,
            AudioFormat::Wav => &self.audio_wav_url,
        }
    }
}

impl Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("api_key", &"<redacted>")
            .field("api_base_url", &self.api_base_url.as_str())
            .field("sadtalker_endpoint", &self.sadtalker_endpoint.id())
            .field("wav2lip_endpoint", &self.wav2lip_endpoint.id())
            .field("image_url", &self.image_url.as_str())
            .field("audio_wav_url", &self.audio_wav_url.as_str())
            .field("audio_mp3_url", &self.audio_mp3_url.as_str())
            .field("sadtalker_timeout", &self.sadtalker_timeout)
            .field("wav2lip_timeout", &self.wav2lip_timeout)
            .field("report_dir", &self.report_dir)
            .finish()
    }
}

impl TryFrom<Config> for Settings {
    type Error = RunnerError;

    fn try_from(config: Config) -> Result<Self, Self::Error> {
        let api_key = config.api_key.trim().to_string();
        if api_key.is_empty() {
            return Err(RunnerError::configuration(
                "missing API key, set RUNPOD_API_KEY or --api-key",
            ));
        }

        let endpoint = |id: &str, env: &str| {
            Endpoint::new(id).map_err(|err| {
                RunnerError::configuration(format!("{env}: {}", err.message))
            })
        };

        Ok(Self {
            api_key,
            api_base_url: parse_url("api_base_url", &config.api_base_url)?,
            sadtalker_endpoint: endpoint(&config.sadtalker_endpoint_id, "SADTALKER_ENDPOINT_ID")?,
            wav2lip_endpoint: endpoint(&config.wav2lip_endpoint_id, "WAV2LIP_ENDPOINT_ID")?,
            image_url: parse_url("image_url", &config.image_url)?,
            audio_wav_url: parse_url("audio_wav_url", &config.audio_wav_url)?,
            audio_mp3_url: parse_url("audio_mp3_url", &config.audio_mp3_url)?,
            sadtalker_timeout: positive_secs("sadtalker_timeout_secs", config.sadtalker_timeout_secs)?,
            wav2lip_timeout: positive_secs("wav2lip_timeout_secs", config.wav2lip_timeout_secs)?,
            report_dir: PathBuf::from(config.report_dir),
        })
    }
}

fn parse_url(field: &str, raw: &str) -> Result<Url, RunnerError> {
    Url::parse(raw.trim())
        .map_err(|err| RunnerError::configuration(format!("{field} {raw:?} is not a URL: {err}")))
}

fn positive_secs(field: &str, secs: u64) -> Result<Duration, RunnerError> {
    if secs == 0 {
        return Err(RunnerError::configuration(format!(
            "{field} must be greater than zero"
        )));
    }
    Ok(Duration::from_secs(secs))
}
