use std::fmt::Display;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::local::process::Invocation;
use crate::models::options::ModelOptions;
use crate::models::{sadtalker, wav2lip};

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    SadTalker,
    Wav2Lip,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Wav,
    Mp3,
}

impl ModelKind {
    /// Identifier used for rate lookup, working directory names and JSON output
    pub fn id(&self) -> &'static str {
        match self {
            ModelKind::SadTalker => "sadtalker",
            ModelKind::Wav2Lip => "wav2lip",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ModelKind::SadTalker => "SadTalker",
            ModelKind::Wav2Lip => "Wav2Lip",
        }
    }

    pub fn default_options(&self) -> ModelOptions {
        match self {
            ModelKind::SadTalker => sadtalker::default_options(),
            ModelKind::Wav2Lip => wav2lip::default_options(),
        }
    }

    /// SadTalker renders full head motion and gets the longer budget
    pub fn default_timeout(&self) -> Duration {
        match self {
            ModelKind::SadTalker => Duration::from_secs(1800),
            ModelKind::Wav2Lip => Duration::from_secs(600),
        }
    }

    /// SadTalker accepts MP3 input, Wav2Lip prefers WAV
    pub fn preferred_audio(&self) -> AudioFormat {
        match self {
            ModelKind::SadTalker => AudioFormat::Mp3,
            ModelKind::Wav2Lip => AudioFormat::Wav,
        }
    }
}

impl Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// A model installed next to the runner and driven through its command line.
pub trait LocalModel {
    fn kind(&self) -> ModelKind;

    /// Builds the command that turns `image` and `audio` into a video under `output_dir`.
    fn invocation(
        &self,
        image: &Path,
        audio: &Path,
        output_dir: &Path,
        options: &ModelOptions,
    ) -> Invocation;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_match_ids() {
        for kind in [ModelKind::SadTalker, ModelKind::Wav2Lip] {
            let encoded = serde_json::to_value(kind).unwrap();
            assert_eq!(encoded, kind.id());
            assert_eq!(serde_json::from_value::<ModelKind>(encoded).unwrap(), kind);
        }
    }
}
