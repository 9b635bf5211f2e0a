use std::path::{Path, PathBuf};

use serde_json::json;

use crate::local::process::Invocation;
use crate::models::model::{LocalModel, ModelKind};
use crate::models::options::{to_flags, ModelOptions, OptionFlag};

pub const OPTION_FLAGS: &[OptionFlag] = &[
    OptionFlag::value("resize_factor", "--resize_factor", "1"),
    OptionFlag::value("pad_top", "--pad_top", "0"),
    OptionFlag::value("pad_bottom", "--pad_bottom", "10"),
    OptionFlag::value("pad_left", "--pad_left", "0"),
    OptionFlag::value("pad_right", "--pad_right", "0"),
    OptionFlag::switch("nosmooth", "--nosmooth", false),
];

/// Name of the video Wav2Lip is told to write inside the output directory
pub const OUTPUT_FILE_NAME: &str = "wav2lip_result.mp4";

pub fn default_options() -> ModelOptions {
    let options = json!({
        "quality": "high",
        "pad_top": 0,
        "pad_bottom": 10,
        "pad_left": 0,
        "pad_right": 0,
        "resize_factor": 1,
        "nosmooth": false
    });
    serde_json::from_value(options).unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct Wav2Lip {
    pub python: PathBuf,
    pub root: PathBuf,
    pub checkpoint: PathBuf,
}

impl Wav2Lip {
    /// Uses the GAN checkpoint shipped under `<root>/checkpoints`.
    pub fn new(python: impl Into<PathBuf>, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            python: python.into(),
            checkpoint: root.join("checkpoints").join("wav2lip_gan.pth"),
            root,
        }
    }

    pub fn with_checkpoint(mut self, checkpoint: impl Into<PathBuf>) -> Self {
        self.checkpoint = checkpoint.into();
        self
    }
}

impl LocalModel for Wav2Lip {
    fn kind(&self) -> ModelKind {
        ModelKind::Wav2Lip
    }

    fn invocation(
        &self,
        image: &Path,
        audio: &Path,
        output_dir: &Path,
        options: &ModelOptions,
    ) -> Invocation {
        Invocation::new(&self.python)
            .arg(self.root.join("inference.py"))
            .arg("--checkpoint_path")
            .arg(&self.checkpoint)
            .arg("--face")
            .arg(image)
            .arg("--audio")
            .arg(audio)
            .arg("--outfile")
            .arg(output_dir.join(OUTPUT_FILE_NAME))
            .args(to_flags(OPTION_FLAGS, options))
            .current_dir(&self.root)
    }
}
