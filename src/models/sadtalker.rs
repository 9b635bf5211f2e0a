use std::path::{Path, PathBuf};

use serde_json::json;

use crate::local::process::Invocation;
use crate::models::model::{LocalModel, ModelKind};
use crate::models::options::{to_flags, ModelOptions, OptionFlag};

pub const OPTION_FLAGS: &[OptionFlag] = &[
    OptionFlag::value("face_model_resolution", "--size", "256"),
    OptionFlag::value("pose_style", "--pose_style", "0"),
    // Still mode skips head motion and is considerably faster
    OptionFlag::switch("still_mode", "--still", true),
    OptionFlag::value("preprocess", "--preprocess", "crop"),
    OptionFlag::value("enhancer", "--enhancer", "gfpgan"),
];

pub fn default_options() -> ModelOptions {
    let options = json!({
        "still_mode": true,
        "preprocess": "crop",
        "enhancer": "gfpgan",
        "pose_style": 0,
        "face_model_resolution": 256
    });
    serde_json::from_value(options).unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct SadTalker {
    pub python: PathBuf,
    /// Checkout containing `inference.py`, also used as working directory
    pub root: PathBuf,
}

impl SadTalker {
    pub fn new(python: impl Into<PathBuf>, root: impl Into<PathBuf>) -> Self {
        Self {
            python: python.into(),
            root: root.into(),
        }
    }
}

impl LocalModel for SadTalker {
    fn kind(&self) -> ModelKind {
        ModelKind::SadTalker
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
            .arg("--driven_audio")
            .arg(audio)
            .arg("--source_image")
            .arg(image)
            .arg("--result_dir")
            .arg(output_dir)
            .args(to_flags(OPTION_FLAGS, options))
            .current_dir(&self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_inference_command_with_defaults() {
        let model = SadTalker::new("python", "/workspace/SadTalker");
        let invocation = model.invocation(
            Path::new("/tmp/job/input_image.png"),
            Path::new("/tmp/job/input_audio.mp3"),
            Path::new("/tmp/job/results"),
            &default_options(),
        );

        assert_eq!(
            invocation.command_line(),
            "python /workspace/SadTalker/inference.py \
             --driven_audio /tmp/job/input_audio.mp3 \
             --source_image /tmp/job/input_image.png \
             --result_dir /tmp/job/results \
             --size 256 --pose_style 0 --still --preprocess crop --enhancer gfpgan"
        );
        assert_eq!(
            invocation.current_dir.as_deref(),
            Some(Path::new("/workspace/SadTalker"))
        );
    }
}
