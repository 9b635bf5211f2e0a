use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use serde_json::{json, Map};
use tracing::{info, warn};
use url::Url;
use walkdir::WalkDir;

use crate::error::{tail, FailureKind, RunnerError};
use crate::job::JobResult;

pub mod assets;
pub mod process;
pub mod workdir;

use process::{run_with_timeout, Invocation};

/// Extensions accepted as model output
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov"];

const STDOUT_LIMIT: usize = 4096;

/// Most recently created video under `dir`, searched recursively.
///
/// Falls back to the modification time where the filesystem does not record creation time.
pub fn find_latest_video(dir: &Path) -> Option<PathBuf> {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .map_or(false, |ext| {
                    VIDEO_EXTENSIONS
                        .iter()
                        .any(|video| ext.eq_ignore_ascii_case(video))
                })
        })
        .filter_map(|entry| {
            let metadata = entry.metadata().ok()?;
            let created = metadata
                .created()
                .or_else(|_| metadata.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            Some((created, entry.into_path()))
        })
        .max_by(|(a, path_a), (b, path_b)| a.cmp(b).then_with(|| path_a.cmp(path_b)))
        .map(|(_, path)| path)
}

/// Runs one local model command and locates the video it produced under `output_dir`.
///
/// Success requires a zero exit code and at least one video file; anything else is a `Failure`.
#[tracing::instrument(level = "info", skip(invocation, output_dir), fields(output_dir = %output_dir.display()))]
pub fn execute(invocation: &Invocation, output_dir: &Path, timeout: Duration) -> JobResult {
    let start = Instant::now();
    let output = match run_with_timeout(invocation, timeout) {
        Ok(output) => output,
        Err(err) => {
            warn!(kind = %err.kind, "Model run failed");
            return JobResult::failure(err, start.elapsed().as_secs_f64());
        }
    };
    let elapsed_seconds = output.elapsed.as_secs_f64();

    let Some(video) = find_latest_video(output_dir) else {
        return JobResult::failure(
            RunnerError::new(
                FailureKind::NoOutput,
                format!(
                    "no output produced: no {} file under {}",
                    VIDEO_EXTENSIONS.join("/"),
                    output_dir.display()
                ),
            ),
            elapsed_seconds,
        );
    };

    let located = fs::canonicalize(&video).and_then(|path| {
        let size = fs::metadata(&path)?.len();
        Ok((path, size))
    });
    let (video, output_size_bytes) = match located {
        Ok(located) => located,
        Err(err) => {
            return JobResult::failure(
                RunnerError::new(
                    FailureKind::NoOutput,
                    format!("output {} is not readable: {err}", video.display()),
                ),
                elapsed_seconds,
            )
        }
    };
    let Ok(output_reference) = Url::from_file_path(&video) else {
        return JobResult::failure(
            RunnerError::new(
                FailureKind::NoOutput,
                format!("output {} has no file URL", video.display()),
            ),
            elapsed_seconds,
        );
    };

    info!(
        video = %video.display(),
        bytes = output_size_bytes,
        elapsed_secs = elapsed_seconds,
        "Model run completed"
    );

    let mut raw_payload = Map::new();
    raw_payload.insert("command".into(), json!(invocation.command_line()));
    raw_payload.insert("output_path".into(), json!(video.to_string_lossy()));
    raw_payload.insert("stdout_tail".into(), json!(tail(&output.stdout, STDOUT_LIMIT)));

    JobResult::Success {
        elapsed_seconds,
        wall_seconds: start.elapsed().as_secs_f64(),
        output_reference,
        output_size_bytes,
        raw_payload,
    }
}
