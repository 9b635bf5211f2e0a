use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{FailureKind, RunnerError, RunnerResult};

/// Directory scoped to one job holding downloaded inputs and produced videos.
///
/// With cleanup enabled the directory is removed on drop; removal errors are only logged.
#[derive(Debug)]
pub struct WorkDir {
    path: PathBuf,
    cleanup: bool,
}

impl WorkDir {
    /// Creates `<root>/<prefix>_<job_id>`.
    ///
    /// With cleanup enabled an existing non-empty directory is refused, since it would be
    /// removed along with files this run did not create.
    pub fn create(root: &Path, prefix: &str, job_id: &str, cleanup: bool) -> RunnerResult<Self> {
        if job_id.is_empty() || job_id.contains(['/', '\\']) || job_id.starts_with('.') {
            return Err(RunnerError::configuration(format!(
                "invalid job id {job_id:?}"
            )));
        }
        let path = root.join(format!("{prefix}_{job_id}"));
        if cleanup && !is_empty_or_missing(&path) {
            return Err(RunnerError::configuration(format!(
                "working directory {} already holds files, refusing to clean it up",
                path.display()
            )));
        }
        fs::create_dir_all(&path).map_err(|err| {
            RunnerError::new(
                FailureKind::Execution,
                format!("failed to create working directory {}: {err}", path.display()),
            )
        })?;
        debug!(path = %path.display(), "Created working directory");

        Ok(Self { path, cleanup })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join(&self, name: impl AsRef<Path>) -> PathBuf {
        self.path.join(name)
    }

    /// Creates an empty subdirectory for one model's results, discarding leftovers of earlier runs.
    pub fn subdir(&self, name: &str) -> RunnerResult<PathBuf> {
        let dir = self.path.join(name);
        if dir.exists() {
            debug!(path = %dir.display(), "Clearing previous results");
            fs::remove_dir_all(&dir)?;
        }
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

fn is_empty_or_missing(path: &Path) -> bool {
    match fs::read_dir(path) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => !path.exists(),
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if !self.cleanup {
            return;
        }
        match fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed working directory"),
            Err(err) => debug!(path = %self.path.display(), "Ignoring cleanup failure: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_is_namespaced_by_job_id() {
        let root = tempfile::tempdir().unwrap();
        let work_dir = WorkDir::create(root.path(), "sadtalker", "job-1", false).unwrap();
        assert_eq!(work_dir.path(), root.path().join("sadtalker_job-1"));
        assert!(work_dir.path().is_dir());

        let results = work_dir.subdir("results").unwrap();
        assert!(results.is_dir());
        drop(work_dir);
        assert!(root.path().join("sadtalker_job-1").is_dir());
    }

    #[test]
    fn cleanup_removes_directory_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let path = {
            let work_dir = WorkDir::create(root.path(), "wav2lip", "job-2", true).unwrap();
            std::fs::write(work_dir.join("input_image.png"), b"png").unwrap();
            work_dir.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn cleanup_of_vanished_directory_is_silent() {
        let root = tempfile::tempdir().unwrap();
        let work_dir = WorkDir::create(root.path(), "wav2lip", "job-3", true).unwrap();
        std::fs::remove_dir_all(work_dir.path()).unwrap();
        drop(work_dir);
    }

    #[test]
    fn rejects_job_ids_escaping_the_root() {
        let root = tempfile::tempdir().unwrap();
        for job_id in ["", "../x", "a/b", ".hidden"] {
            let err = WorkDir::create(root.path(), "compare", job_id, false).unwrap_err();
            assert_eq!(err.kind, FailureKind::Configuration);
        }
    }

    #[test]
    fn subdir_starts_empty_on_reuse() {
        let root = tempfile::tempdir().unwrap();
        let work_dir = WorkDir::create(root.path(), "sadtalker", "job-4", false).unwrap();
        let results = work_dir.subdir("sadtalker_output").unwrap();
        std::fs::write(results.join("old.mp4"), b"old").unwrap();

        let results = work_dir.subdir("sadtalker_output").unwrap();
        assert!(results.is_dir());
        assert_eq!(std::fs::read_dir(&results).unwrap().count(), 0);
    }

    #[test]
    fn cleanup_refuses_populated_directory() {
        let root = tempfile::tempdir().unwrap();
        let existing = root.path().join("compare_job-5");
        std::fs::create_dir_all(&existing).unwrap();
        std::fs::write(existing.join("notes.txt"), b"keep me").unwrap();

        let err = WorkDir::create(root.path(), "compare", "job-5", true).unwrap_err();
        assert_eq!(err.kind, FailureKind::Configuration);
        assert!(existing.join("notes.txt").is_file());

        // Reuse is fine when the directory is kept
        let work_dir = WorkDir::create(root.path(), "compare", "job-5", false).unwrap();
        drop(work_dir);
        assert!(existing.join("notes.txt").is_file());
    }

    #[test]
    fn cleanup_accepts_empty_existing_directory() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("wav2lip_job-6")).unwrap();
        let path = {
            let work_dir = WorkDir::create(root.path(), "wav2lip", "job-6", true).unwrap();
            work_dir.path().to_path_buf()
        };
        assert!(!path.exists());
    }
}
