use std::fs;
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;
use tracing::info;
use url::Url;

use crate::bail_runner;
use crate::error::{FailureKind, RunnerError, RunnerResult};

pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Downloads `url` to `destination` and returns the number of bytes written.
///
/// `file://` URLs are copied from the local filesystem.
#[tracing::instrument(level = "info", skip(client, destination), fields(url = %url))]
pub fn fetch_asset(client: &Client, url: &Url, destination: &Path) -> RunnerResult<u64> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }

    let written = match url.scheme() {
        "file" => {
            let source = url.to_file_path().map_err(|_| {
                RunnerError::new(FailureKind::Transport, format!("invalid file URL {url}"))
            })?;
            fs::copy(&source, destination).map_err(|err| {
                RunnerError::new(
                    FailureKind::Transport,
                    format!("failed to copy {}: {err}", source.display()),
                )
            })?
        }
        "http" | "https" => {
            let bytes = client
                .get(url.clone())
                .timeout(DOWNLOAD_TIMEOUT)
                .send()
                .and_then(|response| response.error_for_status())
                .and_then(|response| response.bytes())
                .map_err(|err| {
                    let mut err = RunnerError::from(err);
                    err.message = format!("failed to download {url}: {}", err.message);
                    err
                })?;
            fs::write(destination, &bytes)?;
            bytes.len() as u64
        }
        scheme => bail_runner!(
            FailureKind::Transport,
            "unsupported URL scheme {} for {}",
            scheme,
            url
        ),
    };

    info!(bytes = written, destination = %destination.display(), "Fetched asset");
    Ok(written)
}

/// File extension of the last path segment of `url`, if it has a short alphanumeric one.
pub fn url_extension(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.next_back()?;
    let (_, extension) = segment.rsplit_once('.')?;
    let valid = !extension.is_empty()
        && extension.len() <= 5
        && extension.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then(|| extension.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copies_file_urls() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("profile.png");
        fs::write(&source, b"not really a png").unwrap();
        let url = Url::from_file_path(&source).unwrap();
        let destination = dir.path().join("job").join("input_image.png");

        let written = fetch_asset(&Client::new(), &url, &destination).unwrap();
        assert_eq!(written, 16);
        assert_eq!(fs::read(&destination).unwrap(), b"not really a png");
    }

    #[test]
    fn missing_local_file_is_a_transport_failure() {
        let dir = tempfile::tempdir().unwrap();
        let url = Url::from_file_path(dir.path().join("missing.wav")).unwrap();
        let err = fetch_asset(&Client::new(), &url, &dir.path().join("out.wav")).unwrap_err();
        assert_eq!(err.kind, FailureKind::Transport);
    }

    #[test]
    fn rejects_unknown_schemes() {
        let dir = tempfile::tempdir().unwrap();
        let url = Url::parse("ftp://example.com/test.wav").unwrap();
        let err = fetch_asset(&Client::new(), &url, &dir.path().join("out.wav")).unwrap_err();
        assert_eq!(err.kind, FailureKind::Transport);
        assert!(err.message.contains("ftp"));
    }

    #[test]
    fn extension_comes_from_last_segment() {
        let url = Url::parse("https://raw.githubusercontent.com/o/r/main/assets/test.MP3").unwrap();
        assert_eq!(url_extension(&url).as_deref(), Some("mp3"));
        let url = Url::parse("https://example.com/download?id=3").unwrap();
        assert_eq!(url_extension(&url), None);
        let url = Url::parse("https://example.com/archive.tar.gz.part-01").unwrap();
        assert_eq!(url_extension(&url), None);
    }
}
