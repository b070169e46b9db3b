//! Built-in acquirers: normalise a source reference to a local media file.
//!
//! Downloads land in a per-task [`TempDir`] held by the returned
//! [`AcquisitionResult`]. The directory is removed when the last clone of
//! that result is dropped, whether the task completes, fails or is
//! cancelled, so downloaded media is never leaked.
//!
//! | Identity | Handles |
//! |----------|---------|
//! | `local`  | paths on disk |
//! | `http`   | direct media URLs (`.mp4`, `.webm`, `.mp3`, ...) |
//! | `yt-dlp` | platform pages (YouTube, Bilibili, ...) via the `yt-dlp` binary |
//! | `auto`   | picks one of the above per source |

use super::{Acquirer, AcquisitionResult, SourceMetadata};
use crate::config::{BackendConfig, DownloadQuality};
use crate::error::AcquisitionError;
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

/// File extensions the `http` acquirer downloads directly.
const MEDIA_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "webm", "mov", "avi", "m4v", "flv", "mp3", "m4a", "wav", "aac", "ogg", "opus",
];

/// Check if the source string looks like a URL.
pub fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Whether a URL's path ends in a known media extension.
pub fn is_direct_media_url(source: &str) -> bool {
    let Ok(parsed) = reqwest::Url::parse(source) else {
        return false;
    };
    parsed
        .path_segments()
        .and_then(|mut segs| segs.next_back())
        .and_then(|last| Path::new(last).extension())
        .and_then(|ext| ext.to_str())
        .map(|ext| MEDIA_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

// ── local ────────────────────────────────────────────────────────────────

/// Validates a path on disk; never copies it.
#[derive(Debug, Default)]
pub struct LocalFileAcquirer;

#[async_trait]
impl Acquirer for LocalFileAcquirer {
    fn name(&self) -> &str {
        "local"
    }

    async fn download(
        &self,
        source: &str,
        _quality: DownloadQuality,
    ) -> Result<AcquisitionResult, AcquisitionError> {
        if is_url(source) {
            return Err(AcquisitionError::UnsupportedSource {
                source_ref: source.to_string(),
                backend: self.name().to_string(),
            });
        }
        let path = PathBuf::from(source);

        match tokio::fs::File::open(&path).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err(AcquisitionError::PermissionDenied { path });
            }
            Err(_) => return Err(AcquisitionError::FileNotFound { path }),
        }
        if path.is_dir() {
            return Err(AcquisitionError::UnsupportedSource {
                source_ref: source.to_string(),
                backend: self.name().to_string(),
            });
        }

        debug!("Resolved local media: {}", path.display());
        let metadata = SourceMetadata {
            title: path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned()),
            url: source.to_string(),
            uploader: None,
        };
        Ok(AcquisitionResult::borrowed(path, metadata))
    }
}

// ── http ─────────────────────────────────────────────────────────────────

/// Streams a direct media URL to a temp file.
///
/// Settings: `timeout_secs` (default 600), `user_agent`.
pub struct HttpAcquirer {
    client: reqwest::Client,
}

impl HttpAcquirer {
    pub fn from_config(config: &BackendConfig) -> Result<Self, String> {
        let timeout_secs: u64 = config.parse_or("timeout_secs", 600)?;
        let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(timeout_secs));
        if let Some(ua) = config.get("user_agent") {
            builder = builder.user_agent(ua.to_string());
        }
        let client = builder.build().map_err(|e| e.to_string())?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Acquirer for HttpAcquirer {
    fn name(&self) -> &str {
        "http"
    }

    async fn download(
        &self,
        source: &str,
        _quality: DownloadQuality,
    ) -> Result<AcquisitionResult, AcquisitionError> {
        if !is_url(source) {
            return Err(AcquisitionError::UnsupportedSource {
                source_ref: source.to_string(),
                backend: self.name().to_string(),
            });
        }
        info!("Downloading media from: {}", source);
        let failed = |reason: String| AcquisitionError::DownloadFailed {
            url: source.to_string(),
            reason,
        };

        let response = self
            .client
            .get(source)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(failed(format!("HTTP {}", response.status())));
        }
        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("text/html"))
            .unwrap_or(false);
        if is_html {
            return Err(AcquisitionError::UnsupportedSource {
                source_ref: source.to_string(),
                backend: self.name().to_string(),
            });
        }

        let filename = extract_filename(source);
        let temp_dir = TempDir::new().map_err(|e| failed(format!("temp dir: {e}")))?;
        let file_path = temp_dir.path().join(&filename);

        let mut file = tokio::fs::File::create(&file_path)
            .await
            .map_err(|e| failed(format!("create temp file: {e}")))?;
        let mut body = response.bytes_stream();
        let mut written: u64 = 0;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| failed(e.to_string()))?;
            written += chunk.len() as u64;
            file.write_all(&chunk)
                .await
                .map_err(|e| failed(format!("write temp file: {e}")))?;
        }
        file.flush()
            .await
            .map_err(|e| failed(format!("flush temp file: {e}")))?;

        if written == 0 {
            return Err(failed("empty response body".into()));
        }
        info!("Downloaded {} bytes to: {}", written, file_path.display());

        let metadata = SourceMetadata {
            title: Path::new(&filename)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned()),
            url: source.to_string(),
            uploader: None,
        };
        Ok(AcquisitionResult {
            media_path: file_path,
            duration_secs: None,
            metadata,
            workspace: Some(Arc::new(temp_dir)),
        })
    }
}

/// Extract a reasonable filename from the URL path.
fn extract_filename(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    "downloaded.mp4".to_string()
}

// ── yt-dlp ───────────────────────────────────────────────────────────────

/// Shells out to `yt-dlp` for platform URLs.
///
/// Settings: `binary` (default `yt-dlp`), `cookies` (path to a cookies file).
pub struct YtDlpAcquirer {
    binary: String,
    cookies: Option<PathBuf>,
}

/// The subset of `--print-json` output we read.
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    title: Option<String>,
    duration: Option<f64>,
    uploader: Option<String>,
    #[serde(rename = "_filename")]
    filename: Option<PathBuf>,
}

impl YtDlpAcquirer {
    pub fn from_config(config: &BackendConfig) -> Self {
        Self {
            binary: config.get_or("binary", "yt-dlp").to_string(),
            cookies: config.get("cookies").map(PathBuf::from),
        }
    }

    fn format_for(quality: DownloadQuality) -> &'static str {
        match quality {
            DownloadQuality::Low => "worst[ext=mp4]/worst",
            DownloadQuality::Medium => "best[height<=480][ext=mp4]/best[height<=480]/best",
            DownloadQuality::High => "best[height<=1080][ext=mp4]/best[height<=1080]/best",
        }
    }
}

#[async_trait]
impl Acquirer for YtDlpAcquirer {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    async fn download(
        &self,
        source: &str,
        quality: DownloadQuality,
    ) -> Result<AcquisitionResult, AcquisitionError> {
        if !is_url(source) {
            return Err(AcquisitionError::UnsupportedSource {
                source_ref: source.to_string(),
                backend: self.name().to_string(),
            });
        }
        let tool_failed = |detail: String| AcquisitionError::ToolFailed {
            tool: self.binary.clone(),
            detail,
        };

        let temp_dir = TempDir::new().map_err(|e| tool_failed(format!("temp dir: {e}")))?;
        let template = temp_dir.path().join("media.%(ext)s");

        let mut cmd = Command::new(&self.binary);
        cmd.arg("--no-playlist")
            .arg("--no-progress")
            .arg("--print-json")
            .arg("-f")
            .arg(Self::format_for(quality))
            .arg("-o")
            .arg(&template);
        if let Some(ref cookies) = self.cookies {
            cmd.arg("--cookies").arg(cookies);
        }
        cmd.arg(source).kill_on_drop(true);

        info!("Fetching {} with {}", source, self.binary);
        let output = cmd
            .output()
            .await
            .map_err(|e| tool_failed(format!("could not start: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(tool_failed(stderr.trim().to_string()));
        }

        let info: Option<YtDlpInfo> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .rev()
            .find_map(|line| serde_json::from_str(line).ok());

        let media_path = match info.as_ref().and_then(|i| i.filename.clone()) {
            Some(p) if p.exists() => p,
            _ => find_downloaded(temp_dir.path())
                .await
                .ok_or_else(|| tool_failed("no media file was written".into()))?,
        };
        debug!("yt-dlp wrote {}", media_path.display());

        let metadata = SourceMetadata {
            title: info.as_ref().and_then(|i| i.title.clone()),
            url: source.to_string(),
            uploader: info.as_ref().and_then(|i| i.uploader.clone()),
        };
        Ok(AcquisitionResult {
            media_path,
            duration_secs: info.and_then(|i| i.duration),
            metadata,
            workspace: Some(Arc::new(temp_dir)),
        })
    }
}

/// First regular file named `media.*` in `dir`.
async fn find_downloaded(dir: &Path) -> Option<PathBuf> {
    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let is_media = path
            .file_stem()
            .map(|s| s == "media")
            .unwrap_or(false);
        if is_media && path.is_file() {
            return Some(path);
        }
    }
    None
}

// ── auto ─────────────────────────────────────────────────────────────────

/// Routes each source to `local`, `http` or `yt-dlp`.
pub struct AutoAcquirer {
    local: LocalFileAcquirer,
    http: HttpAcquirer,
    ytdlp: YtDlpAcquirer,
}

impl AutoAcquirer {
    pub fn from_config(config: &BackendConfig) -> Result<Self, String> {
        Ok(Self {
            local: LocalFileAcquirer,
            http: HttpAcquirer::from_config(config)?,
            ytdlp: YtDlpAcquirer::from_config(config),
        })
    }

    fn route(&self, source: &str) -> &dyn Acquirer {
        if !is_url(source) {
            &self.local
        } else if is_direct_media_url(source) {
            &self.http
        } else {
            &self.ytdlp
        }
    }
}

#[async_trait]
impl Acquirer for AutoAcquirer {
    fn name(&self) -> &str {
        "auto"
    }

    async fn download(
        &self,
        source: &str,
        quality: DownloadQuality,
    ) -> Result<AcquisitionResult, AcquisitionError> {
        let backend = self.route(source);
        debug!("auto acquirer routed '{}' to {}", source, backend.name());
        backend.download(source, quality).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://www.youtube.com/watch?v=abc"));
        assert!(is_url("http://example.com/v.mp4"));
        assert!(!is_url("/tmp/v.mp4"));
        assert!(!is_url("v.mp4"));
        assert!(!is_url(""));
    }

    #[test]
    fn test_direct_media_url() {
        assert!(is_direct_media_url("https://cdn.example.com/talks/intro.MP4"));
        assert!(is_direct_media_url("https://cdn.example.com/a.mp3?sig=1"));
        assert!(!is_direct_media_url("https://www.youtube.com/watch?v=abc"));
        assert!(!is_direct_media_url("https://www.bilibili.com/video/BV1xx"));
        assert!(!is_direct_media_url("not a url"));
    }

    #[test]
    fn test_extract_filename() {
        assert_eq!(extract_filename("https://x.org/a/b/clip.webm"), "clip.webm");
        assert_eq!(extract_filename("https://x.org/a/b/"), "downloaded.mp4");
    }

    #[test]
    fn auto_routes_by_source_shape() {
        let auto = AutoAcquirer::from_config(&BackendConfig::default()).unwrap();
        assert_eq!(auto.route("/data/clip.mp4").name(), "local");
        assert_eq!(auto.route("https://x.org/clip.mp4").name(), "http");
        assert_eq!(auto.route("https://youtu.be/abc").name(), "yt-dlp");
    }

    #[tokio::test]
    async fn local_acquirer_accepts_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lecture.mp4");
        std::fs::write(&path, b"\x00\x00\x00\x18ftypmp42").unwrap();

        let result = LocalFileAcquirer
            .download(path.to_str().unwrap(), DownloadQuality::Medium)
            .await
            .unwrap();
        assert_eq!(result.media_path, path);
        assert_eq!(result.metadata.title.as_deref(), Some("lecture"));
        assert!(result.workspace.is_none());
    }

    #[tokio::test]
    async fn local_acquirer_missing_file() {
        let err = LocalFileAcquirer
            .download("/definitely/not/here.mp4", DownloadQuality::Low)
            .await
            .unwrap_err();
        assert!(matches!(err, AcquisitionError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn local_acquirer_rejects_urls() {
        let err = LocalFileAcquirer
            .download("https://x.org/v.mp4", DownloadQuality::Low)
            .await
            .unwrap_err();
        assert!(matches!(err, AcquisitionError::UnsupportedSource { .. }));
    }

    #[test]
    fn ytdlp_format_per_quality() {
        assert!(YtDlpAcquirer::format_for(DownloadQuality::Low).starts_with("worst"));
        assert!(YtDlpAcquirer::format_for(DownloadQuality::High).contains("1080"));
    }
}
