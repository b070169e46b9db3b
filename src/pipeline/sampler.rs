//! Frame sampler: still images at a fixed interval.
//!
//! Timestamps are `k * interval` for `k = 0, 1, 2, …` while strictly below
//! the media duration, so a 10 s clip sampled every 2 s yields frames at
//! 0, 2, 4, 6 and 8. Multiplying rather than accumulating keeps long
//! videos free of float drift.
//!
//! The sampler yields a lazy stream: nothing is extracted until the caller
//! polls, and dropping the stream stops extraction.
//!
//! Extraction itself sits behind [`FrameExtractor`]. The default
//! [`FfmpegFrameExtractor`] shells out to `ffprobe` and `ffmpeg`.

use crate::error::SamplerError;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio_stream::Stream;
use tracing::debug;

/// One sampled still.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Position in the sampled sequence, 0-based.
    pub index: usize,
    /// Seconds from media start.
    pub timestamp: f64,
    /// Image file written by the extractor.
    pub path: PathBuf,
}

/// A boxed stream of frames in timestamp order.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, SamplerError>> + Send>>;

/// Reads duration and single frames out of a media file.
#[async_trait]
pub trait FrameExtractor: Send + Sync {
    /// Media duration in seconds.
    async fn probe_duration(&self, media: &Path) -> Result<f64, SamplerError>;

    /// Write the frame at `timestamp` to `dest` as an image file.
    async fn extract(&self, media: &Path, timestamp: f64, dest: &Path) -> Result<(), SamplerError>;
}

/// `ffprobe` / `ffmpeg` on `PATH` (or explicit binaries).
#[derive(Debug, Clone)]
pub struct FfmpegFrameExtractor {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Default for FfmpegFrameExtractor {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

impl FfmpegFrameExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binaries(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }
}

#[async_trait]
impl FrameExtractor for FfmpegFrameExtractor {
    async fn probe_duration(&self, media: &Path) -> Result<f64, SamplerError> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(media)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| SamplerError::Probe {
                path: media.to_path_buf(),
                detail: format!("failed to run {}: {e}", self.ffprobe.display()),
            })?;

        if !output.status.success() {
            return Err(SamplerError::Probe {
                path: media.to_path_buf(),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|d| d.is_finite() && *d >= 0.0)
            .ok_or_else(|| SamplerError::Probe {
                path: media.to_path_buf(),
                detail: format!("unexpected ffprobe output '{}'", stdout.trim()),
            })
    }

    async fn extract(&self, media: &Path, timestamp: f64, dest: &Path) -> Result<(), SamplerError> {
        let output = Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-loglevel", "error", "-y", "-ss"])
            .arg(format!("{timestamp:.3}"))
            .arg("-i")
            .arg(media)
            .args(["-frames:v", "1"])
            .arg(dest)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| SamplerError::Extract {
                timestamp,
                detail: format!("failed to run {}: {e}", self.ffmpeg.display()),
            })?;

        if !output.status.success() {
            return Err(SamplerError::Extract {
                timestamp,
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        // ffmpeg exits 0 without writing anything when seeking past the last frame.
        if !dest.exists() {
            return Err(SamplerError::Extract {
                timestamp,
                detail: "no frame decoded".to_string(),
            });
        }
        Ok(())
    }
}

/// The sampling schedule, as a finite iterator of `(index, timestamp)`.
#[derive(Debug, Clone)]
pub struct FrameTimestamps {
    interval: f64,
    duration: f64,
    next: usize,
}

impl FrameTimestamps {
    pub fn new(interval: f64, duration: f64) -> Result<Self, SamplerError> {
        if !interval.is_finite() || interval <= 0.0 {
            return Err(SamplerError::InvalidParameter(format!(
                "frame interval must be > 0, got {interval}"
            )));
        }
        if !duration.is_finite() || duration < 0.0 {
            return Err(SamplerError::InvalidParameter(format!(
                "media duration must be >= 0, got {duration}"
            )));
        }
        Ok(Self {
            interval,
            duration,
            next: 0,
        })
    }
}

impl Iterator for FrameTimestamps {
    type Item = (usize, f64);

    fn next(&mut self) -> Option<Self::Item> {
        let ts = self.next as f64 * self.interval;
        if ts >= self.duration {
            return None;
        }
        let k = self.next;
        self.next += 1;
        Some((k, ts))
    }
}

/// Writes frames for one media file into a directory.
#[derive(Clone)]
pub struct FrameSampler {
    extractor: Arc<dyn FrameExtractor>,
    frames_dir: PathBuf,
}

impl FrameSampler {
    pub fn new(extractor: Arc<dyn FrameExtractor>, frames_dir: impl Into<PathBuf>) -> Self {
        Self {
            extractor,
            frames_dir: frames_dir.into(),
        }
    }

    /// Probe the media duration, then sample every `interval` seconds.
    pub async fn sample(&self, media: &Path, interval: f64) -> Result<FrameStream, SamplerError> {
        // Validate before paying for a probe.
        FrameTimestamps::new(interval, 0.0)?;
        let duration = self.extractor.probe_duration(media).await?;
        self.sample_with_duration(media, interval, duration).await
    }

    /// Sample with a duration the caller already knows.
    pub async fn sample_with_duration(
        &self,
        media: &Path,
        interval: f64,
        duration: f64,
    ) -> Result<FrameStream, SamplerError> {
        let schedule = FrameTimestamps::new(interval, duration)?;
        tokio::fs::create_dir_all(&self.frames_dir)
            .await
            .map_err(|e| {
                SamplerError::Image(format!(
                    "create '{}': {e}",
                    self.frames_dir.display()
                ))
            })?;
        debug!(
            "Sampling every {}s over {:.1}s into {}",
            interval,
            duration,
            self.frames_dir.display()
        );

        let extractor = Arc::clone(&self.extractor);
        let frames_dir = self.frames_dir.clone();
        let media = media.to_path_buf();

        let s = stream::iter(schedule).then(move |(index, timestamp)| {
            let extractor = Arc::clone(&extractor);
            let path = frames_dir.join(format!("frame_{index:05}.png"));
            let media = media.clone();
            async move {
                extractor.extract(&media, timestamp, &path).await?;
                Ok(Frame {
                    index,
                    timestamp,
                    path,
                })
            }
        });

        Ok(Box::pin(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn schedule_excludes_duration() {
        let ts: Vec<f64> = FrameTimestamps::new(2.0, 10.0).unwrap().map(|(_, t)| t).collect();
        assert_eq!(ts, vec![0.0, 2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn schedule_includes_start_of_short_media() {
        let ts: Vec<(usize, f64)> = FrameTimestamps::new(10.0, 3.0).unwrap().collect();
        assert_eq!(ts, vec![(0, 0.0)]);
        assert_eq!(FrameTimestamps::new(1.0, 0.0).unwrap().count(), 0);
    }

    #[test]
    fn schedule_has_no_drift() {
        let last = FrameTimestamps::new(0.1, 1000.0).unwrap().last().unwrap();
        assert_eq!(last.0, 9999);
        assert!((last.1 - 999.9).abs() < 1e-9);
    }

    #[test]
    fn non_positive_interval_rejected() {
        for bad in [0.0, -2.0, f64::INFINITY, f64::NAN] {
            assert!(matches!(
                FrameTimestamps::new(bad, 10.0),
                Err(SamplerError::InvalidParameter(_))
            ));
        }
    }

    struct CountingExtractor {
        duration: f64,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl FrameExtractor for CountingExtractor {
        async fn probe_duration(&self, _media: &Path) -> Result<f64, SamplerError> {
            Ok(self.duration)
        }

        async fn extract(&self, _media: &Path, _ts: f64, dest: &Path) -> Result<(), SamplerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::fs::write(dest, b"png").await.unwrap();
            Ok(())
        }
    }

    #[tokio::test]
    async fn sampler_streams_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = Arc::new(CountingExtractor {
            duration: 10.0,
            calls: AtomicUsize::new(0),
        });
        let sampler = FrameSampler::new(extractor.clone(), dir.path().join("frames"));

        let mut stream = sampler.sample(Path::new("clip.mp4"), 2.0).await.unwrap();
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.timestamp, 0.0);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);

        let rest: Vec<Frame> = stream.try_collect().await.unwrap();
        let ts: Vec<f64> = rest.iter().map(|f| f.timestamp).collect();
        assert_eq!(ts, vec![2.0, 4.0, 6.0, 8.0]);
        assert_eq!(rest[3].index, 4);
        assert!(rest[3].path.ends_with("frames/frame_00004.png"));
        assert!(rest[3].path.exists());
    }

    #[tokio::test]
    async fn sampler_rejects_zero_interval_without_probing() {
        let dir = tempfile::tempdir().unwrap();
        let sampler = FrameSampler::new(
            Arc::new(CountingExtractor {
                duration: 10.0,
                calls: AtomicUsize::new(0),
            }),
            dir.path(),
        );
        assert!(matches!(
            sampler.sample(Path::new("clip.mp4"), 0.0).await,
            Err(SamplerError::InvalidParameter(_))
        ));
    }
}
