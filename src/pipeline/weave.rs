//! Content weaver: resolve markers in synthesized text.
//!
//! Grammar (canonical spelling, see [`super::postprocess`] for the loose
//! spellings that are rewritten into it):
//!
//! | Marker | Resolves to |
//! |--------|-------------|
//! | `[[ts:T]]` | `[HH:MM:SS](<source>?t=<secs>)`, the segment with the greatest start ≤ T |
//! | `[[frame:T]]` | `![HH:MM:SS](frames/<file>)`, the nearest frame within tolerance of T |
//! | `[[frame#N]]` | the N-th sampled frame (0-based) |
//!
//! `T` is seconds (`12.5`), `MM:SS` or `HH:MM:SS`.
//!
//! Markers that cannot be resolved are removed from the text and reported
//! in [`Document::unresolved`]. The document front-matter records the count.
//! A removed marker takes its single leading space with it when it sits
//! before whitespace, punctuation or the end of the text. Everything outside
//! a marker is left byte-for-byte as the synthesizer wrote it.
//!
//! [`Weaver::weave`] is a pure function of its inputs: no clock, no
//! randomness, no filesystem access.

use super::sampler::Frame;
use super::transcript::format_timestamp;
use crate::backend::{SynthesisResult, TranscriptSegment};
use crate::error::MarkerResolutionError;
use crate::output::{Document, DocumentMetadata};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Slack when matching a timestamp to a segment start, absorbing float noise
/// such as `1.999999` for `2.0`.
const START_EPSILON: f64 = 0.001;

static RE_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?P<lead> ?)\[\[(?:(?P<kind>ts|frame):(?P<value>[^\[\]\s]+)|frame#(?P<index>[^\[\]\s]+))\]\]",
    )
    .unwrap()
});

/// Characters after which a stripped marker's leading space is dropped too.
fn closes_gap(next: Option<char>) -> bool {
    match next {
        None => true,
        Some(c) => c.is_whitespace() || matches!(c, '.' | ',' | ';' | ':' | '!' | '?' | ')'),
    }
}

/// Parse `12.5`, `MM:SS` or `HH:MM:SS` into seconds.
pub fn parse_marker_time(value: &str) -> Option<f64> {
    let parts: Vec<&str> = value.split(':').collect();
    let secs = match parts.as_slice() {
        [s] => s.parse::<f64>().ok()?,
        [m, s] => m.parse::<u64>().ok()? as f64 * 60.0 + s.parse::<f64>().ok()?,
        [h, m, s] => {
            h.parse::<u64>().ok()? as f64 * 3600.0
                + m.parse::<u64>().ok()? as f64 * 60.0
                + s.parse::<f64>().ok()?
        }
        _ => return None,
    };
    (secs.is_finite() && secs >= 0.0).then_some(secs)
}

/// Resolves markers against one task's transcript and frames.
#[derive(Debug, Clone)]
pub struct Weaver {
    metadata: DocumentMetadata,
    link_timestamps: bool,
    tolerance_secs: f64,
}

impl Weaver {
    /// `metadata.source` becomes the target of timestamp links.
    pub fn new(metadata: DocumentMetadata) -> Self {
        Self {
            metadata,
            link_timestamps: true,
            tolerance_secs: 0.0,
        }
    }

    /// Render timestamps as links (`true`) or plain `HH:MM:SS` text.
    pub fn link_timestamps(mut self, enabled: bool) -> Self {
        self.link_timestamps = enabled;
        self
    }

    /// Maximum distance between a `[[frame:T]]` marker and a sampled frame,
    /// and how far past the last segment a `[[ts:T]]` may point.
    pub fn tolerance_secs(mut self, secs: f64) -> Self {
        self.tolerance_secs = if secs.is_finite() { secs.max(0.0) } else { 0.0 };
        self
    }

    /// Replace every marker in `synthesis.text`.
    ///
    /// `segments` must be normalised (sorted, non-overlapping) and `frames`
    /// sorted by timestamp, which is how the sampler yields them.
    pub fn weave(
        &self,
        synthesis: &SynthesisResult,
        segments: &[TranscriptSegment],
        frames: &[Frame],
    ) -> Document {
        let text = synthesis.text.as_str();
        let mut unresolved = Vec::new();
        let body = RE_MARKER
            .replace_all(text, |caps: &Captures<'_>| {
                let lead = &caps["lead"];
                match self.resolve(caps, segments, frames) {
                    Ok(rendered) => format!("{lead}{rendered}"),
                    Err(e) => {
                        unresolved.push(e);
                        let end = caps.get(0).map_or(text.len(), |m| m.end());
                        if closes_gap(text[end..].chars().next()) {
                            String::new()
                        } else {
                            lead.to_string()
                        }
                    }
                }
            })
            .into_owned();

        let mut metadata = self.metadata.clone();
        if metadata.model.is_none() {
            metadata.model = synthesis.model.clone();
        }
        metadata.frame_count = frames.len();

        Document {
            metadata,
            body,
            unresolved,
        }
    }

    fn resolve(
        &self,
        caps: &Captures<'_>,
        segments: &[TranscriptSegment],
        frames: &[Frame],
    ) -> Result<String, MarkerResolutionError> {
        let marker = caps[0][caps["lead"].len()..].to_string();

        if let Some(index) = caps.name("index") {
            let index: usize = index
                .as_str()
                .parse()
                .map_err(|_| MarkerResolutionError::Malformed {
                    marker: marker.clone(),
                })?;
            return frames
                .get(index)
                .map(render_frame)
                .ok_or(MarkerResolutionError::FrameIndexOutOfRange {
                    marker,
                    index,
                    available: frames.len(),
                });
        }

        let at_secs = parse_marker_time(&caps["value"]).ok_or_else(|| MarkerResolutionError::Malformed {
            marker: marker.clone(),
        })?;

        match &caps["kind"] {
            "ts" => self
                .segment_for(segments, at_secs)
                .map(|seg| self.render_timestamp(seg.start))
                .ok_or(MarkerResolutionError::NoSegment { marker, at_secs }),
            _ => self
                .frame_near(frames, at_secs)
                .map(render_frame)
                .ok_or(MarkerResolutionError::NoFrame {
                    marker,
                    at_secs,
                    tolerance_secs: self.tolerance_secs,
                }),
        }
    }

    fn segment_for<'a>(
        &self,
        segments: &'a [TranscriptSegment],
        at_secs: f64,
    ) -> Option<&'a TranscriptSegment> {
        let idx = segments.partition_point(|s| s.start <= at_secs + START_EPSILON);
        let seg = segments.get(idx.checked_sub(1)?)?;
        let is_last = idx == segments.len();
        if is_last && at_secs > seg.end + self.tolerance_secs {
            return None;
        }
        Some(seg)
    }

    fn frame_near<'a>(&self, frames: &'a [Frame], at_secs: f64) -> Option<&'a Frame> {
        frames
            .iter()
            .filter(|f| (f.timestamp - at_secs).abs() <= self.tolerance_secs + START_EPSILON)
            .min_by(|a, b| {
                (a.timestamp - at_secs)
                    .abs()
                    .total_cmp(&(b.timestamp - at_secs).abs())
            })
    }

    fn render_timestamp(&self, secs: f64) -> String {
        let label = format_timestamp(secs);
        if !self.link_timestamps || self.metadata.source.is_empty() {
            return label;
        }
        let whole = secs.max(0.0) as u64;
        let source = &self.metadata.source;
        let target = if source.starts_with("http://") || source.starts_with("https://") {
            let sep = if source.contains('?') { '&' } else { '?' };
            format!("{source}{sep}t={whole}")
        } else {
            format!("{source}#t={whole}")
        };
        if target.contains(char::is_whitespace) {
            format!("[{label}](<{target}>)")
        } else {
            format!("[{label}]({target})")
        }
    }
}

fn render_frame(frame: &Frame) -> String {
    let file = frame
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| frame.path.display().to_string());
    format!("![{}](frames/{})", format_timestamp(frame.timestamp), file)
}
