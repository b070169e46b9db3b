//! Transcript normalisation and formatting.
//!
//! Transcribers are not trusted to honour the segment ordering invariant.
//! [`normalize_segments`] enforces it once, right after transcription, so
//! everything downstream (prompt text, visual batches, the weaver's binary
//! search) can rely on sorted, non-overlapping, non-blank segments.

use crate::backend::TranscriptSegment;

/// Sort by start, clip overlaps, and drop blank or degenerate segments.
///
/// A segment overlapping its predecessor has its start moved up to the
/// predecessor's end; if that leaves it empty (`end <= start`) it is merged
/// into the predecessor's text instead of being lost.
pub fn normalize_segments(mut segments: Vec<TranscriptSegment>) -> Vec<TranscriptSegment> {
    segments.retain(|s| !s.text.trim().is_empty() && s.start.is_finite() && s.end.is_finite());
    segments.sort_by(|a, b| a.start.total_cmp(&b.start));

    let mut out: Vec<TranscriptSegment> = Vec::with_capacity(segments.len());
    for mut seg in segments {
        seg.text = seg.text.trim().to_string();
        seg.start = seg.start.max(0.0);
        if let Some(prev) = out.last_mut() {
            if seg.start < prev.end {
                seg.start = prev.end;
            }
            if seg.end <= seg.start {
                prev.text.push(' ');
                prev.text.push_str(&seg.text);
                prev.end = prev.end.max(seg.end);
                continue;
            }
        } else if seg.end < seg.start {
            seg.end = seg.start;
        }
        out.push(seg);
    }
    out
}

/// `HH:MM:SS`, truncating fractional seconds.
pub fn format_timestamp(secs: f64) -> String {
    let total = if secs.is_finite() && secs > 0.0 {
        secs as u64
    } else {
        0
    };
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

/// One `[HH:MM:SS] text` line per segment.
pub fn format_transcript(segments: &[TranscriptSegment]) -> String {
    segments
        .iter()
        .map(|s| format!("[{}] {}", format_timestamp(s.start), s.text))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Formatted lines of the segments starting in `[start, end)`.
pub fn text_between(segments: &[TranscriptSegment], start: f64, end: f64) -> String {
    let from = segments.partition_point(|s| s.start < start);
    let to = segments.partition_point(|s| s.start < end);
    format_transcript(&segments[from..to.max(from)])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(start: f64, end: f64, text: &str) -> TranscriptSegment {
        TranscriptSegment::new(start, end, text)
    }

    #[test]
    fn sorts_and_drops_blank() {
        let out = normalize_segments(vec![
            seg(2.0, 4.0, " world "),
            seg(1.0, 1.5, "   "),
            seg(0.0, 2.0, "hello"),
        ]);
        assert_eq!(out, vec![seg(0.0, 2.0, "hello"), seg(2.0, 4.0, "world")]);
    }

    #[test]
    fn clips_overlap() {
        let out = normalize_segments(vec![seg(0.0, 3.0, "a"), seg(2.0, 5.0, "b")]);
        assert_eq!(out, vec![seg(0.0, 3.0, "a"), seg(3.0, 5.0, "b")]);
    }

    #[test]
    fn swallowed_segment_is_merged() {
        let out = normalize_segments(vec![seg(0.0, 5.0, "a"), seg(1.0, 4.0, "b")]);
        assert_eq!(out, vec![seg(0.0, 5.0, "a b")]);
    }

    #[test]
    fn empty_stays_empty() {
        assert!(normalize_segments(Vec::new()).is_empty());
    }

    #[test]
    fn timestamp_format() {
        assert_eq!(format_timestamp(0.0), "00:00:00");
        assert_eq!(format_timestamp(2.9), "00:00:02");
        assert_eq!(format_timestamp(3725.0), "01:02:05");
        assert_eq!(format_timestamp(-1.0), "00:00:00");
    }

    #[test]
    fn transcript_lines() {
        let segs = vec![seg(0.0, 2.0, "hello"), seg(62.0, 64.0, "world")];
        assert_eq!(format_transcript(&segs), "[00:00:00] hello\n[00:01:02] world");
        assert_eq!(text_between(&segs, 60.0, 120.0), "[00:01:02] world");
        assert_eq!(text_between(&segs, 10.0, 20.0), "");
    }
}
