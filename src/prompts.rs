//! Prompt construction for the `llm` synthesizer.
//!
//! Keeping every prompt fragment here means changing note behaviour (a new
//! style, a stricter marker rule) is a one-file edit, and tests can inspect
//! the assembled prompt without a live model.
//!
//! The marker grammar taught here must match what
//! [`crate::pipeline::weave`] parses.

use crate::backend::SynthesisRequest;
use crate::config::{NoteSection, NoteStyle};
use std::fmt::Write as _;

/// Base instructions shared by every style.
pub const BASE_SYSTEM_PROMPT: &str = r#"You are an expert note-taker. You turn the transcript of a video into clean, well-structured Markdown notes that someone who has not watched the video can learn from.

Follow these rules precisely:

1. CONTENT
   - Cover every substantive point in the order the video presents it
   - Do not invent facts that are not in the transcript or the frames
   - Drop filler, greetings, sponsor reads and calls to subscribe

2. STRUCTURE
   - Start with a single # title
   - Use ## for major topics and ### for subtopics
   - Use lists for enumerations and steps, fenced code blocks for code

3. OUTPUT FORMAT
   - Output ONLY the Markdown notes
   - Do NOT wrap the notes in ```markdown fences
   - Do NOT add commentary about the task"#;

/// Marker rules appended when timestamp links are requested.
pub const TIMESTAMP_MARKER_RULES: &str = r#"
4. TIMESTAMP MARKERS
   - After each heading and each key point, write [[ts:T]] where T is the
     start time of the supporting transcript line, copied from its
     [HH:MM:SS] prefix (e.g. [[ts:00:04:31]])
   - Only use times that appear in the transcript"#;

/// Marker rules appended when screenshots are requested.
pub const FRAME_MARKER_RULES: &str = r#"
5. SCREENSHOT MARKERS
   - Where a visual would help (a slide, a diagram, code on screen), write
     [[frame:T]] on its own line, T being the moment to capture (HH:MM:SS)
   - Use at most one screenshot per section
   - Never write Markdown image links yourself"#;

fn style_instructions(style: NoteStyle) -> &'static str {
    match style {
        NoteStyle::Minimal => "Style: minimal. Terse bullet points with only the key facts.",
        NoteStyle::Detailed => {
            "Style: detailed. Full explanations under each heading, keeping examples the speaker gives."
        }
        NoteStyle::Academic => {
            "Style: academic. Formal register; call out definitions, claims and cited sources."
        }
        NoteStyle::Tutorial => {
            "Style: tutorial. Numbered, reproducible steps with the exact commands or settings shown."
        }
        NoteStyle::Business => {
            "Style: business. Lead with decisions, numbers and action items; keep background brief."
        }
    }
}

fn section_instructions(section: NoteSection) -> &'static str {
    match section {
        NoteSection::Toc => "Begin with a table of contents listing every ## heading.",
        NoteSection::Summary => "End with a ## Summary section of at most five bullet points.",
        NoteSection::Glossary => {
            "End with a ## Glossary section defining the technical terms introduced."
        }
    }
}

/// Assemble the system prompt for one request.
pub fn build_system_prompt(request: &SynthesisRequest) -> String {
    let mut prompt = String::from(BASE_SYSTEM_PROMPT);
    if request.timestamp_links {
        prompt.push_str(TIMESTAMP_MARKER_RULES);
    }
    if request.screenshots {
        prompt.push_str(FRAME_MARKER_RULES);
    }

    prompt.push_str("\n\n");
    prompt.push_str(style_instructions(request.style));
    for section in &request.sections {
        prompt.push('\n');
        prompt.push_str(section_instructions(*section));
    }
    if let Some(ref language) = request.language {
        let _ = write!(prompt, "\nWrite the notes in {language}.");
    }
    if let Some(ref extras) = request.extras {
        let extras = extras.trim();
        if !extras.is_empty() {
            let _ = write!(prompt, "\n\nAdditional instructions:\n{extras}");
        }
    }
    prompt
}

/// Assemble the user message: title plus transcript, or frame-aligned
/// batches when visual understanding is on.
///
/// Batch `k` in the text corresponds to image `k` attached to the message.
pub fn build_user_prompt(request: &SynthesisRequest) -> String {
    let mut prompt = String::new();
    if let Some(ref title) = request.title {
        let _ = writeln!(prompt, "Video title: {title}\n");
    }

    if request.visual_batches.is_empty() {
        prompt.push_str("Transcript:\n");
        prompt.push_str(&request.transcript);
        return prompt;
    }

    prompt.push_str(
        "The transcript is split into batches. Each batch comes with one attached \
         image: a grid of frames from that time range, read left-to-right, \
         top-to-bottom. Use the frames for what is shown on screen.\n",
    );
    for (i, batch) in request.visual_batches.iter().enumerate() {
        let _ = write!(
            prompt,
            "\n--- Batch {} (image {}) [{} - {}] ---\n{}\n",
            i + 1,
            i + 1,
            crate::pipeline::transcript::format_timestamp(batch.start),
            crate::pipeline::transcript::format_timestamp(batch.end),
            batch.transcript
        );
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::VisualBatch;
    use crate::pipeline::encode::EncodedImage;

    fn request() -> SynthesisRequest {
        SynthesisRequest {
            title: Some("Ownership in Rust".into()),
            transcript: "[00:00:00] hello\n[00:00:02] world".into(),
            style: NoteStyle::Tutorial,
            sections: vec![NoteSection::Summary],
            timestamp_links: true,
            screenshots: false,
            extras: Some("Mention the borrow checker.".into()),
            language: None,
            visual_batches: Vec::new(),
        }
    }

    #[test]
    fn system_prompt_carries_options() {
        let p = build_system_prompt(&request());
        assert!(p.contains("[[ts:T]]"));
        assert!(!p.contains("[[frame:T]]"));
        assert!(p.contains("Style: tutorial"));
        assert!(p.contains("## Summary"));
        assert!(p.ends_with("Mention the borrow checker."));
    }

    #[test]
    fn screenshot_rules_only_when_requested() {
        let mut req = request();
        req.timestamp_links = false;
        req.screenshots = true;
        let p = build_system_prompt(&req);
        assert!(p.contains("[[frame:T]]"));
        assert!(!p.contains("[[ts:T]]"));
    }

    #[test]
    fn user_prompt_plain_transcript() {
        let p = build_user_prompt(&request());
        assert!(p.starts_with("Video title: Ownership in Rust"));
        assert!(p.ends_with("[00:00:02] world"));
    }

    #[test]
    fn user_prompt_numbers_batches() {
        let mut req = request();
        let image = EncodedImage {
            data_base64: String::new(),
            mime_type: "image/png".into(),
        };
        req.visual_batches = vec![
            VisualBatch {
                start: 0.0,
                end: 90.0,
                transcript: "first".into(),
                image: image.clone(),
            },
            VisualBatch {
                start: 90.0,
                end: 125.0,
                transcript: "second".into(),
                image,
            },
        ];
        let p = build_user_prompt(&req);
        assert!(p.contains("--- Batch 1 (image 1) [00:00:00 - 00:01:30] ---\nfirst"));
        assert!(p.contains("--- Batch 2 (image 2) [00:01:30 - 00:02:05] ---\nsecond"));
        assert!(!p.contains("Transcript:"));
    }
}
