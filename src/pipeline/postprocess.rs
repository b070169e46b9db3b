//! Post-processing: deterministic cleanup of synthesized note text.
//!
//! Runs on every synthesizer's output before weaving. Language models drift
//! from the requested format in small, predictable ways:
//!
//! - Wrapping the whole answer in ` ```markdown ... ``` ` fences
//! - Writing markers loosely (`[[ TS: 01:05 ]]`, `[[Frame #3]]`)
//! - Inventing `![screenshot](image.png)` links instead of frame markers
//! - Windows line endings, trailing spaces, runs of blank lines
//!
//! None of these rules touch wording. Rule order matters: fences come off
//! before heading spacing, and markers are normalised before the weaver's
//! strict parser sees them.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all cleanup rules to raw synthesizer output.
///
/// Rules (applied in order):
/// 1. Strip outer markdown fences
/// 2. Normalise line endings (CRLF → LF)
/// 3. Trim trailing whitespace per line
/// 4. Collapse 3+ consecutive blank lines down to 2
/// 5. Ensure heading lines have a blank line before them
/// 6. Normalise marker spelling to the canonical `[[ts:T]]` / `[[frame:T]]` / `[[frame#N]]`
/// 7. Remove hallucinated image links
/// 8. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 9. Ensure the text ends with exactly one newline
pub fn clean_markdown(input: &str) -> String {
    let s = strip_markdown_fences(input);
    let s = normalise_line_endings(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = normalise_heading_spacing(&s);
    let s = normalise_markers(&s);
    let s = remove_hallucinated_images(&s);
    let s = remove_invisible_chars(&s);
    ensure_final_newline(&s)
}

// ── Rule 1: Strip outer markdown fences ──────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?\n(.*)\n```\s*$").unwrap());

fn strip_markdown_fences(input: &str) -> String {
    if let Some(caps) = RE_OUTER_FENCES.captures(input.trim()) {
        caps[1].to_string()
    } else {
        input.to_string()
    }
}

// ── Rule 2: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 4: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{4,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n\n").to_string()
}

// ── Rule 5: Normalise heading spacing ────────────────────────────────────────

static RE_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#{1,6} \S").unwrap());

fn normalise_heading_spacing(input: &str) -> String {
    let mut result = String::with_capacity(input.len() + 64);
    let mut in_code = false;
    for (i, line) in input.lines().enumerate() {
        if line.trim_start().starts_with("```") {
            in_code = !in_code;
        }
        if !in_code && i > 0 && RE_HEADING.is_match(line) {
            let trimmed = result.trim_end_matches('\n');
            result.truncate(trimmed.len());
            result.push_str("\n\n");
        }
        result.push_str(line);
        result.push('\n');
    }
    result
}

// ── Rule 6: Normalise marker spelling ────────────────────────────────────────
//
// Accepts any case and stray whitespace inside the brackets, plus `=` in
// place of `:`. Anything that still does not match the grammar is left as
// written; the weaver reports it as malformed.

static RE_LOOSE_TS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\[\[\s*(?:ts|time|timestamp)\s*[:=]\s*([0-9:.]+)\s*\]\]").unwrap()
});

static RE_LOOSE_FRAME_AT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\[\[\s*frame\s*[:=]\s*([0-9:.]+)\s*\]\]").unwrap());

static RE_LOOSE_FRAME_INDEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\[\[\s*frame\s*#\s*([0-9]+)\s*\]\]").unwrap());

fn normalise_markers(input: &str) -> String {
    let s = RE_LOOSE_TS.replace_all(input, "[[ts:$1]]");
    let s = RE_LOOSE_FRAME_AT.replace_all(&s, "[[frame:$1]]");
    RE_LOOSE_FRAME_INDEX
        .replace_all(&s, "[[frame#$1]]")
        .to_string()
}

// ── Rule 7: Remove hallucinated image links ──────────────────────────────────
//
// The synthesizer never sees real image paths; it asks for frames through
// markers. Any `![alt](url)` it writes with a non-HTTP or placeholder URL
// is invented. Such links become an italic caption so the text survives.

static RE_IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)]*)\)").unwrap());

fn is_placeholder_url(url: &str) -> bool {
    let u = url.trim();
    if u.is_empty() {
        return true;
    }
    if !u.starts_with("http://") && !u.starts_with("https://") {
        return true;
    }
    let fake_domains = [
        "example.com",
        "placeholder.com",
        "via.placeholder.com",
        "dummyimage.com",
        "picsum.photos",
        "placehold.it",
    ];
    fake_domains.iter().any(|d| u.contains(d))
}

fn remove_hallucinated_images(input: &str) -> String {
    RE_IMAGE
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let alt = caps[1].trim();
            if is_placeholder_url(&caps[2]) {
                if alt.is_empty() {
                    String::new()
                } else {
                    format!("*{}*", alt)
                }
            } else {
                caps[0].to_string()
            }
        })
        .to_string()
}

// ── Rule 8: Remove invisible Unicode characters ──────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 9: Ensure text ends with single newline ─────────────────────────────

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_end();
    if trimmed.is_empty() {
        String::from("\n")
    } else {
        format!("{}\n", trimmed)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_fences() {
        assert_eq!(strip_markdown_fences("```markdown\n# Hi\nthere\n```"), "# Hi\nthere");
        assert_eq!(strip_markdown_fences("```\n# Hi\n```"), "# Hi");
        assert_eq!(strip_markdown_fences("# Hi"), "# Hi");
    }

    #[test]
    fn test_normalise_line_endings() {
        assert_eq!(normalise_line_endings("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn test_collapse_blank_lines() {
        assert_eq!(collapse_blank_lines("a\n\n\n\n\n\nb"), "a\n\n\nb");
    }

    #[test]
    fn test_heading_spacing() {
        let result = normalise_heading_spacing("some text\n## Heading\nmore text");
        assert!(result.contains("text\n\n## Heading\n"));
    }

    #[test]
    fn test_heading_spacing_skips_code_blocks() {
        let input = "```bash\n# a shell comment\n```";
        assert_eq!(normalise_heading_spacing(input), format!("{input}\n"));
    }

    #[test]
    fn test_normalise_markers() {
        assert_eq!(normalise_markers("at [[ TS : 01:05 ]]."), "at [[ts:01:05]].");
        assert_eq!(normalise_markers("[[Timestamp=12.5]]"), "[[ts:12.5]]");
        assert_eq!(normalise_markers("[[Frame: 30]]"), "[[frame:30]]");
        assert_eq!(normalise_markers("[[frame # 3]]"), "[[frame#3]]");
    }

    #[test]
    fn test_canonical_markers_untouched() {
        let input = "a [[ts:0.0]] b [[frame:2]] c [[frame#0]]";
        assert_eq!(normalise_markers(input), input);
    }

    #[test]
    fn test_remove_hallucinated_image() {
        let result = remove_hallucinated_images("![Slide 3](slide3.png)");
        assert_eq!(result, "*Slide 3*");
        let kept = remove_hallucinated_images("![Logo](https://cdn.rust-lang.org/logo.png)");
        assert!(kept.starts_with("![Logo]"));
    }

    #[test]
    fn test_remove_invisible() {
        assert_eq!(remove_invisible_chars("a\u{200B}b\u{FEFF}c"), "abc");
    }

    #[test]
    fn test_ensure_final_newline() {
        assert_eq!(ensure_final_newline("hello"), "hello\n");
        assert_eq!(ensure_final_newline("hello\n\n\n"), "hello\n");
        assert_eq!(ensure_final_newline(""), "\n");
    }

    #[test]
    fn test_clean_markdown_full_pipeline() {
        let input = "```markdown\n# Title\r\n\r\nIntro [[ TS:0 ]]   \n\n\n\n\n\n## Part\n```";
        let result = clean_markdown(input);
        assert!(result.starts_with("# Title\n"));
        assert!(result.contains("Intro [[ts:0]]\n"));
        assert!(!result.contains("\n\n\n\n"));
        assert!(result.ends_with("## Part\n"));
    }
}
