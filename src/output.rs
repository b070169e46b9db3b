//! Output types: the woven document and its metadata.

use crate::config::{NoteSection, NoteStyle};
use crate::error::MarkerResolutionError;
use serde::{Deserialize, Serialize};

/// Metadata written to the document's YAML front-matter.
///
/// Holds only values derived from the task's inputs. There is
/// no generation timestamp here: the same inputs must render byte-identical
/// output. The ledger records when a task finished.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    /// URL or path the media came from.
    pub source: String,
    pub uploader: Option<String>,
    pub duration_secs: Option<f64>,
    pub style: NoteStyle,
    pub sections: Vec<NoteSection>,
    pub acquirer: String,
    pub transcriber: String,
    pub synthesizer: String,
    /// Model reported by the synthesizer, if any.
    pub model: Option<String>,
    /// Frames sampled for this document.
    pub frame_count: usize,
}

/// A finished note: synthesized text with every marker resolved or stripped.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub metadata: DocumentMetadata,
    /// Markdown body, markers already replaced.
    pub body: String,
    /// Markers that could not be resolved and were removed from `body`.
    pub unresolved: Vec<MarkerResolutionError>,
}

impl Document {
    /// Front-matter followed by the body.
    pub fn render(&self) -> String {
        let mut out = format_yaml_front_matter(&self.metadata, self.unresolved.len());
        out.push_str(&self.body);
        if !out.ends_with('\n') {
            out.push('\n');
        }
        out
    }
}

/// Format document metadata as YAML front-matter.
///
/// Strings go through `serde_json` so quotes and backslashes in titles are
/// escaped; a JSON string is a valid YAML double-quoted scalar.
fn format_yaml_front_matter(meta: &DocumentMetadata, unresolved: usize) -> String {
    let mut yaml = String::from("---\n");

    if let Some(ref t) = meta.title {
        yaml.push_str(&format!("title: {}\n", quote(t)));
    }
    yaml.push_str(&format!("source: {}\n", quote(&meta.source)));
    if let Some(ref u) = meta.uploader {
        yaml.push_str(&format!("uploader: {}\n", quote(u)));
    }
    if let Some(d) = meta.duration_secs {
        yaml.push_str(&format!("duration_secs: {:.1}\n", d));
    }
    yaml.push_str(&format!("style: {}\n", meta.style.as_str()));
    if !meta.sections.is_empty() {
        let names: Vec<&str> = meta.sections.iter().map(|s| s.as_str()).collect();
        yaml.push_str(&format!("sections: [{}]\n", names.join(", ")));
    }
    yaml.push_str(&format!("acquirer: {}\n", quote(&meta.acquirer)));
    yaml.push_str(&format!("transcriber: {}\n", quote(&meta.transcriber)));
    yaml.push_str(&format!("synthesizer: {}\n", quote(&meta.synthesizer)));
    if let Some(ref m) = meta.model {
        yaml.push_str(&format!("model: {}\n", quote(m)));
    }
    yaml.push_str(&format!("frames: {}\n", meta.frame_count));
    yaml.push_str("unresolved_markers_policy: strip\n");
    yaml.push_str(&format!("unresolved_markers: {}\n", unresolved));

    yaml.push_str("---\n\n");
    yaml
}

fn quote(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{}\"", s.replace('"', "'")))
}
