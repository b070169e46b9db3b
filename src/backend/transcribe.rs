//! `whisper-api` transcriber: any OpenAI-compatible `/audio/transcriptions`
//! endpoint (OpenAI, Groq, a local faster-whisper server, ...).
//!
//! Requests `response_format=verbose_json` so the response carries
//! per-segment timings, which the weaver needs to resolve `[[ts:…]]` markers.
//!
//! Settings:
//!
//! | Key | Default |
//! |-----|---------|
//! | `base_url` | `https://api.openai.com/v1` |
//! | `model` | `whisper-1` |
//! | `api_key_env` | `OPENAI_API_KEY` |
//! | `language` | unset (auto-detect) |
//! | `prompt` | unset |
//! | `timeout_secs` | `900` |

use super::{Transcriber, TranscriptSegment};
use crate::config::BackendConfig;
use crate::error::TranscriptionError;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

pub struct WhisperApiTranscriber {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    language: Option<String>,
    prompt: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VerboseTranscription {
    #[serde(default)]
    text: String,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    segments: Option<Vec<ApiSegment>>,
}

#[derive(Debug, Deserialize)]
struct ApiSegment {
    start: f64,
    end: f64,
    text: String,
}

impl WhisperApiTranscriber {
    /// Build from settings. Fails when the endpoint is the hosted OpenAI API
    /// and no key is available, since every call would be rejected.
    pub fn from_config(config: &BackendConfig) -> Result<Self, String> {
        let base_url = config
            .get_or("base_url", "https://api.openai.com/v1")
            .trim_end_matches('/')
            .to_string();
        let key_env = config.get_or("api_key_env", "OPENAI_API_KEY");
        let api_key = std::env::var(key_env).ok().filter(|k| !k.trim().is_empty());
        if api_key.is_none() && base_url.contains("api.openai.com") {
            return Err(format!(
                "{key_env} is not set; export it or point base_url at a local server"
            ));
        }
        let timeout_secs: u64 = config.parse_or("timeout_secs", 900)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| e.to_string())?;

        Ok(Self {
            client,
            endpoint: format!("{base_url}/audio/transcriptions"),
            model: config.get_or("model", "whisper-1").to_string(),
            api_key,
            language: config
                .get("language")
                .filter(|l| *l != "auto")
                .map(str::to_string),
            prompt: config.get("prompt").map(str::to_string),
        })
    }
}

#[async_trait]
impl Transcriber for WhisperApiTranscriber {
    fn name(&self) -> &str {
        "whisper-api"
    }

    async fn transcribe(
        &self,
        media_path: &Path,
    ) -> Result<Vec<TranscriptSegment>, TranscriptionError> {
        let bytes = tokio::fs::read(media_path)
            .await
            .map_err(|e| TranscriptionError::MediaUnreadable {
                path: media_path.to_path_buf(),
                detail: e.to_string(),
            })?;
        let file_name = media_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "media.mp4".to_string());

        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("application/octet-stream")
            .map_err(|e| TranscriptionError::Request(e.to_string()))?;

        let mut form = Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("response_format", "verbose_json")
            .text("timestamp_granularities[]", "segment");
        if let Some(ref language) = self.language {
            form = form.text("language", language.clone());
        }
        if let Some(ref prompt) = self.prompt {
            form = form.text("prompt", prompt.clone());
        }

        debug!("Sending transcription request to: {}", self.endpoint);
        let mut request = self.client.post(&self.endpoint).multipart(form);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TranscriptionError::Request(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TranscriptionError::Request(e.to_string()))?;
        if !status.is_success() {
            return Err(TranscriptionError::Api {
                status: status.as_u16(),
                body,
            });
        }

        parse_verbose_json(&body)
    }
}

/// Map a `verbose_json` body to segments.
///
/// Servers that ignore `timestamp_granularities` return only `text`; that
/// becomes a single segment spanning the reported duration.
fn parse_verbose_json(body: &str) -> Result<Vec<TranscriptSegment>, TranscriptionError> {
    let parsed: VerboseTranscription =
        serde_json::from_str(body).map_err(|e| TranscriptionError::Parse(e.to_string()))?;

    match parsed.segments {
        Some(segments) => Ok(segments
            .into_iter()
            .map(|s| TranscriptSegment::new(s.start, s.end, s.text.trim()))
            .collect()),
        None if parsed.text.trim().is_empty() => Ok(Vec::new()),
        None => Ok(vec![TranscriptSegment::new(
            0.0,
            parsed.duration.unwrap_or(0.0),
            parsed.text.trim(),
        )]),
    }
}
