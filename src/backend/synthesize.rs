//! `llm` synthesizer: drive an `edgequake-llm` provider to write the notes.
//!
//! Prompt text lives in [`crate::prompts`]; this module only assembles the
//! messages, attaches frame grids when visual understanding is on, and
//! retries transient failures.
//!
//! ## Retry Strategy
//!
//! Exponential backoff (`retry_backoff_ms * 2^attempt`): with the default
//! 500 ms base and 3 retries the wait sequence is 500 ms → 1 s → 2 s.
//! A single wait never exceeds [`MAX_BACKOFF_MS`].
//!
//! Settings:
//!
//! | Key | Default |
//! |-----|---------|
//! | `provider` | auto-detected (see [`resolve_provider`]) |
//! | `model` | `gpt-4.1-nano` |
//! | `temperature` | `0.3` |
//! | `max_tokens` | `8192` |
//! | `max_retries` | `3` |
//! | `retry_backoff_ms` | `500` |
//! | `vision` | `true` |
//! | `system_prompt` | built-in |

use super::{SynthesisRequest, SynthesisResult, Synthesizer};
use crate::config::BackendConfig;
use crate::error::SynthesisError;
use crate::prompts::{build_system_prompt, build_user_prompt};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Upper bound for one retry wait.
pub const MAX_BACKOFF_MS: u64 = 60_000;

pub struct LlmSynthesizer {
    provider: Arc<dyn LLMProvider>,
    temperature: f32,
    max_tokens: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
    vision: bool,
    system_prompt: Option<String>,
}

impl LlmSynthesizer {
    /// Build from settings, resolving the provider from config or environment.
    pub fn from_config(config: &BackendConfig) -> Result<Self, String> {
        let model = config.get_or("model", DEFAULT_MODEL).to_string();
        let provider = resolve_provider(config.get("provider"), &model)
            .map_err(|e| e.to_string())?;
        Self::with_provider(provider, config)
    }

    /// Wrap a pre-built provider (custom middleware, tests).
    ///
    /// The reported model is whatever the provider was created with, which
    /// may differ from the `model` setting when it came from the environment.
    pub fn with_provider(
        provider: Arc<dyn LLMProvider>,
        config: &BackendConfig,
    ) -> Result<Self, String> {
        let temperature: f32 = config.parse_or("temperature", 0.3)?;
        Ok(Self {
            provider,
            temperature: temperature.clamp(0.0, 2.0),
            max_tokens: config.parse_or("max_tokens", 8192)?,
            max_retries: config.parse_or("max_retries", 3)?,
            retry_backoff_ms: config.parse_or("retry_backoff_ms", 500)?,
            vision: config.parse_or("vision", true)?,
            system_prompt: config.get("system_prompt").map(str::to_string),
        })
    }

    fn build_messages(&self, request: &SynthesisRequest) -> Vec<ChatMessage> {
        let system = self
            .system_prompt
            .clone()
            .unwrap_or_else(|| build_system_prompt(request));
        let user = build_user_prompt(request);

        let images: Vec<ImageData> = if self.vision {
            request
                .visual_batches
                .iter()
                .map(|b| {
                    ImageData::new(b.image.data_base64.clone(), b.image.mime_type.clone())
                        .with_detail("high")
                })
                .collect()
        } else {
            Vec::new()
        };

        let user_message = if images.is_empty() {
            ChatMessage::user(user)
        } else {
            ChatMessage::user_with_images(user, images)
        };
        vec![ChatMessage::system(system), user_message]
    }

    fn build_options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

#[async_trait]
impl Synthesizer for LlmSynthesizer {
    fn name(&self) -> &str {
        "llm"
    }

    fn supports_vision(&self) -> bool {
        self.vision
    }

    async fn generate(&self, request: &SynthesisRequest) -> Result<SynthesisResult, SynthesisError> {
        let messages = self.build_messages(request);
        let options = self.build_options();
        let mut last_err: Option<String> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = backoff_ms(self.retry_backoff_ms, attempt);
                warn!(
                    "synthesis retry {}/{} after {}ms",
                    attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match self.provider.chat(&messages, Some(&options)).await {
                Ok(response) if response.content.trim().is_empty() => {
                    warn!("synthesis attempt {} returned empty content", attempt + 1);
                    last_err = Some(SynthesisError::EmptyResponse.to_string());
                }
                Ok(response) => {
                    debug!(
                        "synthesis: {} input tokens, {} output tokens",
                        response.prompt_tokens, response.completion_tokens
                    );
                    return Ok(SynthesisResult {
                        text: response.content,
                        model: Some(reported_model(&response.model, self.provider.model())),
                        input_tokens: response.prompt_tokens,
                        output_tokens: response.completion_tokens,
                    });
                }
                Err(e) => {
                    let err_msg = format!("{}", e);
                    warn!("synthesis attempt {} failed: {}", attempt + 1, err_msg);
                    last_err = Some(err_msg);
                }
            }
        }

        Err(SynthesisError::Failed {
            retries: self.max_retries,
            detail: last_err.unwrap_or_else(|| "Unknown error".to_string()),
        })
    }
}

/// Wait before retry `attempt` (1-based), saturating at [`MAX_BACKOFF_MS`].
fn backoff_ms(base_ms: u64, attempt: u32) -> u64 {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    base_ms.saturating_mul(factor).min(MAX_BACKOFF_MS)
}

/// The model named in the response, else the one the provider was built with.
fn reported_model(response_model: &str, provider_model: &str) -> String {
    if response_model.trim().is_empty() {
        provider_model.to_string()
    } else {
        response_model.to_string()
    }
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. **Named provider** (`provider` setting) with the configured model.
/// 2. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`),
///    honoured even when several API keys are present.
/// 3. **OpenAI key present** → OpenAI with the configured model.
/// 4. **Full auto-detection** (`ProviderFactory::from_env`).
pub fn resolve_provider(
    provider_name: Option<&str>,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, SynthesisError> {
    if let Some(name) = provider_name {
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return create_provider(&prov, &env_model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| SynthesisError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, SynthesisError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        SynthesisError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}
