//! Generation client: the single seam between the pipeline and the model.
//!
//! Every stage that needs text from the generative capability (voters, the
//! tie-break judge, syntax repair, block groups) goes through
//! [`GenerationClient`]. The production implementation wraps an
//! `edgequake_llm` provider; tests substitute scripted clients.
//!
//! ## Retry Strategy
//!
//! [`generate_with_retry`] implements the voter retry loop: a fixed number
//! of attempts with a fixed backoff between them. An attempt fails when the
//! call errors or the reply is empty after fence stripping. Errors are
//! logged and swallowed; exhausting the budget yields `text: None` rather
//! than an `Err`, because an empty voter is outvoted downstream instead of
//! aborting the pipeline.

use crate::config::ConversionConfig;
use crate::error::{GenerationError, Pdf2LatexError};
use crate::pipeline::input::SourceDocument;
use crate::pipeline::postprocess;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Token totals reported by a client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// One call to the generative capability.
///
/// `attachments` carries the source document (or a group of page images);
/// an empty slice is a text-only call. Implementations may fail, may return
/// empty text, and need not be deterministic.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn generate(
        &self,
        attachments: &[SourceDocument],
        prompt: &str,
    ) -> Result<String, GenerationError>;

    /// Cumulative token usage, if the client tracks it.
    fn usage(&self) -> TokenUsage {
        TokenUsage::default()
    }
}

/// [`GenerationClient`] backed by an `edgequake_llm` provider.
///
/// Attachments are sent as base64 parts of a single user message together
/// with the prompt text.
pub struct LlmGenerationClient {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
}

impl LlmGenerationClient {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ConversionConfig) -> Self {
        Self {
            provider,
            options: build_options(config),
            input_tokens: AtomicU64::new(0),
            output_tokens: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl GenerationClient for LlmGenerationClient {
    async fn generate(
        &self,
        attachments: &[SourceDocument],
        prompt: &str,
    ) -> Result<String, GenerationError> {
        let message = if attachments.is_empty() {
            ChatMessage::user(prompt)
        } else {
            ChatMessage::user_with_images(
                prompt,
                attachments.iter().map(SourceDocument::to_image_data).collect(),
            )
        };
        let messages = vec![message];

        let response = self
            .provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        self.input_tokens
            .fetch_add(response.prompt_tokens as u64, Ordering::Relaxed);
        self.output_tokens
            .fetch_add(response.completion_tokens as u64, Ordering::Relaxed);
        debug!(
            "generation: {} input tokens, {} output tokens",
            response.prompt_tokens, response.completion_tokens
        );

        Ok(response.content)
    }

    fn usage(&self) -> TokenUsage {
        TokenUsage {
            input_tokens: self.input_tokens.load(Ordering::Relaxed),
            output_tokens: self.output_tokens.load(Ordering::Relaxed),
        }
    }
}

/// Build `CompletionOptions` from the conversion config.
fn build_options(config: &ConversionConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

// ── Retry loop ───────────────────────────────────────────────────────────

/// Result of a retried generation.
#[derive(Debug, Clone)]
pub struct Attempted {
    /// Fence-stripped, non-empty text; `None` when every attempt failed.
    pub text: Option<String>,
    /// Attempts made (successful one included).
    pub attempts: u32,
    /// Error of the most recent failed attempt.
    pub last_error: Option<GenerationError>,
}

/// Call `client` up to `max_attempts` times, waiting `backoff` between
/// attempts, until it returns non-empty text after fence stripping.
///
/// Never returns an error: failures are logged under `label` and reported
/// through [`Attempted::last_error`].
pub async fn generate_with_retry(
    client: &dyn GenerationClient,
    attachments: &[SourceDocument],
    prompt: &str,
    max_attempts: u32,
    backoff: Duration,
    label: &str,
) -> Attempted {
    let max_attempts = max_attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=max_attempts {
        if attempt > 1 {
            warn!(
                "{}: retry {}/{} after {}ms",
                label,
                attempt - 1,
                max_attempts - 1,
                backoff.as_millis()
            );
            sleep(backoff).await;
        }

        match client.generate(attachments, prompt).await {
            Ok(reply) => {
                let text = postprocess::clean_reply(&reply);
                if !text.trim().is_empty() {
                    debug!("{}: accepted on attempt {}", label, attempt);
                    return Attempted {
                        text: Some(text),
                        attempts: attempt,
                        last_error: None,
                    };
                }
                warn!("{}: attempt {} returned empty text", label, attempt);
                last_error = Some(GenerationError::Empty);
            }
            Err(e) => {
                warn!("{}: attempt {} failed — {}", label, attempt, e);
                last_error = Some(e);
            }
        }
    }

    Attempted {
        text: None,
        attempts: max_attempts,
        last_error,
    }
}

// ── Provider resolution ──────────────────────────────────────────────────

/// Default model for a named provider. PDF-native models come first because
/// the voter path attaches the whole PDF.
pub fn default_model_for(provider_name: &str) -> &'static str {
    match provider_name {
        "openai" | "azure" => "gpt-4.1",
        "anthropic" => "claude-sonnet-4-20250514",
        _ => "gemini-2.5-pro",
    }
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`) — used as-is.
/// 2. **Named provider + model** (`config.provider_name`) — built through
///    [`ProviderFactory::create_llm_provider`], which reads the matching API
///    key from the environment.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **Gemini key present** (`GEMINI_API_KEY`) — preferred because Gemini
///    reads PDF attachments natively.
/// 5. **Full auto-detection** (`ProviderFactory::from_env`).
pub fn resolve_provider(config: &ConversionConfig) -> Result<Arc<dyn LLMProvider>, Pdf2LatexError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(default_model_for(name));
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if let Ok(key) = std::env::var("GEMINI_API_KEY") {
        if !key.is_empty() {
            let model = config.model.as_deref().unwrap_or(default_model_for("gemini"));
            return create_provider("gemini", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| Pdf2LatexError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set GEMINI_API_KEY, OPENAI_API_KEY, or ANTHROPIC_API_KEY.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, Pdf2LatexError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        Pdf2LatexError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}
