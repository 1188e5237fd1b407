//! Voter stage: N independent whole-document generations.
//!
//! Each configured prompt variant is one voter. All voters receive the same
//! [`SourceDocument`] and run concurrently; the stage joins only when every
//! voter has either produced text or exhausted its retry budget. A voter
//! never cancels or observes its siblings, and a voter that fails entirely
//! still occupies its slot with an empty response so that response `i`
//! always belongs to voter `i`.

use crate::config::ConversionConfig;
use crate::error::GenerationError;
use crate::output::VoterSummary;
use crate::pipeline::generation::{generate_with_retry, GenerationClient};
use crate::pipeline::input::SourceDocument;
use crate::pipeline::postprocess::split_lines;
use futures::future::join_all;
use std::time::Duration;
use tracing::{info, warn};

/// One voter's final answer.
///
/// Earlier failed attempts are discarded, never merged into `lines`.
#[derive(Debug, Clone)]
pub struct VoterResponse {
    pub voter_index: usize,
    /// Output lines in order; empty for a failed voter.
    pub lines: Vec<String>,
    pub success: bool,
    pub attempts: u32,
    pub last_error: Option<GenerationError>,
}

impl VoterResponse {
    /// Build a response from already-known lines (used by tests and callers
    /// replaying stored voter output).
    pub fn from_text(voter_index: usize, text: &str) -> Self {
        let lines = split_lines(text);
        Self {
            voter_index,
            success: !lines.is_empty(),
            lines,
            attempts: 1,
            last_error: None,
        }
    }
}

/// Runs the configured voters against one document.
pub struct VoterStage<'a> {
    client: &'a dyn GenerationClient,
    config: &'a ConversionConfig,
}

impl<'a> VoterStage<'a> {
    pub fn new(client: &'a dyn GenerationClient, config: &'a ConversionConfig) -> Self {
        Self { client, config }
    }

    /// Produce exactly one response per configured variant, in variant order.
    pub async fn run(&self, document: &SourceDocument) -> (Vec<VoterResponse>, Vec<VoterSummary>) {
        let variants = self.config.voters.variants();
        let total = variants.len();
        info!("Running {} voters", total);

        if let Some(ref cb) = self.config.progress_callback {
            cb.on_reconcile_start(total);
        }

        let tasks = variants
            .iter()
            .enumerate()
            .map(|(index, variant)| self.run_voter(index, total, &variant.prompt, document));

        // join_all preserves input order regardless of completion order.
        let responses: Vec<VoterResponse> = join_all(tasks).await;

        let summaries = responses
            .iter()
            .zip(variants)
            .map(|(r, v)| VoterSummary {
                voter_index: r.voter_index,
                variant: v.name.clone(),
                success: r.success,
                attempts: r.attempts,
                line_count: r.lines.len(),
                error: r.last_error.clone(),
            })
            .collect();

        let ok = responses.iter().filter(|r| r.success).count();
        info!("Voters finished: {}/{} produced text", ok, total);
        (responses, summaries)
    }

    async fn run_voter(
        &self,
        index: usize,
        total: usize,
        prompt: &str,
        document: &SourceDocument,
    ) -> VoterResponse {
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_voter_start(index, total);
        }

        let label = format!("Voter {}", index + 1);
        let attempted = generate_with_retry(
            self.client,
            std::slice::from_ref(document),
            prompt,
            self.config.max_retries,
            Duration::from_millis(self.config.retry_backoff_ms),
            &label,
        )
        .await;

        match attempted.text {
            Some(text) => {
                let lines = split_lines(&text);
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_voter_complete(index, total, lines.len());
                }
                VoterResponse {
                    voter_index: index,
                    lines,
                    success: true,
                    attempts: attempted.attempts,
                    last_error: None,
                }
            }
            None => {
                let err = attempted
                    .last_error
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "Unknown error".to_string());
                warn!("{}: giving up after {} attempts — {}", label, attempted.attempts, err);
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_voter_failed(index, total, &err);
                }
                VoterResponse {
                    voter_index: index,
                    lines: Vec::new(),
                    success: false,
                    attempts: attempted.attempts,
                    last_error: attempted.last_error,
                }
            }
        }
    }
}

/// Pad every response with empty lines up to the longest one.
///
/// Returns the padded line matrix (`[voter][line]`) and the common length.
/// Shorter responses are extended, never the longer ones truncated.
pub fn pad_responses(responses: &[VoterResponse]) -> (Vec<Vec<String>>, usize) {
    let max_len = responses.iter().map(|r| r.lines.len()).max().unwrap_or(0);
    let padded = responses
        .iter()
        .map(|r| {
            let mut lines = r.lines.clone();
            lines.resize(max_len, String::new());
            lines
        })
        .collect();
    (padded, max_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PromptVariant, VoterConfiguration};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replies with the prompt's variant name; the voter named "mute" always
    /// returns empty text and "broken" always errors.
    struct EchoClient {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl GenerationClient for EchoClient {
        async fn generate(
            &self,
            attachments: &[SourceDocument],
            prompt: &str,
        ) -> Result<String, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(attachments.len(), 1, "voters attach the source document");
            match prompt {
                "mute" => Ok("```latex\n```".to_string()),
                "broken" => Err(GenerationError::Transport("HTTP 500".into())),
                other => Ok(format!("```latex\n\\documentclass{{article}}\n% {other}\n```")),
            }
        }
    }

    fn config_with(prompts: &[&str]) -> ConversionConfig {
        ConversionConfig::builder()
            .voters(VoterConfiguration::new(
                prompts.iter().map(|p| PromptVariant::custom(*p, *p)).collect(),
            ))
            .retry_backoff_ms(0)
            .build()
            .unwrap()
    }

    fn doc() -> SourceDocument {
        SourceDocument::new(b"%PDF-1.4".to_vec(), "application/pdf")
    }

    #[tokio::test]
    async fn one_response_per_voter_in_order() {
        let config = config_with(&["a", "b", "c"]);
        let client = EchoClient { calls: AtomicUsize::new(0) };
        let (responses, summaries) = VoterStage::new(&client, &config).run(&doc()).await;

        assert_eq!(responses.len(), 3);
        for (i, r) in responses.iter().enumerate() {
            assert_eq!(r.voter_index, i);
            assert!(r.success);
            assert_eq!(r.attempts, 1);
        }
        assert_eq!(responses[1].lines, vec!["\\documentclass{article}", "% b"]);
        assert_eq!(summaries[2].variant, "c");
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn empty_voter_retries_then_yields_empty_response() {
        let config = config_with(&["a", "mute"]);
        let client = EchoClient { calls: AtomicUsize::new(0) };
        let (responses, summaries) = VoterStage::new(&client, &config).run(&doc()).await;

        assert!(responses[0].success);
        let mute = &responses[1];
        assert!(!mute.success);
        assert!(mute.lines.is_empty());
        assert_eq!(mute.attempts, 3);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1 + 3);
        assert_eq!(summaries[1].line_count, 0);
        assert!(summaries[1].error.is_some());
    }

    #[tokio::test]
    async fn failing_voter_does_not_abort_siblings() {
        let config = config_with(&["broken", "a", "broken"]);
        let client = EchoClient { calls: AtomicUsize::new(0) };
        let (responses, _) = VoterStage::new(&client, &config).run(&doc()).await;

        assert_eq!(responses.len(), 3);
        assert!(!responses[0].success);
        assert!(responses[1].success);
        assert!(!responses[2].success);
        assert!(matches!(
            responses[0].last_error,
            Some(GenerationError::Transport(ref m)) if m == "HTTP 500"
        ));
    }

    #[test]
    fn pad_extends_short_responses_only() {
        let responses = vec![
            VoterResponse::from_text(0, "a\nb\nc"),
            VoterResponse::from_text(1, "a"),
            VoterResponse::from_text(2, ""),
        ];
        let (padded, len) = pad_responses(&responses);
        assert_eq!(len, 3);
        assert_eq!(padded[0], vec!["a", "b", "c"]);
        assert_eq!(padded[1], vec!["a", "", ""]);
        assert_eq!(padded[2], vec!["", "", ""]);
    }
}
