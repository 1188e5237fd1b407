//! Tie-break judge: pick one candidate for a line without majority.
//!
//! The judge sees the source document, the disputed line number, a few
//! already-resolved lines for context and the numbered candidates. Its reply
//! is parsed for the first integer, read as a 1-based choice. Anything else
//! (no digits, out of range, a failed call) falls back to the first
//! candidate, which is also the most frequent one. The resolver never fails.

use crate::config::ConversionConfig;
use crate::pipeline::generation::GenerationClient;
use crate::pipeline::input::SourceDocument;
use crate::prompts::judge_prompt;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

/// Most candidates shown to the judge.
pub const MAX_CANDIDATES: usize = 3;

/// Resolved lines shown to the judge ahead of the disputed one.
pub const CONTEXT_LINES: usize = 3;

static RE_FIRST_INT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());

pub struct TiebreakResolver<'a> {
    client: &'a dyn GenerationClient,
    instruction: &'a str,
}

impl<'a> TiebreakResolver<'a> {
    pub fn new(client: &'a dyn GenerationClient, config: &'a ConversionConfig) -> Self {
        Self {
            client,
            instruction: &config.judge_prompt,
        }
    }

    /// Ask the judge to choose among `candidates` for `line_index`.
    ///
    /// Returns an index in `[0, min(candidates.len(), MAX_CANDIDATES))`.
    pub async fn resolve(
        &self,
        line_index: usize,
        context: &[String],
        candidates: &[String],
        document: &SourceDocument,
    ) -> usize {
        let shown = &candidates[..candidates.len().min(MAX_CANDIDATES)];
        if shown.len() <= 1 {
            return 0;
        }

        let context = &context[context.len().saturating_sub(CONTEXT_LINES)..];
        let prompt = judge_prompt(self.instruction, line_index, context, shown);

        match self
            .client
            .generate(std::slice::from_ref(document), &prompt)
            .await
        {
            Ok(reply) => {
                let choice = parse_choice(&reply, shown.len());
                debug!(
                    "Line {}: judge replied {:?} → candidate {}",
                    line_index + 1,
                    reply.trim(),
                    choice + 1
                );
                choice
            }
            Err(e) => {
                warn!(
                    "Line {}: judge call failed, keeping first candidate — {}",
                    line_index + 1,
                    e
                );
                0
            }
        }
    }
}

/// Parse the judge's reply into a 0-based index.
///
/// The first run of digits is a 1-based choice. No digits, zero, an
/// overflowing number or a choice beyond `option_count` all give 0.
pub fn parse_choice(reply: &str, option_count: usize) -> usize {
    RE_FIRST_INT
        .find(reply)
        .and_then(|m| m.as_str().parse::<usize>().ok())
        .filter(|&n| n >= 1 && n <= option_count)
        .map(|n| n - 1)
        .unwrap_or(0)
}
