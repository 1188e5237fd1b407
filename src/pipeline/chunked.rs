//! Chunked path: block groups of rasterised pages for very large PDFs.
//!
//! Whole-document voters hit the provider's context limit on long PDFs.
//! Instead, pages are rendered, grouped into runs of `pages_per_chunk`, and
//! each group is transcribed by one generation call. Groups run concurrently
//! (bounded by `concurrency`) and therefore finish in arbitrary order; the
//! results are collected into a map keyed by group id and reassembled by
//! explicit lookup in source order.
//!
//! Pages are rendered and encoded inside each group's task, so at most
//! `concurrency` groups of page images are held in memory at once however
//! long the document is.
//!
//! A group that cannot be rendered or exhausts its retries leaves a LaTeX
//! comment in its place so the gap is visible in the output. If every group fails there is nothing
//! to return and the stage errors.

use crate::config::ConversionConfig;
use crate::error::Pdf2LatexError;
use crate::pipeline::encode::encode_page;
use crate::pipeline::generation::{generate_with_retry, GenerationClient};
use crate::pipeline::input::SourceDocument;
use crate::pipeline::render;
use crate::prompts::{CHUNK_POSTAMBLE, CHUNK_PREAMBLE};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

/// Consecutive 0-based page indices transcribed together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockGroup {
    pub id: usize,
    pub pages: Vec<usize>,
}

/// Result of the chunked stage.
#[derive(Debug, Clone)]
pub struct ChunkedOutput {
    /// Complete document: fixed preamble, groups in order, postamble.
    pub latex: String,
    pub groups: usize,
    pub successful_groups: usize,
    pub page_count: usize,
}

/// Split `page_count` pages into groups of at most `pages_per_chunk`.
pub fn plan_groups(page_count: usize, pages_per_chunk: usize) -> Vec<Vec<usize>> {
    let size = pages_per_chunk.max(1);
    (0..page_count)
        .collect::<Vec<_>>()
        .chunks(size)
        .map(<[usize]>::to_vec)
        .collect()
}

/// Drop lines a group should not have emitted (document class, packages,
/// document environment); the assembled document supplies its own.
pub fn strip_document_wrapper(body: &str) -> String {
    body.lines()
        .filter(|l| {
            let t = l.trim_start();
            !(t.starts_with("\\documentclass")
                || t.starts_with("\\usepackage")
                || t.starts_with("\\begin{document}")
                || t.starts_with("\\end{document}"))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Concatenate group bodies in id order between the fixed preamble and
/// postamble. Missing or failed groups become a comment line.
pub fn assemble(results: &HashMap<usize, Option<String>>, group_count: usize) -> String {
    let mut out = String::from(CHUNK_PREAMBLE);
    for id in 0..group_count {
        match results.get(&id) {
            Some(Some(body)) => {
                out.push_str(body.trim_end());
                out.push('\n');
            }
            _ => out.push_str(&format!("% block group {} failed\n", id + 1)),
        }
        out.push('\n');
    }
    out.push_str(CHUNK_POSTAMBLE);
    out
}

pub struct ChunkedStage<'a> {
    client: &'a dyn GenerationClient,
    config: &'a ConversionConfig,
}

impl<'a> ChunkedStage<'a> {
    pub fn new(client: &'a dyn GenerationClient, config: &'a ConversionConfig) -> Self {
        Self { client, config }
    }

    /// Group, render and transcribe `document` (a PDF).
    pub async fn run(&self, document: &SourceDocument) -> Result<ChunkedOutput, Pdf2LatexError> {
        let password = self.config.password.as_deref();
        let page_count = render::page_count(document, password).await?;

        let groups: Vec<BlockGroup> = plan_groups(page_count, self.config.pages_per_chunk)
            .into_iter()
            .enumerate()
            .map(|(id, pages)| BlockGroup { id, pages })
            .collect();
        let total = groups.len();
        info!(
            "Chunked path: {} pages in {} block groups of ≤{}",
            page_count, total, self.config.pages_per_chunk
        );

        if let Some(ref cb) = self.config.progress_callback {
            cb.on_reconcile_start(total);
        }

        let tasks: Vec<_> = groups.iter().map(|g| self.run_group(document, g, total)).collect();
        let results: HashMap<usize, Option<String>> =
            stream::iter(tasks)
                .buffer_unordered(self.config.concurrency.max(1))
                .collect()
                .await;

        let successful_groups = results.values().filter(|r| r.is_some()).count();
        if successful_groups == 0 {
            return Err(Pdf2LatexError::AllVotersFailed {
                voters: total,
                attempts: self.config.max_retries,
                last_error: "every block group came back empty".to_string(),
            });
        }

        Ok(ChunkedOutput {
            latex: assemble(&results, total),
            groups: total,
            successful_groups,
            page_count,
        })
    }

    /// Render and encode the pages of one group.
    async fn attachments(
        &self,
        document: &SourceDocument,
        group: &BlockGroup,
    ) -> Result<Vec<SourceDocument>, Pdf2LatexError> {
        let rendered = render::render_pages(
            document,
            self.config.dpi,
            self.config.max_rendered_pixels,
            self.config.password.as_deref(),
            &group.pages,
        )
        .await?;

        rendered
            .iter()
            .map(|(idx, img)| {
                encode_page(img).map_err(|e| Pdf2LatexError::RasterisationFailed {
                    page: idx + 1,
                    detail: format!("Image encoding failed: {}", e),
                })
            })
            .collect()
    }

    async fn run_group(
        &self,
        document: &SourceDocument,
        group: &BlockGroup,
        total: usize,
    ) -> (usize, Option<String>) {
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_voter_start(group.id, total);
        }

        let label = format!(
            "Block group {} (pages {}–{})",
            group.id + 1,
            group.pages.first().map_or(0, |p| p + 1),
            group.pages.last().map_or(0, |p| p + 1)
        );

        let attachments = match self.attachments(document, group).await {
            Ok(a) => a,
            Err(e) => {
                warn!("{}: rendering failed, {}", label, e);
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_voter_failed(group.id, total, &e.to_string());
                }
                return (group.id, None);
            }
        };

        let attempted = generate_with_retry(
            self.client,
            &attachments,
            &self.config.chunk_prompt,
            self.config.max_retries,
            Duration::from_millis(self.config.retry_backoff_ms),
            &label,
        )
        .await;

        match attempted.text {
            Some(text) => {
                let body = strip_document_wrapper(&text);
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_voter_complete(group.id, total, body.lines().count());
                }
                (group.id, Some(body))
            }
            None => {
                let err = attempted
                    .last_error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "Unknown error".to_string());
                warn!("{}: giving up, {}", label, err);
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_voter_failed(group.id, total, &err);
                }
                (group.id, None)
            }
        }
    }
}
