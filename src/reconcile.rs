//! Top-level entry points: reconcile a document, compile a document.
//!
//! [`Reconciler`] is the core: given a [`SourceDocument`] and a
//! [`GenerationClient`] it runs voters, consensus and syntax repair and
//! returns the reconciled LaTeX. The free functions below resolve inputs and
//! providers for the common cases and wrap the result for files and
//! synchronous callers.
//!
//! A reconciliation either returns a complete [`ReconcileOutput`] or an
//! error. Degraded consensus (some voters empty, lines decided by the judge)
//! is reported through the output's statistics, never as a failure.

use crate::config::{ChunkStrategy, CompileConfig, ConversionConfig};
use crate::error::Pdf2LatexError;
use crate::output::{CompileOutput, ReconcileOutput, ReconcileStats, RepairOutcome};
use crate::pipeline::cascade::CompilationCascade;
use crate::pipeline::chunked::ChunkedStage;
use crate::pipeline::compile::LatexCompiler;
use crate::pipeline::consensus::ConsensusEngine;
use crate::pipeline::generation::{resolve_provider, GenerationClient, LlmGenerationClient};
use crate::pipeline::input::{self, SourceDocument};
use crate::pipeline::postprocess::ensure_final_newline;
use crate::pipeline::render;
use crate::pipeline::repair::SyntaxRepairStage;
use crate::pipeline::tiebreak::TiebreakResolver;
use crate::pipeline::voter::{pad_responses, VoterStage};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Drives one reconciliation against an injected generation client.
pub struct Reconciler<'a> {
    client: &'a dyn GenerationClient,
    config: &'a ConversionConfig,
}

impl<'a> Reconciler<'a> {
    pub fn new(client: &'a dyn GenerationClient, config: &'a ConversionConfig) -> Self {
        Self { client, config }
    }

    /// Reconcile `document` into a single LaTeX source.
    ///
    /// A single voter that exhausts its retries is not an error: it
    /// contributes an empty response and is outvoted. When *every* voter
    /// ends empty there is nothing to vote on, and this is reported as
    /// [`Pdf2LatexError::AllVotersFailed`] rather than passing an empty
    /// document on to syntax repair.
    ///
    /// # Errors
    /// - [`Pdf2LatexError::InvalidConfig`] when the config fails validation
    /// - [`Pdf2LatexError::AllVotersFailed`] when no voter produced text
    /// - [`Pdf2LatexError::SyntaxRepairFailed`] when a repair call fails
    /// - PDF errors from the chunked path when it is selected
    pub async fn reconcile(&self, document: &SourceDocument) -> Result<ReconcileOutput, Pdf2LatexError> {
        self.config.validate()?;
        if self.use_chunked(document).await? {
            self.reconcile_chunked(document).await
        } else {
            self.reconcile_voters(document).await
        }
    }

    async fn use_chunked(&self, document: &SourceDocument) -> Result<bool, Pdf2LatexError> {
        match self.config.chunking {
            ChunkStrategy::Never => Ok(false),
            _ if !document.is_pdf() => Ok(false),
            ChunkStrategy::Always => Ok(true),
            strategy => {
                let pages = render::page_count(document, self.config.password.as_deref()).await?;
                Ok(strategy.applies(pages))
            }
        }
    }

    async fn reconcile_voters(&self, document: &SourceDocument) -> Result<ReconcileOutput, Pdf2LatexError> {
        let total_start = Instant::now();
        let config = self.config;

        // ── Step 1: Voters ───────────────────────────────────────────────
        let voting_start = Instant::now();
        let (responses, voters) = VoterStage::new(self.client, config).run(document).await;
        let voting_duration_ms = voting_start.elapsed().as_millis() as u64;

        let successful = responses.iter().filter(|r| r.success).count();
        if successful == 0 {
            let last_error = responses
                .iter()
                .rev()
                .find_map(|r| r.last_error.as_ref())
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string());
            return Err(Pdf2LatexError::AllVotersFailed {
                voters: responses.len(),
                attempts: config.max_retries,
                last_error,
            });
        }
        if successful < responses.len() {
            warn!(
                "{} of {} voters produced no text; they are outvoted",
                responses.len() - successful,
                responses.len()
            );
        }

        // ── Step 2: Consensus ────────────────────────────────────────────
        let consensus_start = Instant::now();
        let (padded, line_count) = pad_responses(&responses);
        info!("Voting over {} lines from {} voters", line_count, responses.len());
        let consensus = ConsensusEngine::new(TiebreakResolver::new(self.client, config))
            .with_progress(config.progress_callback.as_ref())
            .resolve(&padded, document)
            .await;
        let consensus_duration_ms = consensus_start.elapsed().as_millis() as u64;

        // ── Step 3: Syntax repair ────────────────────────────────────────
        let repair_start = Instant::now();
        let (latex, repair) = self.repair(&consensus.text()).await?;
        let repair_duration_ms = repair_start.elapsed().as_millis() as u64;

        let usage = self.client.usage();
        let stats = ReconcileStats {
            voters: responses.len(),
            successful_voters: successful,
            resolved_lines: consensus.lines.len(),
            tiebreak_count: consensus.tiebreak_count,
            total_input_tokens: usage.input_tokens,
            total_output_tokens: usage.output_tokens,
            voting_duration_ms,
            consensus_duration_ms,
            repair_duration_ms,
            total_duration_ms: total_start.elapsed().as_millis() as u64,
        };

        info!(
            "Reconciliation complete: {} lines, {} tie-breaks, repair {:?}, {}ms",
            stats.resolved_lines, stats.tiebreak_count, repair, stats.total_duration_ms
        );
        if let Some(ref cb) = config.progress_callback {
            cb.on_reconcile_complete(stats.resolved_lines, stats.tiebreak_count);
        }

        Ok(ReconcileOutput {
            latex,
            tiebreak_count: consensus.tiebreak_count,
            voters,
            decisions: consensus.decisions,
            repair,
            stats,
        })
    }

    async fn reconcile_chunked(&self, document: &SourceDocument) -> Result<ReconcileOutput, Pdf2LatexError> {
        let total_start = Instant::now();

        let voting_start = Instant::now();
        let chunked = ChunkedStage::new(self.client, self.config).run(document).await?;
        let voting_duration_ms = voting_start.elapsed().as_millis() as u64;

        let repair_start = Instant::now();
        let (latex, repair) = self.repair(&chunked.latex).await?;
        let repair_duration_ms = repair_start.elapsed().as_millis() as u64;

        let usage = self.client.usage();
        let stats = ReconcileStats {
            voters: chunked.groups,
            successful_voters: chunked.successful_groups,
            resolved_lines: latex.lines().count(),
            tiebreak_count: 0,
            total_input_tokens: usage.input_tokens,
            total_output_tokens: usage.output_tokens,
            voting_duration_ms,
            consensus_duration_ms: 0,
            repair_duration_ms,
            total_duration_ms: total_start.elapsed().as_millis() as u64,
        };

        info!(
            "Chunked reconciliation complete: {}/{} groups over {} pages, {}ms",
            chunked.successful_groups, chunked.groups, chunked.page_count, stats.total_duration_ms
        );
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_reconcile_complete(stats.resolved_lines, 0);
        }

        Ok(ReconcileOutput {
            latex,
            tiebreak_count: 0,
            voters: Vec::new(),
            decisions: Vec::new(),
            repair,
            stats,
        })
    }

    async fn repair(&self, document: &str) -> Result<(String, RepairOutcome), Pdf2LatexError> {
        let (latex, outcome) = SyntaxRepairStage::new(self.client, self.config)
            .run(document)
            .await?;
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_repair_complete(outcome == RepairOutcome::Corrected);
        }
        Ok((ensure_final_newline(&latex), outcome))
    }
}

/// Reconcile a PDF or image file (or HTTP/HTTPS URL) into LaTeX.
///
/// This is the primary entry point for the library. The provider is taken
/// from the config or detected from the environment.
///
/// # Example
/// ```rust,no_run
/// use edgequake_pdf2latex::{reconcile, ConversionConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ConversionConfig::default();
/// let output = reconcile("paper.pdf", &config).await?;
/// println!("{} tie-breaks", output.tiebreak_count);
/// std::fs::write("paper.tex", &output.latex)?;
/// # Ok(())
/// # }
/// ```
pub async fn reconcile(
    input_str: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<ReconcileOutput, Pdf2LatexError> {
    let input_str = input_str.as_ref();
    info!("Starting reconciliation: {}", input_str);
    let document = input::resolve_input(input_str, config.download_timeout_secs).await?;
    reconcile_document(&document, config).await
}

/// Reconcile a document already held in memory.
///
/// `mime_type` is used as given; pass [`input::MIME_PDF`] for PDF bytes.
pub async fn reconcile_from_bytes(
    bytes: impl Into<Arc<[u8]>>,
    mime_type: &str,
    config: &ConversionConfig,
) -> Result<ReconcileOutput, Pdf2LatexError> {
    let document = SourceDocument::new(bytes, mime_type);
    reconcile_document(&document, config).await
}

async fn reconcile_document(
    document: &SourceDocument,
    config: &ConversionConfig,
) -> Result<ReconcileOutput, Pdf2LatexError> {
    let provider = resolve_provider(config)?;
    let client = LlmGenerationClient::new(provider, config);
    Reconciler::new(&client, config).reconcile(document).await
}

/// Synchronous wrapper around [`reconcile`].
///
/// Creates a temporary tokio runtime internally.
pub fn reconcile_sync(
    input_str: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<ReconcileOutput, Pdf2LatexError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Pdf2LatexError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(reconcile(input_str, config))
}

/// Reconcile and write the LaTeX source to `output_path`.
pub async fn reconcile_to_file(
    input_str: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ReconcileStats, Pdf2LatexError> {
    let output = reconcile(input_str, config).await?;
    write_atomic(output_path.as_ref(), output.latex.as_bytes()).await?;
    Ok(output.stats)
}

/// Compile LaTeX with the external compiler named in `config`, falling back
/// through the placeholder and emergency tiers.
///
/// # Example
/// ```rust,no_run
/// use edgequake_pdf2latex::{compile_with_fallback, CompileConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let tex = std::fs::read_to_string("paper.tex")?;
/// let out = compile_with_fallback(&tex, &CompileConfig::default()).await?;
/// std::fs::write("paper.pdf", &out.pdf)?;
/// # Ok(())
/// # }
/// ```
pub async fn compile_with_fallback(
    document: &str,
    config: &CompileConfig,
) -> Result<CompileOutput, Pdf2LatexError> {
    config.validate()?;
    let compiler = LatexCompiler::new(config);
    CompilationCascade::new(&compiler, config).run(document).await
}

/// Write `bytes` to `path` via a temp file and rename, so readers never see
/// a partial file.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), Pdf2LatexError> {
    let write_err = |e| Pdf2LatexError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    tokio::fs::write(&tmp_path, bytes).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
    Ok(())
}
