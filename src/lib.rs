//! # edgequake-pdf2latex
//!
//! Convert PDF documents (and page images) into compilable LaTeX by asking
//! several LLM "voters" for the same document and reconciling their answers
//! line by line.
//!
//! ## Why voting?
//!
//! A single model transcription of a dense paper is usually 95% right, but
//! the wrong 5% lands in different places on every run: a dropped `\\`, a
//! mangled subscript, an unclosed environment. Five transcriptions produced
//! under deliberately different prompt emphases disagree mostly where each
//! one is wrong, so a per-line majority recovers the right text. Lines with
//! no majority go to a judge call; a final repair pass fixes what still
//! would not compile.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF / image
//!  │
//!  ├─ 1. Input      resolve local file or download from URL
//!  ├─ 2. Voters     N concurrent whole-document transcriptions, each retried
//!  ├─ 3. Consensus  per-line majority over normalised lines
//!  ├─ 4. Tie-break  judge call for lines without a majority
//!  ├─ 5. Repair     validate, then correct if issues were reported
//!  └─ 6. Output     reconciled LaTeX + per-voter audit + stats
//!
//! LaTeX
//!  └─ Cascade       raw ▶ diagram placeholders ▶ emergency report → PDF
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdf2latex::{compile_with_fallback, reconcile, ConversionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from GEMINI_API_KEY / OPENAI_API_KEY / ANTHROPIC_API_KEY
//!     let config = ConversionConfig::default();
//!     let output = reconcile("paper.pdf", &config).await?;
//!     eprintln!("{} lines, {} tie-breaks",
//!         output.stats.resolved_lines, output.tiebreak_count);
//!
//!     let pdf = compile_with_fallback(&output.latex, &config.compile).await?;
//!     std::fs::write("paper.pdf", &pdf.pdf)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2latex` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-pdf2latex = { version = "0.1", default-features = false }
//! ```
//!
//! ## Testing without a provider
//!
//! Every stage takes a [`GenerationClient`] and the cascade takes a
//! [`Compiler`], so [`Reconciler`] and [`CompilationCascade`] can be driven
//! entirely by in-process fakes.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod reconcile;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    ChunkStrategy, CompileConfig, ConversionConfig, ConversionConfigBuilder, PromptFragment,
    PromptVariant, VoterConfiguration,
};
pub use error::{GenerationError, Pdf2LatexError, RepairStage};
pub use output::{
    CompilationAttempt, CompileOutput, CompileStrategy, ReconcileOutput, ReconcileStats,
    RepairOutcome, TiebreakDecision, VoterSummary,
};
pub use pipeline::cascade::{CascadeState, CompilationCascade};
pub use pipeline::compile::{CompileRun, Compiler, LatexCompiler};
pub use pipeline::consensus::{ConsensusEngine, ConsensusResult, LineVote};
pub use pipeline::generation::{GenerationClient, LlmGenerationClient, TokenUsage};
pub use pipeline::input::SourceDocument;
pub use pipeline::tiebreak::TiebreakResolver;
pub use pipeline::voter::{VoterResponse, VoterStage};
pub use progress::{NoopProgressCallback, ProgressCallback, ReconcileProgressCallback};
pub use reconcile::{
    compile_with_fallback, reconcile, reconcile_from_bytes, reconcile_sync, reconcile_to_file,
    Reconciler,
};
