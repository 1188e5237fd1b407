//! Configuration types for PDF-to-LaTeX reconciliation and compilation.
//!
//! All behaviour is controlled through [`ConversionConfig`], built via its
//! [`ConversionConfigBuilder`]. The config is constructed once, never
//! mutated afterwards, and handed by reference to every pipeline stage at
//! construction time. No stage reads prompts, retry budgets or the provider
//! handle from anywhere else.
//!
//! Compilation has its own [`CompileConfig`] because the cascade also runs
//! on user-edited documents that never went through reconciliation.

use crate::error::Pdf2LatexError;
use crate::progress::ProgressCallback;
use crate::prompts::{
    BASE_FRAGMENT, DEFAULT_CHUNK_PROMPT, DEFAULT_CORRECTION_PROMPT, DEFAULT_JUDGE_PROMPT,
    DEFAULT_VALIDATION_PROMPT, DIAGRAM_FRAGMENT, EQUATION_FRAGMENT, STRUCTURE_FRAGMENT,
};
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Configuration for a PDF-to-LaTeX reconciliation.
///
/// Built via [`ConversionConfig::builder()`] or using
/// [`ConversionConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_pdf2latex::ConversionConfig;
///
/// let config = ConversionConfig::builder()
///     .max_retries(2)
///     .retry_backoff_ms(250)
///     .model("gemini-2.5-pro")
///     .build()
///     .unwrap();
/// assert_eq!(config.voters.len(), 5);
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Prompt variants, one per voter. Default: five built-in variants.
    pub voters: VoterConfiguration,

    /// Tie-break judge instruction. Candidates are appended at call time.
    pub judge_prompt: String,

    /// Syntax-repair validation instruction. Must tell the model to answer
    /// with [`crate::prompts::NO_ISSUES_SENTINEL`] when the document is clean.
    pub validation_prompt: String,

    /// Syntax-repair correction instruction.
    pub correction_prompt: String,

    /// Instruction for one block group in the chunked path.
    pub chunk_prompt: String,

    /// Attempts per voter (and per block group) before giving up. Default: 3.
    ///
    /// An attempt fails when the call errors or the reply is empty after
    /// fence stripping. A voter that exhausts its budget contributes an empty
    /// response and is simply outvoted.
    pub max_retries: u32,

    /// Fixed wait between attempts in milliseconds. Default: 1000.
    pub retry_backoff_ms: u64,

    /// LLM model identifier, e.g. "gemini-2.5-pro".
    /// If None, uses the provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "gemini", "openai", "anthropic").
    /// If None along with `provider`, auto-detected from the environment.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.2.
    ///
    /// Slightly above zero so that voters with similar prompts still produce
    /// independent samples.
    pub temperature: f32,

    /// Maximum tokens per generation call. Default: 16384.
    ///
    /// Whole-document voters emit the full LaTeX source in one reply, so this
    /// is much larger than a per-page budget.
    pub max_tokens: usize,

    /// When to use the chunked block-group path instead of whole-document voters.
    pub chunking: ChunkStrategy,

    /// Pages per block group in the chunked path. Default: 4.
    pub pages_per_chunk: usize,

    /// Concurrent block-group calls in the chunked path. Default: 8.
    pub concurrency: usize,

    /// Rendering DPI for the chunked path. Range: 72–400. Default: 150.
    pub dpi: u32,

    /// Longest rendered edge in pixels for the chunked path. Default: 2000.
    pub max_rendered_pixels: u32,

    /// PDF user password for encrypted documents (chunked path).
    pub password: Option<String>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Compilation cascade settings.
    pub compile: CompileConfig,

    /// Optional observer for voter, tie-break and repair events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            voters: VoterConfiguration::default(),
            judge_prompt: DEFAULT_JUDGE_PROMPT.to_string(),
            validation_prompt: DEFAULT_VALIDATION_PROMPT.to_string(),
            correction_prompt: DEFAULT_CORRECTION_PROMPT.to_string(),
            chunk_prompt: DEFAULT_CHUNK_PROMPT.to_string(),
            max_retries: 3,
            retry_backoff_ms: 1000,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.2,
            max_tokens: 16384,
            chunking: ChunkStrategy::default(),
            pages_per_chunk: 4,
            concurrency: 8,
            dpi: 150,
            max_rendered_pixels: 2000,
            password: None,
            download_timeout_secs: 120,
            compile: CompileConfig::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("voters", &self.voters.names())
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("chunking", &self.chunking)
            .field("pages_per_chunk", &self.pages_per_chunk)
            .field("concurrency", &self.concurrency)
            .field("compile", &self.compile)
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Check the constraints the builder enforces. Also run by
    /// [`crate::Reconciler::reconcile`], since every field is public and a
    /// config can be assembled without the builder.
    pub fn validate(&self) -> Result<(), Pdf2LatexError> {
        if self.voters.is_empty() {
            return Err(Pdf2LatexError::InvalidConfig(
                "At least one voter prompt is required".into(),
            ));
        }
        if self.max_retries == 0 {
            return Err(Pdf2LatexError::InvalidConfig(
                "max_retries must be ≥ 1".into(),
            ));
        }
        if self.judge_prompt.trim().is_empty() {
            return Err(Pdf2LatexError::InvalidConfig(
                "Judge prompt must not be empty".into(),
            ));
        }
        if self.dpi < 72 || self.dpi > 400 {
            return Err(Pdf2LatexError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                self.dpi
            )));
        }
        if self.concurrency == 0 {
            return Err(Pdf2LatexError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if self.pages_per_chunk == 0 {
            return Err(Pdf2LatexError::InvalidConfig(
                "pages_per_chunk must be ≥ 1".into(),
            ));
        }
        self.compile.validate()
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn voters(mut self, voters: VoterConfiguration) -> Self {
        self.config.voters = voters;
        self
    }

    pub fn judge_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.judge_prompt = prompt.into();
        self
    }

    pub fn validation_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.validation_prompt = prompt.into();
        self
    }

    pub fn correction_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.correction_prompt = prompt.into();
        self
    }

    pub fn chunk_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.chunk_prompt = prompt.into();
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n.max(1);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn chunking(mut self, strategy: ChunkStrategy) -> Self {
        self.config.chunking = strategy;
        self
    }

    pub fn pages_per_chunk(mut self, n: usize) -> Self {
        self.config.pages_per_chunk = n.max(1);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn compile(mut self, compile: CompileConfig) -> Self {
        self.config.compile = compile;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, Pdf2LatexError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ── Voter configuration ──────────────────────────────────────────────────

/// Named emphasis fragment a voter variant can be composed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromptFragment {
    Base,
    Structure,
    Equation,
    Diagram,
}

impl PromptFragment {
    pub fn text(self) -> &'static str {
        match self {
            PromptFragment::Base => BASE_FRAGMENT,
            PromptFragment::Structure => STRUCTURE_FRAGMENT,
            PromptFragment::Equation => EQUATION_FRAGMENT,
            PromptFragment::Diagram => DIAGRAM_FRAGMENT,
        }
    }
}

/// One voter's prompt: a label for logs plus the composed prompt text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptVariant {
    pub name: String,
    pub prompt: String,
}

impl PromptVariant {
    /// Compose a variant from fragments, in the order given.
    pub fn compose(name: impl Into<String>, fragments: &[PromptFragment]) -> Self {
        let prompt = fragments
            .iter()
            .map(|f| f.text())
            .collect::<Vec<_>>()
            .join("\n");
        Self {
            name: name.into(),
            prompt,
        }
    }

    /// A variant with caller-supplied prompt text.
    pub fn custom(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt: prompt.into(),
        }
    }
}

/// The ordered set of voter prompts. Voter `i` always uses `variants[i]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterConfiguration {
    variants: Vec<PromptVariant>,
}

impl VoterConfiguration {
    pub fn new(variants: Vec<PromptVariant>) -> Self {
        Self { variants }
    }

    pub fn variants(&self) -> &[PromptVariant] {
        &self.variants
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.variants.iter().map(|v| v.name.as_str()).collect()
    }

    /// Keep only the first `n` variants (at least one).
    pub fn truncated(&self, n: usize) -> Self {
        Self {
            variants: self.variants.iter().take(n.max(1)).cloned().collect(),
        }
    }
}

impl Default for VoterConfiguration {
    /// Five voters: plain, one per emphasis, and all emphases combined.
    fn default() -> Self {
        use PromptFragment::*;
        Self::new(vec![
            PromptVariant::compose("base", &[Base]),
            PromptVariant::compose("structure", &[Base, Structure]),
            PromptVariant::compose("equation", &[Base, Equation]),
            PromptVariant::compose("diagram", &[Base, Diagram]),
            PromptVariant::compose("combined", &[Base, Structure, Equation, Diagram]),
        ])
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// When to switch from whole-document voters to block-group chunking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChunkStrategy {
    /// Always use whole-document voters (default).
    #[default]
    Never,
    /// Always chunk PDFs into block groups.
    Always,
    /// Chunk PDFs with more than this many pages.
    AbovePages(usize),
}

impl ChunkStrategy {
    /// Whether a document with `page_count` pages should be chunked.
    pub fn applies(&self, page_count: usize) -> bool {
        match self {
            ChunkStrategy::Never => false,
            ChunkStrategy::Always => true,
            ChunkStrategy::AbovePages(n) => page_count > *n,
        }
    }
}

// ── Compilation ──────────────────────────────────────────────────────────

/// Settings for the three-tier compilation cascade.
///
/// Each tier has its own hard timeout, strictly decreasing: later tiers
/// compile simpler documents and should never hold the caller longer than
/// the tier before them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileConfig {
    /// Compiler executable. Default: "pdflatex".
    pub program: String,
    /// Arguments placed before the `.tex` file name.
    pub args: Vec<String>,
    /// Raw-tier timeout in seconds. Default: 60.
    pub raw_timeout_secs: u64,
    /// Placeholder-tier timeout in seconds. Default: 30.
    pub placeholder_timeout_secs: u64,
    /// Emergency-tier timeout in seconds. Default: 15.
    pub emergency_timeout_secs: u64,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            program: "pdflatex".to_string(),
            args: vec![
                "-interaction=nonstopmode".to_string(),
                "-halt-on-error".to_string(),
                "-file-line-error".to_string(),
            ],
            raw_timeout_secs: 60,
            placeholder_timeout_secs: 30,
            emergency_timeout_secs: 15,
        }
    }
}

impl CompileConfig {
    /// Check the tier timeouts are positive and strictly decreasing.
    pub fn validate(&self) -> Result<(), Pdf2LatexError> {
        if self.program.trim().is_empty() {
            return Err(Pdf2LatexError::InvalidConfig(
                "Compiler program must not be empty".into(),
            ));
        }
        if self.emergency_timeout_secs == 0 {
            return Err(Pdf2LatexError::InvalidConfig(
                "Compile timeouts must be ≥ 1s".into(),
            ));
        }
        if !(self.raw_timeout_secs > self.placeholder_timeout_secs
            && self.placeholder_timeout_secs > self.emergency_timeout_secs)
        {
            return Err(Pdf2LatexError::InvalidConfig(format!(
                "Compile timeouts must decrease raw > placeholder > emergency, got {}s / {}s / {}s",
                self.raw_timeout_secs, self.placeholder_timeout_secs, self.emergency_timeout_secs
            )));
        }
        Ok(())
    }
}
