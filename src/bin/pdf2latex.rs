//! CLI binary for edgequake-pdf2latex.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ConversionConfig` / `CompileConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_pdf2latex::reconcile::write_atomic;
use edgequake_pdf2latex::{
    reconcile, ChunkStrategy, CompilationCascade, CompileConfig, CompileOutput, CompileStrategy,
    ConversionConfig, LatexCompiler, ProgressCallback, ReconcileProgressCallback,
    VoterConfiguration,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const SPINNER: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress for voters (or block groups), tie-breaks and cascade tiers.
///
/// Voters finish out of order, so per-voter start times are keyed by index.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    failures: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(SPINNER),
        );
        bar.set_prefix("Preparing");
        bar.set_message("Reading input…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            failures: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self, index: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&index))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    fn spinner(&self, prefix: &'static str, msg: String) {
        self.bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  ⏱ {elapsed_precise}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(SPINNER),
        );
        self.bar.set_prefix(prefix);
        self.bar.set_message(msg);
    }
}

impl ReconcileProgressCallback for CliProgressCallback {
    fn on_reconcile_start(&self, total_voters: usize) {
        self.bar.set_length(total_voters as u64);
        self.bar.set_position(0);
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>2}/{len} voters  ⏱ {elapsed_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(SPINNER),
        );
        self.bar.set_prefix("Voting");
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Running {total_voters} voters…"))
        ));
    }

    fn on_voter_start(&self, voter_index: usize, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(voter_index, Instant::now());
        }
    }

    fn on_voter_complete(&self, voter_index: usize, total: usize, line_count: usize) {
        let secs = self.elapsed_secs(voter_index);
        self.bar.println(format!(
            "  {} Voter {:>2}/{:<2}  {}  {}",
            green("✓"),
            voter_index + 1,
            total,
            dim(&format!("{line_count:>5} lines")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_voter_failed(&self, voter_index: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(voter_index);
        self.failures.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Voter {:>2}/{:<2}  {}  {}",
            red("✗"),
            voter_index + 1,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_tiebreak(&self, line_index: usize, option_count: usize, chosen: usize) {
        self.spinner("Judging", format!("line {}", line_index + 1));
        self.bar.println(format!(
            "  {} Line {:>4}  {} options → #{}",
            yellow("⚖"),
            line_index + 1,
            option_count,
            chosen + 1
        ));
    }

    fn on_repair_complete(&self, issues_found: bool) {
        let note = if issues_found {
            yellow("issues corrected")
        } else {
            green("no issues")
        };
        self.bar.println(format!("  {} Syntax check  {}", cyan("◆"), note));
    }

    fn on_reconcile_complete(&self, resolved_lines: usize, tiebreak_count: usize) {
        self.bar.finish_and_clear();
        let failed = self.failures.load(Ordering::SeqCst);
        eprintln!(
            "{} {} lines reconciled  ({} tie-breaks{})",
            if failed == 0 { green("✔") } else { cyan("⚠") },
            bold(&resolved_lines.to_string()),
            tiebreak_count,
            if failed == 0 {
                String::new()
            } else {
                format!(", {} voters empty", red(&failed.to_string()))
            }
        );
    }

    fn on_tier_start(&self, strategy: CompileStrategy) {
        if self.bar.is_finished() {
            self.bar.reset();
            self.bar.enable_steady_tick(Duration::from_millis(80));
        }
        self.spinner("Compiling", format!("{strategy} tier"));
    }

    fn on_tier_complete(&self, strategy: CompileStrategy, produced_artifact: bool) {
        self.bar.println(format!(
            "  {} {:<12} {}",
            if produced_artifact { green("✓") } else { red("✗") },
            strategy.to_string(),
            if produced_artifact {
                dim("PDF produced")
            } else {
                dim("no PDF")
            }
        ));
        if produced_artifact || strategy == CompileStrategy::Emergency {
            self.bar.finish_and_clear();
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Reconcile a PDF to LaTeX (stdout)
  pdf2latex paper.pdf

  # Reconcile and write both .tex and a compiled PDF
  pdf2latex paper.pdf -o paper.tex --pdf paper.pdf.out

  # Three voters instead of five, Gemini explicitly
  pdf2latex --voters 3 --provider gemini --model gemini-2.5-pro paper.pdf

  # Chunk documents over 30 pages into block groups
  pdf2latex --chunk auto --chunk-above 30 book.pdf -o book.tex

  # Compile an existing .tex with the fallback cascade
  pdf2latex --compile-only edited.tex --pdf edited.pdf

  # JSON output with per-voter audit and tie-break decisions
  pdf2latex --json paper.pdf > run.json

HOW IT WORKS:
  1. N voters transcribe the whole document with different prompt emphases
  2. Lines are compared after whitespace normalisation; majority wins
  3. Lines without a majority go to a judge call (top 3 candidates)
  4. A validation call checks the result; a correction call fixes issues
  5. Compilation: raw → diagrams replaced by boxes → emergency error report

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY          Google Gemini API key (preferred: reads PDFs natively)
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (gemini, openai, anthropic, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Directory containing libpdfium (chunked mode only)
  PDF2LATEX_*             Any flag below, e.g. PDF2LATEX_VOTERS=3
"#;

/// Convert PDF files and URLs to compilable LaTeX using multi-voter LLM consensus.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2latex",
    version,
    about = "Convert PDF files and URLs to LaTeX using multi-voter LLM consensus",
    long_about = "Convert PDF documents or page images (local files or URLs) to compilable LaTeX. \
Several LLM voters transcribe the document independently; their output is reconciled line by \
line, disputed lines are judged, and the result is syntax-checked. Optionally compiles the \
result with a raw → placeholder → emergency fallback cascade.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF/image path or HTTP/HTTPS URL (a .tex file with --compile-only).
    input: String,

    /// Write LaTeX to this file instead of stdout.
    #[arg(short, long, env = "PDF2LATEX_OUTPUT")]
    output: Option<PathBuf>,

    /// Compile the LaTeX and write the PDF here.
    #[arg(long, env = "PDF2LATEX_PDF")]
    pdf: Option<PathBuf>,

    /// Skip reconciliation: compile the input .tex file through the cascade.
    #[arg(long)]
    compile_only: bool,

    /// LLM model ID (e.g. gemini-2.5-pro, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: gemini, openai, anthropic, azure, ollama.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Number of voters (1–5, taken from the built-in variants in order).
    #[arg(long, env = "PDF2LATEX_VOTERS", default_value_t = 5,
          value_parser = clap::value_parser!(u8).range(1..=5))]
    voters: u8,

    /// Attempts per voter before it contributes an empty response.
    #[arg(long, env = "PDF2LATEX_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Wait between voter attempts in milliseconds.
    #[arg(long, env = "PDF2LATEX_RETRY_BACKOFF_MS", default_value_t = 1000)]
    retry_backoff_ms: u64,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "PDF2LATEX_TEMPERATURE", default_value_t = 0.2)]
    temperature: f32,

    /// Max LLM output tokens per call.
    #[arg(long, env = "PDF2LATEX_MAX_TOKENS", default_value_t = 16384)]
    max_tokens: usize,

    /// Block-group chunking: never, always, or auto (above --chunk-above pages).
    #[arg(long, env = "PDF2LATEX_CHUNK", value_enum, default_value = "never")]
    chunk: ChunkArg,

    /// Page threshold for --chunk auto.
    #[arg(long, env = "PDF2LATEX_CHUNK_ABOVE", default_value_t = 20)]
    chunk_above: usize,

    /// Pages per block group in chunked mode.
    #[arg(long, env = "PDF2LATEX_PAGES_PER_CHUNK", default_value_t = 4)]
    pages_per_chunk: usize,

    /// Concurrent block-group calls in chunked mode.
    #[arg(short, long, env = "PDF2LATEX_CONCURRENCY", default_value_t = 8)]
    concurrency: usize,

    /// Rendering DPI for chunked mode (72–400).
    #[arg(long, env = "PDF2LATEX_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// PDF user password for encrypted documents (chunked mode).
    #[arg(long, env = "PDF2LATEX_PASSWORD")]
    password: Option<String>,

    /// Path to a text file replacing the built-in judge instruction.
    #[arg(long, env = "PDF2LATEX_JUDGE_PROMPT")]
    judge_prompt: Option<PathBuf>,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PDF2LATEX_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// LaTeX engine used by the compile cascade.
    #[arg(long, env = "PDF2LATEX_LATEX_PROGRAM", default_value = "pdflatex")]
    latex_program: String,

    /// Raw-tier compile timeout in seconds.
    #[arg(long, env = "PDF2LATEX_RAW_TIMEOUT", default_value_t = 60)]
    raw_timeout: u64,

    /// Placeholder-tier compile timeout in seconds.
    #[arg(long, env = "PDF2LATEX_PLACEHOLDER_TIMEOUT", default_value_t = 30)]
    placeholder_timeout: u64,

    /// Emergency-tier compile timeout in seconds.
    #[arg(long, env = "PDF2LATEX_EMERGENCY_TIMEOUT", default_value_t = 15)]
    emergency_timeout: u64,

    /// Output structured JSON (ReconcileOutput / CompileOutput) instead of LaTeX.
    #[arg(long, env = "PDF2LATEX_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDF2LATEX_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2LATEX_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2LATEX_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ChunkArg {
    Never,
    Always,
    Auto,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; --verbose always wins.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ReconcileProgressCallback>)
    } else {
        None
    };

    let compile_config = build_compile_config(&cli).context("Invalid compile settings")?;

    // ── Compile-only mode ────────────────────────────────────────────────
    if cli.compile_only {
        let tex = tokio::fs::read_to_string(&cli.input)
            .await
            .with_context(|| format!("Failed to read {}", cli.input))?;
        let pdf_path = cli
            .pdf
            .clone()
            .unwrap_or_else(|| Path::new(&cli.input).with_extension("pdf"));
        let out = compile(&tex, &compile_config, progress_cb, &pdf_path).await?;
        report_compile(&cli, &out, &pdf_path)?;
        return Ok(());
    }

    // ── Reconcile ────────────────────────────────────────────────────────
    let config = build_config(&cli, progress_cb.clone(), compile_config.clone()).await?;
    let output = reconcile(&cli.input, &config)
        .await
        .context("Reconciliation failed")?;

    if let Some(ref path) = cli.output {
        write_atomic(path, output.latex.as_bytes())
            .await
            .context("Failed to write LaTeX output")?;
        if !cli.quiet {
            eprintln!(
                "{}  {} lines  {} tie-breaks  {}ms  →  {}",
                green("✔"),
                output.stats.resolved_lines,
                output.tiebreak_count,
                output.stats.total_duration_ms,
                bold(&path.display().to_string()),
            );
        }
    } else if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    } else {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(output.latex.as_bytes())
            .context("Failed to write to stdout")?;
    }

    if !cli.quiet && !cli.json {
        eprintln!(
            "   {} voters ok  /  {} tokens in  /  {} tokens out",
            dim(&format!("{}/{}", output.stats.successful_voters, output.stats.voters)),
            dim(&output.stats.total_input_tokens.to_string()),
            dim(&output.stats.total_output_tokens.to_string()),
        );
    }

    // ── Optional compile ─────────────────────────────────────────────────
    if let Some(ref pdf_path) = cli.pdf {
        let out = compile(&output.latex, &compile_config, progress_cb, pdf_path).await?;
        report_compile(&cli, &out, pdf_path)?;
    }

    Ok(())
}

/// Run the cascade and write the PDF.
async fn compile(
    tex: &str,
    config: &CompileConfig,
    progress: Option<ProgressCallback>,
    pdf_path: &Path,
) -> Result<CompileOutput> {
    let compiler = LatexCompiler::new(config);
    let mut cascade = CompilationCascade::new(&compiler, config);
    if let Some(cb) = progress {
        cascade = cascade.with_progress(cb);
    }
    let out = cascade.run(tex).await.context("Compilation failed")?;
    write_atomic(pdf_path, &out.pdf)
        .await
        .context("Failed to write PDF")?;
    Ok(out)
}

fn report_compile(cli: &Cli, out: &CompileOutput, pdf_path: &Path) -> Result<()> {
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(out).context("Failed to serialise compile output")?
        );
    } else if !cli.quiet {
        let mark = if out.is_user_document() {
            green("✔")
        } else {
            yellow("⚠")
        };
        eprintln!(
            "{}  compiled ({} tier, {} attempt{})  →  {}",
            mark,
            out.strategy,
            out.attempts.len(),
            if out.attempts.len() == 1 { "" } else { "s" },
            bold(&pdf_path.display().to_string()),
        );
        if !out.is_user_document() {
            eprintln!(
                "   {}",
                yellow("the PDF is an error report; the document itself did not compile")
            );
        }
    }
    Ok(())
}

fn build_compile_config(cli: &Cli) -> Result<CompileConfig> {
    let config = CompileConfig {
        program: cli.latex_program.clone(),
        raw_timeout_secs: cli.raw_timeout,
        placeholder_timeout_secs: cli.placeholder_timeout,
        emergency_timeout_secs: cli.emergency_timeout,
        ..CompileConfig::default()
    };
    config.validate()?;
    Ok(config)
}

/// Map CLI args to `ConversionConfig`.
async fn build_config(
    cli: &Cli,
    progress: Option<ProgressCallback>,
    compile: CompileConfig,
) -> Result<ConversionConfig> {
    let chunking = match cli.chunk {
        ChunkArg::Never => ChunkStrategy::Never,
        ChunkArg::Always => ChunkStrategy::Always,
        ChunkArg::Auto => ChunkStrategy::AbovePages(cli.chunk_above),
    };

    let mut builder = ConversionConfig::builder()
        .voters(VoterConfiguration::default().truncated(cli.voters as usize))
        .max_retries(cli.max_retries)
        .retry_backoff_ms(cli.retry_backoff_ms)
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens)
        .chunking(chunking)
        .pages_per_chunk(cli.pages_per_chunk)
        .concurrency(cli.concurrency)
        .dpi(cli.dpi)
        .download_timeout_secs(cli.download_timeout)
        .compile(compile);

    if let Some(ref path) = cli.judge_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read judge prompt from {:?}", path))?;
        builder = builder.judge_prompt(prompt);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
