//! Compilation cascade: Raw → Placeholder → Emergency.
//!
//! The cascade is a small state machine. Each tier state runs the compiler
//! once with its own timeout; the only transition rule is "advance iff no
//! artifact was produced". The first tier that yields a PDF ends the run in
//! [`CascadeState::Done`]; an emergency tier without a PDF ends it in
//! [`CascadeState::Failed`]. There is no fourth attempt and no retry within
//! a tier.
//!
//! ```text
//! Raw ──no pdf──▶ Placeholder ──no pdf──▶ Emergency ──no pdf──▶ Failed
//!  │                  │                       │
//!  └──pdf──▶ Done ◀───┴──pdf──────────────────┘
//! ```

use crate::config::CompileConfig;
use crate::error::Pdf2LatexError;
use crate::output::{CompilationAttempt, CompileOutput, CompileStrategy};
use crate::pipeline::compile::{CompileRun, Compiler};
use crate::pipeline::placeholder::replace_diagrams;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Most error lines copied from the log into the emergency document.
pub const MAX_EMERGENCY_ERRORS: usize = 5;

/// States of the compilation cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadeState {
    Raw,
    Placeholder,
    Emergency,
    /// A tier produced a PDF. Terminal.
    Done,
    /// The emergency tier produced nothing. Terminal.
    Failed,
}

impl CascadeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Compile strategy run in this state, `None` for terminal states.
    pub fn strategy(self) -> Option<CompileStrategy> {
        match self {
            Self::Raw => Some(CompileStrategy::Raw),
            Self::Placeholder => Some(CompileStrategy::Placeholder),
            Self::Emergency => Some(CompileStrategy::Emergency),
            Self::Done | Self::Failed => None,
        }
    }

    /// Next state after a tier ran. Terminal states stay put.
    pub fn next(self, artifact_produced: bool) -> Self {
        use CascadeState::*;
        match (self, artifact_produced) {
            (Done, _) | (Failed, _) => self,
            (_, true) => Done,
            (Raw, false) => Placeholder,
            (Placeholder, false) => Emergency,
            (Emergency, false) => Failed,
        }
    }
}

impl fmt::Display for CascadeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw => write!(f, "Raw"),
            Self::Placeholder => write!(f, "Placeholder"),
            Self::Emergency => write!(f, "Emergency"),
            Self::Done => write!(f, "Done"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Drives a [`Compiler`] through the three tiers.
pub struct CompilationCascade<'a> {
    compiler: &'a dyn Compiler,
    config: &'a CompileConfig,
    progress: Option<ProgressCallback>,
}

impl<'a> CompilationCascade<'a> {
    pub fn new(compiler: &'a dyn Compiler, config: &'a CompileConfig) -> Self {
        Self {
            compiler,
            config,
            progress: None,
        }
    }

    /// Report tier start/finish events to `progress`.
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    fn timeout_for(&self, strategy: CompileStrategy) -> Duration {
        Duration::from_secs(match strategy {
            CompileStrategy::Raw => self.config.raw_timeout_secs,
            CompileStrategy::Placeholder => self.config.placeholder_timeout_secs,
            CompileStrategy::Emergency => self.config.emergency_timeout_secs,
        })
    }

    /// Compile `document`, escalating until a tier produces a PDF.
    ///
    /// Errors with [`Pdf2LatexError::CompilationExhausted`] carrying the
    /// emergency tier's log when all three tiers fail, or
    /// [`Pdf2LatexError::CompilerUnavailable`] when the compiler cannot run.
    pub async fn run(&self, document: &str) -> Result<CompileOutput, Pdf2LatexError> {
        let mut state = CascadeState::Raw;
        let mut attempts: Vec<CompilationAttempt> = Vec::with_capacity(3);
        let mut last_log = String::new();
        let mut pdf = None;

        while let Some(strategy) = state.strategy() {
            let source = match strategy {
                CompileStrategy::Raw => document.to_string(),
                CompileStrategy::Placeholder => {
                    let (replaced, n) = replace_diagrams(document);
                    info!("Placeholder tier: {} diagram(s) replaced", n);
                    replaced
                }
                CompileStrategy::Emergency => emergency_document(&extract_error_lines(&last_log)),
            };

            if let Some(ref cb) = self.progress {
                cb.on_tier_start(strategy);
            }

            let timeout = self.timeout_for(strategy);
            let started = Instant::now();
            let run: CompileRun = self.compiler.compile(&source, timeout).await?;
            let produced = run.artifact.is_some();

            if let Some(ref cb) = self.progress {
                cb.on_tier_complete(strategy, produced);
            }

            if produced {
                info!("{} compile produced a PDF", strategy);
            } else if run.timed_out {
                warn!("{} compile timed out after {}s", strategy, timeout.as_secs());
            } else {
                warn!("{} compile produced no PDF (exit {:?})", strategy, run.exit_code);
            }

            attempts.push(CompilationAttempt {
                strategy,
                exit_code: run.exit_code,
                artifact_produced: produced,
                timed_out: run.timed_out,
                diagnostic: run.log.clone(),
                duration_ms: started.elapsed().as_millis() as u64,
            });
            last_log = run.log;
            pdf = run.artifact;
            state = state.next(produced);
        }

        match (state, pdf) {
            (CascadeState::Done, Some(pdf)) => {
                let strategy = attempts
                    .last()
                    .map(|a| a.strategy)
                    .unwrap_or(CompileStrategy::Raw);
                Ok(CompileOutput {
                    pdf,
                    strategy,
                    attempts,
                })
            }
            _ => Err(Pdf2LatexError::CompilationExhausted {
                attempts: attempts.len(),
                log: last_log,
            }),
        }
    }
}

/// Lines of a TeX log that start with the `!` error marker, at most five.
pub fn extract_error_lines(log: &str) -> Vec<String> {
    log.lines()
        .filter(|l| l.starts_with('!'))
        .take(MAX_EMERGENCY_ERRORS)
        .map(|l| l.trim_end().to_string())
        .collect()
}

/// Escape text for use in a LaTeX paragraph.
pub fn escape_latex(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\textbackslash{}"),
            '{' => out.push_str("\\{"),
            '}' => out.push_str("\\}"),
            '$' => out.push_str("\\$"),
            '&' => out.push_str("\\&"),
            '#' => out.push_str("\\#"),
            '%' => out.push_str("\\%"),
            '_' => out.push_str("\\_"),
            '^' => out.push_str("\\textasciicircum{}"),
            '~' => out.push_str("\\textasciitilde{}"),
            '<' => out.push_str("\\textless{}"),
            '>' => out.push_str("\\textgreater{}"),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out
}

/// Fixed-template report listing the compiler errors.
///
/// Uses only the `article` class and no packages, so it compiles whenever
/// the engine itself works.
pub fn emergency_document(errors: &[String]) -> String {
    let mut doc = String::from(
        "\\documentclass{article}\n\
         \\begin{document}\n\
         \\section*{Compilation failed}\n\
         The document could not be compiled, even with diagrams replaced by placeholders.\n\n",
    );
    if errors.is_empty() {
        doc.push_str("The compiler reported no error lines.\n");
    } else {
        doc.push_str("The compiler reported:\n\\begin{itemize}\n");
        for e in errors {
            doc.push_str(&format!("\\item {}\n", escape_latex(e)));
        }
        doc.push_str("\\end{itemize}\n");
    }
    doc.push_str("\\end{document}\n");
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Produces a PDF for the first `succeed_from` (0-based) call onwards.
    struct TierCompiler {
        succeed_from: usize,
        calls: Mutex<Vec<(String, Duration)>>,
    }

    impl TierCompiler {
        fn new(succeed_from: usize) -> Self {
            Self {
                succeed_from,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Compiler for TierCompiler {
        async fn compile(&self, document: &str, timeout: Duration) -> Result<CompileRun, Pdf2LatexError> {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.len();
            calls.push((document.to_string(), timeout));
            Ok(if n >= self.succeed_from {
                CompileRun {
                    artifact: Some(b"%PDF-1.5".to_vec()),
                    exit_code: Some(0),
                    ..Default::default()
                }
            } else {
                CompileRun {
                    log: "This is pdfTeX\n! Undefined control sequence.\nl.3 \\foo\n! Emergency stop.\n"
                        .to_string(),
                    exit_code: Some(1),
                    ..Default::default()
                }
            })
        }
    }

    #[test]
    fn transitions_advance_only_without_artifact() {
        use CascadeState::*;
        assert_eq!(Raw.next(true), Done);
        assert_eq!(Raw.next(false), Placeholder);
        assert_eq!(Placeholder.next(true), Done);
        assert_eq!(Placeholder.next(false), Emergency);
        assert_eq!(Emergency.next(true), Done);
        assert_eq!(Emergency.next(false), Failed);
        assert_eq!(Done.next(false), Done);
        assert_eq!(Failed.next(true), Failed);
        assert!(Done.is_terminal() && Failed.is_terminal());
        assert_eq!(Failed.strategy(), None);
    }

    #[tokio::test]
    async fn raw_success_stops_immediately() {
        let config = CompileConfig::default();
        let compiler = TierCompiler::new(0);
        let out = CompilationCascade::new(&compiler, &config)
            .run("\\documentclass{article}")
            .await
            .unwrap();
        assert_eq!(out.strategy, CompileStrategy::Raw);
        assert_eq!(out.attempts.len(), 1);
        assert_eq!(compiler.calls.lock().unwrap()[0].1, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn emergency_document_lists_log_errors() {
        let config = CompileConfig::default();
        let compiler = TierCompiler::new(2);
        let out = CompilationCascade::new(&compiler, &config)
            .run("\\foo")
            .await
            .unwrap();
        assert_eq!(out.strategy, CompileStrategy::Emergency);
        assert!(!out.is_user_document());

        let calls = compiler.calls.lock().unwrap();
        let timeouts: Vec<u64> = calls.iter().map(|c| c.1.as_secs()).collect();
        assert_eq!(timeouts, vec![60, 30, 15]);
        assert!(calls[2].0.contains("\\item ! Undefined control sequence."));
        assert!(!calls[2].0.contains("\\foo"));
    }

    #[tokio::test]
    async fn exhaustion_carries_emergency_log() {
        let config = CompileConfig::default();
        let compiler = TierCompiler::new(usize::MAX);
        let err = CompilationCascade::new(&compiler, &config)
            .run("x")
            .await
            .unwrap_err();
        match err {
            Pdf2LatexError::CompilationExhausted { attempts, log } => {
                assert_eq!(attempts, 3);
                assert!(log.contains("Emergency stop"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(compiler.calls.lock().unwrap().len(), 3);
    }

    #[test]
    fn error_lines_are_capped_at_five() {
        let log = (0..8).map(|i| format!("! error {i}\nctx")).collect::<Vec<_>>().join("\n");
        let lines = extract_error_lines(&log);
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[4], "! error 4");
    }

    #[test]
    fn escape_latex_specials() {
        assert_eq!(escape_latex(r"a_b & 50% $x$"), r"a\_b \& 50\% \$x\$");
        assert_eq!(escape_latex(r"\foo{x}"), r"\textbackslash{}foo\{x\}");
    }

    #[test]
    fn emergency_without_errors_still_valid() {
        let doc = emergency_document(&[]);
        assert!(doc.starts_with("\\documentclass{article}"));
        assert!(doc.ends_with("\\end{document}\n"));
        assert!(!doc.contains("itemize"));
    }
}
