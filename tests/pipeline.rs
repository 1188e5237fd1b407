//! Offline pipeline tests: scripted generation clients and compilers drive
//! the full reconcile and compile paths without a provider or a TeX install.
//!
//! Run with:
//!   cargo test --test pipeline

use async_trait::async_trait;
use edgequake_pdf2latex::{
    CompilationCascade, CompileConfig, CompileRun, CompileStrategy, Compiler, ConversionConfig,
    GenerationClient, GenerationError, Pdf2LatexError, PromptVariant, Reconciler, RepairOutcome,
    RepairStage, SourceDocument, VoterConfiguration,
};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

// ── Scripted generation client ───────────────────────────────────────────────

const JUDGE: &str = "JUDGE";
const VALIDATE: &str = "VALIDATE";
const CORRECT: &str = "CORRECT";

/// Answers each voter by prompt name; judge, validation and correction calls
/// are recognised by their instruction prefix.
struct Script {
    voters: HashMap<String, Result<String, GenerationError>>,
    judge: String,
    validation: Result<String, GenerationError>,
    correction: String,
    calls: Mutex<HashMap<String, usize>>,
}

impl Script {
    fn new(voters: &[(&str, &str)]) -> Self {
        Self {
            voters: voters
                .iter()
                .map(|(name, reply)| (name.to_string(), Ok(reply.to_string())))
                .collect(),
            judge: "1".to_string(),
            validation: Ok("NO_ISSUES_FOUND".to_string()),
            correction: String::new(),
            calls: Mutex::new(HashMap::new()),
        }
    }

    fn failing(mut self, name: &str, err: GenerationError) -> Self {
        self.voters.insert(name.to_string(), Err(err));
        self
    }

    fn calls(&self, key: &str) -> usize {
        self.calls.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    fn record(&self, key: &str) {
        *self.calls.lock().unwrap().entry(key.to_string()).or_default() += 1;
    }
}

#[async_trait]
impl GenerationClient for Script {
    async fn generate(
        &self,
        _attachments: &[SourceDocument],
        prompt: &str,
    ) -> Result<String, GenerationError> {
        if prompt.starts_with(CORRECT) {
            self.record(CORRECT);
            return Ok(self.correction.clone());
        }
        if prompt.starts_with(VALIDATE) {
            self.record(VALIDATE);
            return self.validation.clone();
        }
        if prompt.starts_with(JUDGE) {
            self.record(JUDGE);
            return Ok(self.judge.clone());
        }
        self.record(prompt);
        self.voters
            .get(prompt)
            .cloned()
            .unwrap_or_else(|| Err(GenerationError::Provider(format!("no script for {prompt}"))))
    }
}

fn config_for(names: &[&str]) -> ConversionConfig {
    ConversionConfig::builder()
        .voters(VoterConfiguration::new(
            names.iter().map(|n| PromptVariant::custom(*n, *n)).collect(),
        ))
        .judge_prompt(JUDGE)
        .validation_prompt(VALIDATE)
        .correction_prompt(CORRECT)
        .retry_backoff_ms(0)
        .build()
        .unwrap()
}

fn image() -> SourceDocument {
    SourceDocument::new(vec![0x89, b'P', b'N', b'G'], "image/png")
}

const FIVE: [&str; 5] = ["v1", "v2", "v3", "v4", "v5"];

// ── Reconciliation ───────────────────────────────────────────────────────────

#[tokio::test]
async fn four_to_one_majority_needs_no_judge() {
    let x = "a\nb\nc\nX\ne";
    let y = "a\nb\nc\nY\ne";
    let script = Script::new(&[("v1", x), ("v2", x), ("v3", y), ("v4", x), ("v5", x)]);
    let config = config_for(&FIVE);

    let out = Reconciler::new(&script, &config)
        .reconcile(&image())
        .await
        .unwrap();

    assert_eq!(out.latex, "a\nb\nc\nX\ne\n");
    assert_eq!(out.tiebreak_count, 0);
    assert!(out.decisions.is_empty());
    assert_eq!(script.calls(JUDGE), 0);
    assert_eq!(out.repair, RepairOutcome::Clean);
    assert_eq!(out.stats.successful_voters, 5);
}

#[tokio::test]
async fn split_vote_goes_to_judge_with_ranked_options() {
    let script = Script {
        judge: "Candidate 2".to_string(),
        ..Script::new(&[
            ("v1", "A\nend"),
            ("v2", "A\nend"),
            ("v3", "B\nend"),
            ("v4", "B\nend"),
            ("v5", "C\nend"),
        ])
    };
    let config = config_for(&FIVE);

    let out = Reconciler::new(&script, &config)
        .reconcile(&image())
        .await
        .unwrap();

    assert_eq!(out.tiebreak_count, 1);
    assert_eq!(script.calls(JUDGE), 1);
    let decision = &out.decisions[0];
    assert_eq!(decision.line_index, 0);
    assert_eq!(decision.options, vec!["A", "B", "C"]);
    assert_eq!(decision.chosen_text(), "B");
    assert_eq!(out.latex, "B\nend\n");
}

#[tokio::test]
async fn unusable_judge_reply_keeps_most_frequent_candidate() {
    let script = Script {
        judge: "I cannot decide".to_string(),
        ..Script::new(&[("v1", "A"), ("v2", "A"), ("v3", "B"), ("v4", "B"), ("v5", "C")])
    };
    let config = config_for(&FIVE);

    let out = Reconciler::new(&script, &config)
        .reconcile(&image())
        .await
        .unwrap();
    assert_eq!(out.latex, "A\n");
    assert_eq!(out.decisions[0].chosen, 0);
}

#[tokio::test]
async fn empty_voter_retries_then_is_outvoted() {
    let body = "\\section{Intro}\ntext";
    let script = Script::new(&[("v1", body), ("v2", body), ("v3", "```latex\n```")]);
    let config = config_for(&["v1", "v2", "v3"]);

    let out = Reconciler::new(&script, &config)
        .reconcile(&image())
        .await
        .unwrap();

    assert_eq!(script.calls("v3"), 3);
    assert_eq!(script.calls("v1"), 1);
    let summary = &out.voters[2];
    assert!(!summary.success);
    assert_eq!(summary.attempts, 3);
    assert_eq!(summary.error, Some(GenerationError::Empty));
    assert_eq!(out.latex, "\\section{Intro}\ntext\n");
    assert_eq!(out.stats.successful_voters, 2);
}

#[tokio::test]
async fn every_voter_failing_is_an_error() {
    let script = Script::new(&[])
        .failing("v1", GenerationError::Transport("connection reset".into()))
        .failing("v2", GenerationError::Transport("connection reset".into()));
    let config = config_for(&["v1", "v2"]);

    let err = Reconciler::new(&script, &config)
        .reconcile(&image())
        .await
        .unwrap_err();

    match err {
        Pdf2LatexError::AllVotersFailed { voters, attempts, last_error } => {
            assert_eq!(voters, 2);
            assert_eq!(attempts, 3);
            assert!(last_error.contains("connection reset"), "got: {last_error}");
        }
        other => panic!("expected AllVotersFailed, got {other:?}"),
    }
    assert_eq!(script.calls(VALIDATE), 0);
}

#[tokio::test]
async fn zero_concurrency_is_rejected_before_any_voter_runs() {
    let script = Script::new(&[("v1", "\\section{Intro}")]);
    let config = ConversionConfig {
        concurrency: 0,
        ..config_for(&["v1"])
    };

    let err = Reconciler::new(&script, &config)
        .reconcile(&image())
        .await
        .unwrap_err();

    assert!(matches!(err, Pdf2LatexError::InvalidConfig(_)), "got {err:?}");
    assert_eq!(script.calls("v1"), 0);
}

#[tokio::test]
async fn equal_length_responses_keep_line_count() {
    let responses = [
        "l1\nl2\nl3\nl4\nl5\nl6",
        "l1\nl2\nl3 \nl4\nl5\nl6",
        "l1\nL2\nl3\nl4\nl5\nl6",
    ];
    let script = Script::new(&[("v1", responses[0]), ("v2", responses[1]), ("v3", responses[2])]);
    let config = config_for(&["v1", "v2", "v3"]);

    let out = Reconciler::new(&script, &config)
        .reconcile(&image())
        .await
        .unwrap();
    assert_eq!(out.latex.lines().count(), 6);
    assert_eq!(out.stats.resolved_lines, 6);
    assert_eq!(out.tiebreak_count, 0);
}

#[tokio::test]
async fn shorter_voter_is_padded_not_dropped() {
    let script = Script::new(&[("v1", "a\nb\nc"), ("v2", "a\nb\nc"), ("v3", "a")]);
    let config = config_for(&["v1", "v2", "v3"]);

    let out = Reconciler::new(&script, &config)
        .reconcile(&image())
        .await
        .unwrap();
    assert_eq!(out.latex, "a\nb\nc\n");
}

#[tokio::test]
async fn reported_issues_are_corrected() {
    let script = Script {
        validation: Ok("Line 2: missing closing brace".to_string()),
        correction: "```latex\n\\textbf{fixed}\n```".to_string(),
        ..Script::new(&[("v1", "\\textbf{fixed"), ("v2", "\\textbf{fixed")])
    };
    let config = config_for(&["v1", "v2"]);

    let out = Reconciler::new(&script, &config)
        .reconcile(&image())
        .await
        .unwrap();
    assert_eq!(out.repair, RepairOutcome::Corrected);
    assert_eq!(out.latex, "\\textbf{fixed}\n");
    assert_eq!(script.calls(CORRECT), 1);
}

#[tokio::test]
async fn validation_failure_propagates() {
    let script = Script {
        validation: Err(GenerationError::Transport("timeout".into())),
        ..Script::new(&[("v1", "x")])
    };
    let config = config_for(&["v1"]);

    let err = Reconciler::new(&script, &config)
        .reconcile(&image())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Pdf2LatexError::SyntaxRepairFailed { stage: RepairStage::Validation, .. }
    ));
}

#[test]
fn reconcile_runs_under_a_plain_executor() {
    let script = Script::new(&[("v1", "only line")]);
    let config = config_for(&["v1"]);
    let out = tokio_test::block_on(Reconciler::new(&script, &config).reconcile(&image())).unwrap();
    assert_eq!(out.latex, "only line\n");
}

// ── Compilation cascade ──────────────────────────────────────────────────────

/// Fails any document containing one of `poison`; records every source seen.
struct PickyCompiler {
    poison: Vec<&'static str>,
    seen: Mutex<Vec<(String, Duration)>>,
}

impl PickyCompiler {
    fn new(poison: &[&'static str]) -> Self {
        Self {
            poison: poison.to_vec(),
            seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Compiler for PickyCompiler {
    async fn compile(&self, document: &str, timeout: Duration) -> Result<CompileRun, Pdf2LatexError> {
        self.seen.lock().unwrap().push((document.to_string(), timeout));
        if let Some(bad) = self.poison.iter().find(|p| document.contains(*p)) {
            return Ok(CompileRun {
                artifact: None,
                log: format!("! Undefined control sequence {bad}.\nl.7 {bad}\n"),
                exit_code: Some(1),
                timed_out: false,
            });
        }
        Ok(CompileRun {
            artifact: Some(b"%PDF-1.5".to_vec()),
            log: String::new(),
            exit_code: Some(0),
            timed_out: false,
        })
    }
}

const WITH_DIAGRAM: &str = "\\documentclass{article}\n\\usepackage{tikz}\n\\begin{document}\nIntro.\n\\begin{tikzpicture}[width=8cm,height=5cm]\n\\draw (0,0) -- (1,1);\n\\end{tikzpicture}\n\\end{document}\n";

#[tokio::test]
async fn diagram_failure_falls_back_to_placeholder() {
    let compiler = PickyCompiler::new(&["\\draw"]);
    let config = CompileConfig::default();

    let out = CompilationCascade::new(&compiler, &config)
        .run(WITH_DIAGRAM)
        .await
        .unwrap();

    assert_eq!(out.strategy, CompileStrategy::Placeholder);
    assert!(out.is_user_document());
    assert_eq!(out.attempts.len(), 2);

    let seen = compiler.seen.lock().unwrap();
    assert_eq!(seen[0].0, WITH_DIAGRAM);
    assert!(seen[1].0.contains("\\parbox[c][5.00cm][c]{8.00cm}"));
    assert!(seen[1].0.contains("Intro."));
    assert!(!seen[1].0.contains("\\begin{tikzpicture}"));
}

#[tokio::test]
async fn tiers_run_in_order_with_decreasing_timeouts() {
    let compiler = PickyCompiler::new(&["\\draw", "\\fbox"]);
    let config = CompileConfig::default();

    let out = CompilationCascade::new(&compiler, &config)
        .run(WITH_DIAGRAM)
        .await
        .unwrap();

    assert_eq!(out.strategy, CompileStrategy::Emergency);
    assert!(!out.is_user_document());
    let strategies: Vec<_> = out.attempts.iter().map(|a| a.strategy).collect();
    assert_eq!(
        strategies,
        vec![CompileStrategy::Raw, CompileStrategy::Placeholder, CompileStrategy::Emergency]
    );

    let seen = compiler.seen.lock().unwrap();
    let timeouts: Vec<u64> = seen.iter().map(|(_, t)| t.as_secs()).collect();
    assert_eq!(timeouts, vec![60, 30, 15]);
    assert!(seen[2].0.contains("Undefined control sequence"));
}

#[tokio::test]
async fn clean_document_compiles_on_first_tier() {
    let compiler = PickyCompiler::new(&[]);
    let config = CompileConfig::default();

    let out = CompilationCascade::new(&compiler, &config)
        .run(WITH_DIAGRAM)
        .await
        .unwrap();
    assert_eq!(out.strategy, CompileStrategy::Raw);
    assert_eq!(out.pdf, b"%PDF-1.5");
    assert_eq!(compiler.seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn exhausted_cascade_is_an_error() {
    let compiler = PickyCompiler::new(&["\\documentclass"]);
    let config = CompileConfig::default();

    let err = CompilationCascade::new(&compiler, &config)
        .run(WITH_DIAGRAM)
        .await
        .unwrap_err();
    assert!(matches!(err, Pdf2LatexError::CompilationExhausted { attempts: 3, .. }));
}
