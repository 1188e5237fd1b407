//! Result types returned by reconciliation and compilation.
//!
//! Everything here is `Serialize + Deserialize` so the CLI can emit it as
//! JSON and callers can store a run for later comparison. The compiled PDF
//! bytes are the one exception: they are skipped during serialisation.

use crate::error::GenerationError;
use serde::{Deserialize, Serialize};

/// A reconciled LaTeX document plus everything needed to audit how it was built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileOutput {
    /// The final LaTeX source after consensus and syntax repair.
    pub latex: String,
    /// Number of line indices that needed a judge call.
    pub tiebreak_count: usize,
    /// One summary per voter, in voter order. Empty for the chunked path.
    pub voters: Vec<VoterSummary>,
    /// Every tie-break decision, in line order.
    pub decisions: Vec<TiebreakDecision>,
    /// What the syntax-repair stage did.
    pub repair: RepairOutcome,
    pub stats: ReconcileStats,
}

/// Per-voter audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoterSummary {
    pub voter_index: usize,
    /// Name of the prompt variant the voter used.
    pub variant: String,
    pub success: bool,
    /// Attempts made, including the successful one.
    pub attempts: u32,
    /// Lines in the accepted response (0 for a failed voter).
    pub line_count: usize,
    /// Error of the last failed attempt, if the voter never succeeded.
    pub error: Option<GenerationError>,
}

/// One judge decision for a line without majority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TiebreakDecision {
    pub line_index: usize,
    /// Candidate original-text lines, most frequent first (at most 3).
    pub options: Vec<String>,
    /// Index into `options`; always in range.
    pub chosen: usize,
}

impl TiebreakDecision {
    /// The text that won.
    pub fn chosen_text(&self) -> &str {
        &self.options[self.chosen]
    }
}

/// Outcome of the syntax-repair stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairOutcome {
    /// Validator reported no issues; document returned unchanged.
    Clean,
    /// Validator reported issues; the corrected document was used.
    Corrected,
}

/// Timing and volume statistics for one reconciliation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcileStats {
    /// Voters configured (or block groups in the chunked path).
    pub voters: usize,
    /// Voters (or block groups) that returned non-empty text.
    pub successful_voters: usize,
    pub resolved_lines: usize,
    pub tiebreak_count: usize,
    /// Total input tokens reported by the provider.
    pub total_input_tokens: u64,
    /// Total output tokens reported by the provider.
    pub total_output_tokens: u64,
    pub voting_duration_ms: u64,
    pub consensus_duration_ms: u64,
    pub repair_duration_ms: u64,
    pub total_duration_ms: u64,
}

// ── Compilation ──────────────────────────────────────────────────────────

/// Compilation strategy of one cascade tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompileStrategy {
    /// Document compiled exactly as given.
    Raw,
    /// Diagram blocks replaced by framed placeholders.
    Placeholder,
    /// Fixed error-report document synthesised from the compiler log.
    Emergency,
}

impl std::fmt::Display for CompileStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompileStrategy::Raw => write!(f, "raw"),
            CompileStrategy::Placeholder => write!(f, "placeholder"),
            CompileStrategy::Emergency => write!(f, "emergency"),
        }
    }
}

/// Record of one compiler invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilationAttempt {
    pub strategy: CompileStrategy,
    /// Process exit code; `None` when the process was killed or timed out.
    pub exit_code: Option<i32>,
    pub artifact_produced: bool,
    pub timed_out: bool,
    /// Compiler log (or stdout when no log file was written).
    pub diagnostic: String,
    pub duration_ms: u64,
}

/// A successfully compiled document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileOutput {
    /// PDF bytes of the first tier that produced an artifact.
    #[serde(skip)]
    pub pdf: Vec<u8>,
    /// Tier that produced `pdf`.
    pub strategy: CompileStrategy,
    /// Every attempt made, in order; the last one succeeded.
    pub attempts: Vec<CompilationAttempt>,
}

impl CompileOutput {
    /// True when the caller's own document (possibly with placeholders)
    /// compiled, false when only the emergency report did.
    pub fn is_user_document(&self) -> bool {
        self.strategy != CompileStrategy::Emergency
    }
}
