//! Prompts for LaTeX extraction, tie-break judging and syntax repair.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth** — the wording of a voter variant, the judge
//!    instruction, and the repair sentinel live in exactly one place.
//!
//! 2. **Testability** — unit tests can inspect the composed prompts without
//!    a real provider, so a regression such as a voter variant losing its
//!    base instructions is caught immediately.
//!
//! Voter variants are composed from named fragments. The base fragment is
//! always present; the emphasis fragments make the voters diverge on
//! purpose so that their errors are decorrelated, which is what makes line
//! voting worthwhile.
//!
//! Callers can override any of these through
//! [`crate::config::ConversionConfig`]; the constants are only defaults.

/// Instructions shared by every voter.
pub const BASE_FRAGMENT: &str = r#"You are an expert LaTeX typesetter. Convert the attached document into a single, complete, compilable LaTeX document.

Follow these rules precisely:

1. Start with \documentclass and end with \end{document}.
2. Load every package you use in the preamble (amsmath, amssymb, graphicx, tikz, ...).
3. Preserve ALL text content in reading order. Do not summarise.
4. Put one sentence or one LaTeX command per line where practical; keep line breaks stable.
5. Do not invent content that is not on the page.
6. Output ONLY the LaTeX source. No commentary, no explanations."#;

/// Emphasis on document structure: sectioning, lists, tables.
pub const STRUCTURE_FRAGMENT: &str = r#"
STRUCTURE EMPHASIS
- Reproduce the heading hierarchy exactly with \section, \subsection and \subsubsection.
- Use itemize / enumerate for lists and preserve nesting.
- Convert tables to tabular with the same column count and alignment."#;

/// Emphasis on mathematics.
pub const EQUATION_FRAGMENT: &str = r#"
EQUATION EMPHASIS
- Transcribe every formula exactly, symbol by symbol.
- Use equation / align environments for display math, $...$ for inline math.
- Keep equation numbering with \label where the source numbers equations."#;

/// Emphasis on figures and diagrams.
pub const DIAGRAM_FRAGMENT: &str = r#"
DIAGRAM EMPHASIS
- Redraw simple diagrams with tikzpicture, declaring width= and height= in cm in the environment options.
- For photographs or complex figures emit a figure environment with a \fbox placeholder and the original caption."#;

/// Judge instruction used when voters disagree on a line.
///
/// The candidate list is appended by [`judge_prompt`].
pub const DEFAULT_JUDGE_PROMPT: &str = r#"Several transcriptions of the attached document disagree on one line of LaTeX source. Pick the candidate that most faithfully matches the document and is valid LaTeX.

Answer with the number of the best candidate only."#;

/// Sentinel the validator must return when the document has no build-breaking issues.
pub const NO_ISSUES_SENTINEL: &str = "NO_ISSUES_FOUND";

/// Validation instruction for the syntax-repair stage.
pub const DEFAULT_VALIDATION_PROMPT: &str = r#"Review the following LaTeX document for syntax errors that would prevent it from compiling: unbalanced braces, unclosed environments, missing packages, undefined commands, stray characters, and mismatched math delimiters.

If there are no such issues, reply with exactly NO_ISSUES_FOUND.
Otherwise list each issue on its own line."#;

/// Correction instruction for the syntax-repair stage.
pub const DEFAULT_CORRECTION_PROMPT: &str = r#"Fix every syntax issue listed in the report below so that the LaTeX document compiles. Change nothing else.

Return ONLY the corrected LaTeX document, without commentary and without markdown fences."#;

/// Instruction for one block group in the chunked path.
///
/// Block groups produce body fragments; the preamble is added once during
/// assembly so that groups do not emit conflicting \documentclass lines.
pub const DEFAULT_CHUNK_PROMPT: &str = r#"The attached images are consecutive pages of a larger document. Transcribe them to LaTeX body content.

Rules:
1. Do NOT emit \documentclass, \usepackage, \begin{document} or \end{document}.
2. Preserve all text in reading order; use \section / \subsection for headings.
3. Use amsmath environments for display math and $...$ for inline math.
4. Output ONLY LaTeX body source."#;

/// Preamble wrapped around the concatenated block groups of the chunked path.
pub const CHUNK_PREAMBLE: &str = r"\documentclass{article}
\usepackage[utf8]{inputenc}
\usepackage{amsmath}
\usepackage{amssymb}
\usepackage{graphicx}
\usepackage{tikz}
\usepackage{hyperref}

\begin{document}
";

/// Closing line of the chunked-path document.
pub const CHUNK_POSTAMBLE: &str = "\\end{document}\n";

/// Build the full judge prompt for one disputed line.
///
/// `context` holds the lines resolved immediately before the disputed one,
/// oldest first; candidates are numbered from 1.
pub fn judge_prompt(instruction: &str, line_index: usize, context: &[String], candidates: &[String]) -> String {
    let mut prompt = String::with_capacity(instruction.len() + 256);
    prompt.push_str(instruction);
    prompt.push_str(&format!("\n\nDisputed line: {}\n", line_index + 1));

    if !context.is_empty() {
        prompt.push_str("\nPreceding lines:\n");
        for line in context {
            prompt.push_str(line);
            prompt.push('\n');
        }
    }

    prompt.push_str("\nCandidates:\n");
    for (i, candidate) in candidates.iter().enumerate() {
        prompt.push_str(&format!("{}. {}\n", i + 1, candidate));
    }
    prompt
}

/// Build the validation request for a full document.
pub fn validation_request(instruction: &str, document: &str) -> String {
    format!("{instruction}\n\n```latex\n{document}\n```")
}

/// Build the correction request from the validator's report.
pub fn correction_request(instruction: &str, report: &str, document: &str) -> String {
    format!(
        "{instruction}\n\nIssue report:\n{}\n\nDocument:\n```latex\n{document}\n```",
        report.trim()
    )
}
