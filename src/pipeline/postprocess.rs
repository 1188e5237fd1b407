//! Post-processing: deterministic cleanup of generated LaTeX.
//!
//! ## Why is post-processing necessary?
//!
//! Even well-prompted models wrap their answer in ```` ```latex ... ``` ````
//! fences, prepend a sentence of commentary, use `\r\n` line endings, or
//! sprinkle zero-width characters into the output. None of that belongs in
//! a `.tex` file, and all of it would make otherwise identical voter lines
//! disagree.
//!
//! Two separate concerns live here:
//!
//! * [`clean_reply`] turns a raw model reply into LaTeX source. It is
//!   applied to every voter reply, block-group reply and correction reply.
//! * [`normalize_line`] is the comparison key used by the consensus engine.
//!   It never changes the text that ends up in the output.

use once_cell::sync::Lazy;
use regex::Regex;

/// Turn a raw model reply into LaTeX source.
///
/// Rules (applied in order):
/// 1. Extract the fenced block, preferring one tagged `latex`/`tex`, then an
///    untagged one, else keep the whole reply
/// 2. Normalise line endings (CRLF → LF)
/// 3. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 4. Trim leading/trailing blank space of the whole text
pub fn clean_reply(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = extract_fenced_block(&s);
    let s = remove_invisible_chars(&s);
    s.trim().to_string()
}

// ── Rule 1: Extract fenced block ─────────────────────────────────────────────

static RE_LATEX_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[ \t]*(?:latex|tex|LaTeX)[ \t]*\n(.*?)```").unwrap());

static RE_PLAIN_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```[ \t]*\n(.*?)```").unwrap());

/// Opening fence at the very start of a reply that was cut off before its
/// closing fence (typically at `max_tokens`).
static RE_OPEN_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*```[ \t]*(?:latex|tex|LaTeX)?[ \t]*\n").unwrap());

/// Return the body of the preferred fenced block, or the input unchanged.
///
/// A fence tagged with another language (` ```python `) is not a candidate:
/// when it is the only fence the raw reply is returned. A reply that opens
/// with a `latex`/`tex`/untagged fence but never closes it loses the
/// opening fence line.
pub fn extract_fenced_block(input: &str) -> String {
    if let Some(caps) = RE_LATEX_FENCE.captures(input) {
        return caps[1].to_string();
    }
    if let Some(caps) = RE_PLAIN_FENCE.captures(input) {
        return caps[1].to_string();
    }
    if let Some(m) = RE_OPEN_FENCE.find(input) {
        return input[m.end()..].to_string();
    }
    input.to_string()
}

// ── Rule 2: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Voting key ───────────────────────────────────────────────────────────────

/// Comparison key for a line: runs of whitespace collapsed to one space,
/// leading and trailing whitespace removed.
pub fn normalize_line(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split LaTeX source into lines for voting. Empty text has zero lines.
pub fn split_lines(text: &str) -> Vec<String> {
    text.lines().map(str::to_string).collect()
}

/// Ensure the document ends with exactly one newline.
pub fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_end();
    if trimmed.is_empty() {
        String::from("\n")
    } else {
        format!("{}\n", trimmed)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_latex_tagged_fence() {
        let input = "Here you go:\n```\nplain\n```\n```latex\n\\section{A}\n```";
        assert_eq!(extract_fenced_block(input), "\\section{A}\n");
    }

    #[test]
    fn falls_back_to_untagged_fence() {
        let input = "```\n\\begin{document}\n```";
        assert_eq!(extract_fenced_block(input), "\\begin{document}\n");
    }

    #[test]
    fn other_language_fence_keeps_raw_reply() {
        let input = "```python\nprint(1)\n```";
        assert_eq!(extract_fenced_block(input), input);
    }

    #[test]
    fn truncated_reply_loses_opening_fence() {
        let input = "```latex\n\\documentclass{article}\n\\begin{document}\nHello";
        let cleaned = clean_reply(input);
        assert_eq!(cleaned.lines().next(), Some("\\documentclass{article}"));
        assert!(!cleaned.contains("```"));
        assert_eq!(extract_fenced_block("```\n\\foo"), "\\foo");
    }

    #[test]
    fn truncated_other_language_fence_is_kept() {
        let input = "```python\nprint(1)";
        assert_eq!(extract_fenced_block(input), input);
    }

    #[test]
    fn no_fences_passthrough() {
        assert_eq!(extract_fenced_block("\\foo"), "\\foo");
    }

    #[test]
    fn clean_reply_handles_crlf_fences() {
        let input = "```tex\r\n\\a\r\n\\b\r\n```\r\n";
        assert_eq!(clean_reply(input), "\\a\n\\b");
    }

    #[test]
    fn clean_reply_strips_invisible() {
        assert_eq!(clean_reply("\u{FEFF}\\item\u{200B} x"), "\\item x");
    }

    #[test]
    fn normalize_collapses_whitespace() {
        assert_eq!(normalize_line("  \\item   a\t b  "), "\\item a b");
        assert_eq!(normalize_line("   "), "");
    }

    #[test]
    fn split_lines_of_empty_text() {
        assert!(split_lines("").is_empty());
        assert_eq!(split_lines("a\n\nb"), vec!["a", "", "b"]);
    }

    #[test]
    fn test_ensure_final_newline() {
        assert_eq!(ensure_final_newline("hello"), "hello\n");
        assert_eq!(ensure_final_newline("hello\n\n\n"), "hello\n");
        assert_eq!(ensure_final_newline(""), "\n");
    }
}
