//! Error types for the edgequake-pdf2latex library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`Pdf2LatexError`] — **Fatal**: the reconciliation or compilation cannot
//!   produce a result (bad input, provider not configured, syntax repair
//!   failed, every compilation tier exhausted). Returned as
//!   `Err(Pdf2LatexError)` from the top-level entry points.
//!
//! * [`GenerationError`] — **Non-fatal**: a single generation call failed
//!   (transport error, empty reply). Voters and the tie-break judge absorb
//!   these locally: a voter retries and finally contributes an empty
//!   response, the judge defaults to the first candidate. The last error of
//!   a voter is kept in [`crate::output::VoterSummary`] for inspection.
//!
//! A failure is never reported alongside a successful-looking document: the
//! top-level functions return either a complete output or an error.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-pdf2latex library.
#[derive(Debug, Error)]
pub enum Pdf2LatexError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// The input was read but its format cannot be sent to the provider.
    #[error("Unsupported input format for '{input}': {detail}")]
    UnsupportedFormat { input: String, detail: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    // ── PDF errors (chunked path) ─────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt, or pdfium could not open it.
    #[error("PDF could not be opened: {detail}\nTry repairing with: qpdf --decrypt input.pdf output.pdf")]
    CorruptPdf { detail: String },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    // ── Generation errors ─────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Every voter came back empty after all retries; there is nothing to
    /// reconcile.
    #[error("All {voters} voters failed after {attempts} attempts each.\nLast error: {last_error}")]
    AllVotersFailed {
        voters: usize,
        attempts: u32,
        last_error: String,
    },

    /// The validation or correction call of the syntax-repair stage failed.
    #[error("Syntax repair failed during {stage}: {detail}")]
    SyntaxRepairFailed { stage: RepairStage, detail: String },

    // ── Compilation errors ────────────────────────────────────────────────
    /// Raw, placeholder and emergency compilation all failed to produce a PDF.
    #[error("Compilation failed after {attempts} attempts (raw, placeholder, emergency).\n{log}")]
    CompilationExhausted { attempts: usize, log: String },

    /// The LaTeX compiler binary could not be started at all.
    #[error("Could not run LaTeX compiler '{program}': {detail}\nInstall TeX Live or set --latex-program.")]
    CompilerUnavailable { program: String, detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Which call of the syntax-repair stage failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RepairStage {
    Validation,
    Correction,
}

impl std::fmt::Display for RepairStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepairStage::Validation => write!(f, "validation"),
            RepairStage::Correction => write!(f, "correction"),
        }
    }
}

/// A non-fatal error from a single generation call.
///
/// Recorded against the voter (or chunk) that produced it; never aborts the
/// pipeline on its own.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum GenerationError {
    /// Network / API failure reported by the provider.
    #[error("generation call failed: {0}")]
    Transport(String),

    /// The call succeeded but the reply was empty after fence stripping.
    #[error("generation returned empty text")]
    Empty,

    /// The provider could not be constructed or rejected the request outright.
    #[error("provider error: {0}")]
    Provider(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_voters_failed_display() {
        let e = Pdf2LatexError::AllVotersFailed {
            voters: 5,
            attempts: 3,
            last_error: "generation returned empty text".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("All 5 voters"), "got: {msg}");
        assert!(msg.contains("3 attempts"), "got: {msg}");
    }

    #[test]
    fn syntax_repair_display_names_stage() {
        let e = Pdf2LatexError::SyntaxRepairFailed {
            stage: RepairStage::Correction,
            detail: "connection reset".into(),
        };
        assert!(e.to_string().contains("during correction"));
        assert!(e.to_string().contains("connection reset"));
    }

    #[test]
    fn compilation_exhausted_carries_log() {
        let e = Pdf2LatexError::CompilationExhausted {
            attempts: 3,
            log: "! Emergency stop.".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("! Emergency stop."));
    }

    #[test]
    fn generation_error_roundtrips_through_json() {
        let e = GenerationError::Transport("HTTP 503".into());
        let json = serde_json::to_string(&e).unwrap();
        let back: GenerationError = serde_json::from_str(&json).unwrap();
        assert_eq!(back.to_string(), "generation call failed: HTTP 503");
    }
}
