//! External LaTeX compiler adapter.
//!
//! The cascade only needs three facts from a compile: did it produce a PDF,
//! what did the log say, and did it finish in time. [`Compiler`] is that
//! contract; [`LatexCompiler`] fulfils it by running `pdflatex` (or any
//! compatible engine) in a throwaway directory.

use crate::config::CompileConfig;
use crate::error::Pdf2LatexError;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Job name used for every compile; the engine writes `<JOB>.pdf`/`<JOB>.log`.
const JOB_NAME: &str = "document";

/// Outcome of one compiler run.
///
/// A missing artifact is a normal outcome, not an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileRun {
    pub artifact: Option<Vec<u8>>,
    /// Compiler log, or captured stdout/stderr when no log file exists.
    pub log: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

/// Compiles LaTeX source to a PDF under a hard timeout.
#[async_trait]
pub trait Compiler: Send + Sync {
    /// `Err` only when the compiler cannot be run at all.
    async fn compile(&self, document: &str, timeout: Duration) -> Result<CompileRun, Pdf2LatexError>;
}

/// Runs a TeX engine as a child process in a fresh temporary directory.
///
/// The directory is removed when the run ends, whatever the outcome. The
/// child is killed if the timeout fires first.
#[derive(Debug, Clone)]
pub struct LatexCompiler {
    program: String,
    args: Vec<String>,
}

impl LatexCompiler {
    pub fn new(config: &CompileConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl Compiler for LatexCompiler {
    async fn compile(&self, document: &str, timeout: Duration) -> Result<CompileRun, Pdf2LatexError> {
        let dir = tempfile::TempDir::new()
            .map_err(|e| Pdf2LatexError::Internal(format!("Cannot create compile dir: {e}")))?;
        let tex_path = dir.path().join(format!("{JOB_NAME}.tex"));
        tokio::fs::write(&tex_path, document)
            .await
            .map_err(|e| Pdf2LatexError::Internal(format!("Cannot write {}: {e}", tex_path.display())))?;

        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(format!("-jobname={JOB_NAME}"))
            .arg(format!("{JOB_NAME}.tex"))
            .current_dir(dir.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Pdf2LatexError::CompilerUnavailable {
                program: self.program.clone(),
                detail: e.to_string(),
            })?;

        let (exit_code, console, timed_out) =
            match tokio::time::timeout(timeout, child.wait_with_output()).await {
                Ok(Ok(out)) => {
                    let console = format!(
                        "{}{}",
                        String::from_utf8_lossy(&out.stdout),
                        String::from_utf8_lossy(&out.stderr)
                    );
                    (out.status.code(), console, false)
                }
                Ok(Err(e)) => (None, format!("failed waiting for {}: {e}", self.program), false),
                Err(_) => {
                    // Dropping the wait future drops the child; kill_on_drop reaps it.
                    warn!("{} timed out after {}s", self.program, timeout.as_secs());
                    (None, String::new(), true)
                }
            };

        let log = match tokio::fs::read(dir.path().join(format!("{JOB_NAME}.log"))).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(_) => console,
        };

        // A timed-out run never counts as a success, even if a PDF was flushed.
        let artifact = if timed_out {
            None
        } else {
            tokio::fs::read(dir.path().join(format!("{JOB_NAME}.pdf")))
                .await
                .ok()
                .filter(|b| !b.is_empty())
        };

        debug!(
            "{} exited with {:?}, artifact: {}",
            self.program,
            exit_code,
            artifact.as_ref().map_or(0, Vec::len)
        );

        Ok(CompileRun {
            artifact,
            log,
            exit_code,
            timed_out,
        })
    }
}
