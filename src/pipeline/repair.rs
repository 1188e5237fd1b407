//! Syntax repair: one validation call, then a correction call if needed.
//!
//! Both calls are text-only (no attachment) and neither is retried. A
//! failed call aborts the reconciliation with
//! [`Pdf2LatexError::SyntaxRepairFailed`]; a document is never returned
//! half-repaired.

use crate::config::ConversionConfig;
use crate::error::{Pdf2LatexError, RepairStage};
use crate::output::RepairOutcome;
use crate::pipeline::generation::GenerationClient;
use crate::pipeline::postprocess::clean_reply;
use crate::prompts::{correction_request, validation_request, NO_ISSUES_SENTINEL};
use tracing::{debug, info};

pub struct SyntaxRepairStage<'a> {
    client: &'a dyn GenerationClient,
    config: &'a ConversionConfig,
}

impl<'a> SyntaxRepairStage<'a> {
    pub fn new(client: &'a dyn GenerationClient, config: &'a ConversionConfig) -> Self {
        Self { client, config }
    }

    /// Validate `document` and correct it when the validator reports issues.
    pub async fn run(&self, document: &str) -> Result<(String, RepairOutcome), Pdf2LatexError> {
        let report = self
            .client
            .generate(&[], &validation_request(&self.config.validation_prompt, document))
            .await
            .map_err(|e| Pdf2LatexError::SyntaxRepairFailed {
                stage: RepairStage::Validation,
                detail: e.to_string(),
            })?;

        if report.contains(NO_ISSUES_SENTINEL) {
            info!("Syntax check: no issues found");
            return Ok((document.to_string(), RepairOutcome::Clean));
        }

        debug!("Syntax check report:\n{}", report.trim());
        info!("Syntax check found issues, requesting correction");

        let reply = self
            .client
            .generate(
                &[],
                &correction_request(&self.config.correction_prompt, &report, document),
            )
            .await
            .map_err(|e| Pdf2LatexError::SyntaxRepairFailed {
                stage: RepairStage::Correction,
                detail: e.to_string(),
            })?;

        let corrected = clean_reply(&reply);
        if corrected.is_empty() {
            return Err(Pdf2LatexError::SyntaxRepairFailed {
                stage: RepairStage::Correction,
                detail: "correction returned empty text".to_string(),
            });
        }

        Ok((corrected, RepairOutcome::Corrected))
    }
}
