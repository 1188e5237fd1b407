//! Progress-callback trait for reconciliation and compilation events.
//!
//! Inject an [`Arc<dyn ReconcileProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] (or pass one
//! to [`crate::pipeline::cascade::CompilationCascade::with_progress`]) to
//! receive events as voters finish, ties are judged and cascade tiers run.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdf2latex::{ReconcileProgressCallback, ConversionConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     done: AtomicUsize,
//! }
//!
//! impl ReconcileProgressCallback for CountingCallback {
//!     fn on_voter_complete(&self, voter_index: usize, total_voters: usize, line_count: usize) {
//!         self.done.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("voter {}/{} done ({} lines)", voter_index + 1, total_voters, line_count);
//!     }
//! }
//!
//! let config = ConversionConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { done: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::CompileStrategy;
use std::sync::Arc;

/// Called by the pipeline as it reconciles and compiles.
///
/// Voters run concurrently, so `on_voter_*` may be called from several tasks
/// at once; implementations must synchronise their own state. All methods
/// default to no-ops.
pub trait ReconcileProgressCallback: Send + Sync {
    /// Called once before any voter (or block group) starts.
    fn on_reconcile_start(&self, total_voters: usize) {
        let _ = total_voters;
    }

    /// Called before the first attempt of a voter.
    fn on_voter_start(&self, voter_index: usize, total_voters: usize) {
        let _ = (voter_index, total_voters);
    }

    /// Called when a voter produced non-empty text.
    fn on_voter_complete(&self, voter_index: usize, total_voters: usize, line_count: usize) {
        let _ = (voter_index, total_voters, line_count);
    }

    /// Called when a voter exhausted its attempts and will contribute nothing.
    fn on_voter_failed(&self, voter_index: usize, total_voters: usize, error: &str) {
        let _ = (voter_index, total_voters, error);
    }

    /// Called after the judge picked a candidate for a line without majority.
    fn on_tiebreak(&self, line_index: usize, option_count: usize, chosen: usize) {
        let _ = (line_index, option_count, chosen);
    }

    /// Called when the syntax-repair stage finished.
    fn on_repair_complete(&self, issues_found: bool) {
        let _ = issues_found;
    }

    /// Called once with the final tie-break count.
    fn on_reconcile_complete(&self, resolved_lines: usize, tiebreak_count: usize) {
        let _ = (resolved_lines, tiebreak_count);
    }

    /// Called before a cascade tier runs the compiler.
    fn on_tier_start(&self, strategy: CompileStrategy) {
        let _ = strategy;
    }

    /// Called after a cascade tier ran, with whether it produced a PDF.
    fn on_tier_complete(&self, strategy: CompileStrategy, produced_artifact: bool) {
        let _ = (strategy, produced_artifact);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ReconcileProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn ReconcileProgressCallback>;
