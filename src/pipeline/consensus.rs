//! Consensus engine: line-by-line majority voting across voter responses.
//!
//! ## Algorithm
//!
//! For each line index `i` of the padded response matrix:
//!
//! 1. Normalise line `i` of every voter (whitespace collapsed, trimmed).
//! 2. Tally the normalised values in first-seen order.
//! 3. If the top count `c` satisfies `c * 2 > N`, the line resolves to the
//!    original text of the first voter holding that value.
//! 4. Otherwise the (up to) three most frequent values, ties broken by
//!    first-seen order, are mapped back to their first voter's original text
//!    and handed to the [`TiebreakResolver`].
//!
//! Lines are resolved strictly in index order, so the judge for line `i`
//! can be shown lines `..i` as context. With a single voter every value has
//! a majority and the judge is never consulted.

use crate::output::TiebreakDecision;
use crate::pipeline::input::SourceDocument;
use crate::pipeline::postprocess::normalize_line;
use crate::pipeline::tiebreak::{TiebreakResolver, MAX_CANDIDATES};
use crate::progress::ProgressCallback;
use std::collections::HashMap;
use tracing::{debug, info};

/// One distinct normalised value at a line index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineTally {
    /// Normalised comparison key.
    pub value: String,
    /// Original text of the first voter that produced `value`.
    pub original: String,
    pub count: usize,
    /// Voter index that first produced `value`.
    pub first_voter: usize,
}

/// Per-line tally, ordered by first appearance.
///
/// The `Vec` carries insertion order; the map only indexes into it, so the
/// ordering never depends on hashing.
#[derive(Debug, Clone, Default)]
pub struct LineVote {
    tallies: Vec<LineTally>,
    index: HashMap<String, usize>,
    voters: usize,
}

impl LineVote {
    /// Tally line `line_index` of every voter.
    pub fn collect(padded: &[Vec<String>], line_index: usize) -> Self {
        let mut vote = Self::default();
        for (voter, lines) in padded.iter().enumerate() {
            let original = lines.get(line_index).map(String::as_str).unwrap_or("");
            vote.add(voter, original);
        }
        vote
    }

    fn add(&mut self, voter: usize, original: &str) {
        self.voters += 1;
        let key = normalize_line(original);
        match self.index.get(&key) {
            Some(&slot) => self.tallies[slot].count += 1,
            None => {
                self.index.insert(key.clone(), self.tallies.len());
                self.tallies.push(LineTally {
                    value: key,
                    original: original.to_string(),
                    count: 1,
                    first_voter: voter,
                });
            }
        }
    }

    /// Tallies in first-seen order.
    pub fn tallies(&self) -> &[LineTally] {
        &self.tallies
    }

    /// The value holding a strict majority, if any.
    pub fn majority(&self) -> Option<&LineTally> {
        self.tallies.iter().find(|t| t.count * 2 > self.voters)
    }

    /// Up to `limit` tallies ranked by count, ties by first appearance.
    pub fn ranked(&self, limit: usize) -> Vec<&LineTally> {
        let mut ranked: Vec<&LineTally> = self.tallies.iter().collect();
        // Stable sort keeps first-seen order among equal counts.
        ranked.sort_by(|a, b| b.count.cmp(&a.count));
        ranked.truncate(limit);
        ranked
    }
}

/// Reconciled lines plus the tie-break audit trail.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsensusResult {
    /// Resolved lines in index order.
    pub lines: Vec<String>,
    pub tiebreak_count: usize,
    pub decisions: Vec<TiebreakDecision>,
}

impl ConsensusResult {
    /// Resolved lines joined with `\n`.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

pub struct ConsensusEngine<'a> {
    resolver: TiebreakResolver<'a>,
    progress: Option<&'a ProgressCallback>,
}

impl<'a> ConsensusEngine<'a> {
    pub fn new(resolver: TiebreakResolver<'a>) -> Self {
        Self {
            resolver,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: Option<&'a ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Resolve every line of an already padded response matrix.
    ///
    /// `padded[v]` is voter `v`'s lines; all rows have the same length.
    pub async fn resolve(&self, padded: &[Vec<String>], document: &SourceDocument) -> ConsensusResult {
        let line_count = padded.iter().map(Vec::len).max().unwrap_or(0);
        let mut result = ConsensusResult {
            lines: Vec::with_capacity(line_count),
            ..Default::default()
        };

        for i in 0..line_count {
            let vote = LineVote::collect(padded, i);

            if let Some(winner) = vote.majority() {
                result.lines.push(winner.original.clone());
                continue;
            }

            let options: Vec<String> = vote
                .ranked(MAX_CANDIDATES)
                .into_iter()
                .map(|t| t.original.clone())
                .collect();
            debug!(
                "Line {}: no majority among {} values, escalating {} options",
                i + 1,
                vote.tallies().len(),
                options.len()
            );

            let chosen = self
                .resolver
                .resolve(i, &result.lines, &options, document)
                .await;

            if let Some(cb) = self.progress {
                cb.on_tiebreak(i, options.len(), chosen);
            }

            result.lines.push(options[chosen].clone());
            result.tiebreak_count += 1;
            result.decisions.push(TiebreakDecision {
                line_index: i,
                options,
                chosen,
            });
        }

        info!(
            "Consensus: {} lines resolved, {} tie-breaks",
            result.lines.len(),
            result.tiebreak_count
        );
        result
    }
}
