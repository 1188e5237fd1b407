//! Pipeline stages for PDF-to-LaTeX reconciliation and compilation.
//!
//! Each submodule implements exactly one step. Stages receive the immutable
//! [`crate::config::ConversionConfig`] and a [`generation::GenerationClient`]
//! by reference when they are constructed and hold no other state.
//!
//! ## Data Flow
//!
//! ```text
//!                 ┌─ voter 1 ─┐
//! input ──▶ doc ──┼─ voter … ─┼──▶ consensus ──▶ repair ──▶ LaTeX
//!                 └─ voter N ─┘        │
//!                                  tiebreak
//!
//! LaTeX ──▶ cascade (raw ▶ placeholder ▶ emergency) ──▶ PDF
//! ```
//!
//! 1. [`input`]      — resolve a path or URL to a [`input::SourceDocument`]
//! 2. [`voter`]      — N concurrent generations, each retried independently
//! 3. [`consensus`]  — line-by-line majority vote
//! 4. [`tiebreak`]   — judge call for lines without a majority
//! 5. [`repair`]     — validation call, then a correction call if needed
//! 6. [`cascade`]    — three-tier compilation via [`compile`] and [`placeholder`]
//!
//! Large PDFs can take the [`chunked`] path instead of step 2–4: pages are
//! rasterised by [`render`], encoded by [`encode`] and transcribed in block
//! groups. [`postprocess`] holds the text cleanup shared by all stages.

pub mod cascade;
pub mod chunked;
pub mod compile;
pub mod consensus;
pub mod encode;
pub mod generation;
pub mod input;
pub mod placeholder;
pub mod postprocess;
pub mod render;
pub mod repair;
pub mod tiebreak;
pub mod voter;
