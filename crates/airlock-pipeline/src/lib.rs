//! # Airlock Pipeline - Format Engines
//!
//! One [`Pipeline`] per accepted format. Each follows the same contract:
//! checks produce [`Finding`](airlock_scan::Finding) signals, one
//! authoritative transform rewrites the file, and the rewritten file is
//! checked again before anything is accepted.
//!
//! | Engine | Signals | Authority | Post-check |
//! |--------|---------|-----------|------------|
//! | [`CsvPipeline`] | binary signatures | row filter (encoding, formula, rules) | re-parse and rescan |
//! | [`PdfPipeline`] | header, reputation, qpdf object graph | `qpdf --linearize` | object graph rescan |
//! | [`ImagePipeline`] | magic, header dimensions, payload markers | decode and re-encode | magic, dimensions, frames, decode |
//!
//! Failures are [`PipelineError`] variants; each maps to an audit status and
//! a generic caller-facing message.

pub mod config;
pub mod engines;
pub mod error;
pub mod pipeline;

pub use config::{CsvConfig, ImageBackend, ImageConfig, PdfConfig, RuleKind, RuleSpec};
pub use engines::{BusinessRule, CellPredicate, CsvPipeline, ImagePipeline, PdfPipeline};
pub use error::{PipelineError, Result};
pub use pipeline::{Engine, Feature, Pipeline, Sanitized, StagedUpload};
