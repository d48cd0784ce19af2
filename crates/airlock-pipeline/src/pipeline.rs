//! The capability interface every format pipeline implements.
//!
//! A run is driven by the gateway in this order:
//!
//! ```text
//! validate ──► (blocking findings?) ──► sanitize ──► verify ──► commit
//!  signals        reject, no sanitize    authority    critical
//!                                                     = reject
//!                                          │
//!                                          └─ fallback (optional) ─► verify
//! ```

use std::fmt;
use std::path::PathBuf;

use airlock_ledger::{ArtifactStore, StagedRow};
use airlock_scan::{Category, Finding};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// The three format engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Csv,
    Pdf,
    Image,
}

impl Engine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::Csv => "csv",
            Engine::Pdf => "pdf",
            Engine::Image => "image",
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An upload that passed dispatch and sits in quarantine.
#[derive(Debug, Clone)]
pub struct StagedUpload {
    pub request_id: String,
    pub original_filename: String,
    /// Lowercased extension from the allow-list.
    pub extension: String,
    /// MIME sniffed from content.
    pub sniffed_mime: String,
    /// Quarantine copy of the raw bytes.
    pub path: PathBuf,
    pub bytes: Vec<u8>,
    /// SHA-256 of the raw bytes (used for reputation lookups only).
    pub sha256: String,
}

/// Output of the authoritative transform.
#[derive(Debug, Clone, Default)]
pub struct Sanitized {
    /// Sanitized file in quarantine.
    pub output_path: PathBuf,
    /// Extension the artifact is stored under.
    pub extension: String,
    /// MIME the artifact is served as.
    pub mime: String,
    /// Informational notes for the audit record.
    pub notes: Vec<Finding>,
    /// CSV only: header of the staged rows.
    pub headers: Vec<String>,
    /// CSV only: rows awaiting commit.
    pub staged_rows: Vec<StagedRow>,
    /// Extra scratch paths to discard when the run ends.
    pub scratch: Vec<PathBuf>,
}

/// One entry of [`Pipeline::features`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Feature {
    pub name: &'static str,
    pub description: &'static str,
}

impl Feature {
    pub const fn new(name: &'static str, description: &'static str) -> Self {
        Self { name, description }
    }
}

/// A format pipeline: signals, authority, verification.
#[async_trait]
pub trait Pipeline: Send + Sync {
    fn engine(&self) -> Engine;

    /// Accepted size range in bytes, inclusive.
    fn size_bounds(&self) -> (u64, u64);

    /// Whether a sniffed MIME type may enter this pipeline.
    fn accepts_mime(&self, mime: &str) -> bool;

    /// Whether a pre-sanitize finding stops the run before sanitization.
    ///
    /// By default critical structural and reputation findings block; critical
    /// content is left for post-verification to judge.
    fn blocks(&self, finding: &Finding) -> bool {
        finding.is_critical()
            && matches!(finding.category, Category::Structural | Category::Reputation)
    }

    /// Gathers signals about the raw upload.
    ///
    /// # Errors
    ///
    /// Returns an error only for hard gates (missing magic bytes, undecodable
    /// structure). Everything else is a finding.
    async fn validate(&self, upload: &StagedUpload) -> Result<Vec<Finding>>;

    /// Runs the authoritative transform into the quarantine area.
    async fn sanitize(&self, upload: &StagedUpload, store: &ArtifactStore) -> Result<Sanitized>;

    /// Re-checks the sanitized output. Any critical finding is fatal.
    ///
    /// # Errors
    ///
    /// Returns an error when the output cannot be decoded at all.
    async fn verify(&self, sanitized: &Sanitized) -> Result<Vec<Finding>>;

    /// Second-tier transform tried when verification fails. `None` when the
    /// pipeline has no fallback.
    async fn fallback(
        &self,
        _upload: &StagedUpload,
        _store: &ArtifactStore,
    ) -> Option<Result<Sanitized>> {
        None
    }

    /// Persists side effects of an accepted run. Returns rows committed.
    async fn commit(&self, _upload: &StagedUpload, _sanitized: &Sanitized) -> Result<usize> {
        Ok(0)
    }

    /// Protections this pipeline applies, for the caller surface.
    fn features(&self) -> Vec<Feature>;
}
