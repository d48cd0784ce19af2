//! Outcome types returned to the caller surface.

use std::fmt;

use airlock_pipeline::{Engine, PipelineError};
use airlock_scan::{Finding, Severity};
use serde::{Deserialize, Serialize};

/// Final state of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    /// Sanitized, verified and stored.
    Accepted,
    /// Refused by policy, structure, content or verification.
    Rejected,
    /// Refused because Airlock itself failed.
    Error,
}

/// Why an upload was refused. Serialized as a stable kebab-case code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectionKind {
    /// Admission control denied the request.
    RateLimited,
    /// The filename extension is not in the allow-list.
    UnsupportedExtension,
    /// Sniffed content type disagrees with the extension.
    MimeExtensionMismatch,
    /// Size outside the engine's accepted range.
    SizeOutOfBounds,
    /// Other policy refusal from a pipeline.
    Policy,
    /// Undecodable or over-limit structure.
    Structural,
    /// Blocking content or reputation finding before sanitization.
    Threat,
    /// The authoritative transform failed.
    Sanitization,
    /// A critical finding survived sanitization.
    PostVerification,
    /// Datastore or filesystem failure.
    System,
}

impl RejectionKind {
    pub fn code(&self) -> &'static str {
        match self {
            RejectionKind::RateLimited => "rate-limited",
            RejectionKind::UnsupportedExtension => "unsupported-extension",
            RejectionKind::MimeExtensionMismatch => "mime-extension-mismatch",
            RejectionKind::SizeOutOfBounds => "size-out-of-bounds",
            RejectionKind::Policy => "policy",
            RejectionKind::Structural => "structural",
            RejectionKind::Threat => "threat",
            RejectionKind::Sanitization => "sanitization",
            RejectionKind::PostVerification => "post-verification",
            RejectionKind::System => "system",
        }
    }
}

impl From<&PipelineError> for RejectionKind {
    fn from(error: &PipelineError) -> Self {
        match error {
            PipelineError::Policy(_) => RejectionKind::Policy,
            PipelineError::Structural { .. } => RejectionKind::Structural,
            PipelineError::Threat { .. } => RejectionKind::Threat,
            PipelineError::Sanitization { .. } => RejectionKind::Sanitization,
            PipelineError::PostVerification { .. } => RejectionKind::PostVerification,
            PipelineError::System(_) => RejectionKind::System,
        }
    }
}

impl fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Finding counts by severity. Detail stays in the audit record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindingSummary {
    pub info: usize,
    pub suspicious: usize,
    pub critical: usize,
}

impl FindingSummary {
    pub fn of(findings: &[Finding]) -> Self {
        findings.iter().fold(Self::default(), |mut acc, f| {
            match f.severity {
                Severity::Info => acc.info += 1,
                Severity::Suspicious => acc.suspicious += 1,
                Severity::Critical => acc.critical += 1,
            }
            acc
        })
    }

    pub fn total(&self) -> usize {
        self.info + self.suspicious + self.critical
    }
}

/// What the caller learns about an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadOutcome {
    pub request_id: String,
    pub status: UploadStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection: Option<RejectionKind>,
    /// Generic in production mode; includes the internal reason otherwise.
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<Engine>,
    /// Opaque id to fetch the sanitized artifact with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_id: Option<String>,
    /// SHA-256 of the sanitized bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sanitized_hash: Option<String>,
    pub original_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sanitized_size: Option<u64>,
    /// CSV rows committed.
    pub committed_rows: usize,
    pub findings: FindingSummary,
}

impl UploadOutcome {
    /// Returns true if the upload was accepted.
    pub fn is_accepted(&self) -> bool {
        self.status == UploadStatus::Accepted
    }

    /// Returns true if the upload was refused for any reason.
    pub fn is_rejected(&self) -> bool {
        !self.is_accepted()
    }
}
