//! Error taxonomy for a pipeline run.
//!
//! Every way an upload can fail maps to exactly one variant. Each variant
//! knows the audit status it produces and the generic text a caller may see;
//! the internal `reason` and findings go to the audit record only.

use airlock_ledger::{AuditStatus, LedgerError};
use airlock_scan::Finding;
use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Why an upload was not accepted.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Size, extension or MIME outside policy.
    #[error("policy rejection: {0}")]
    Policy(String),

    /// Missing magic bytes, undecodable structure, resource ceilings.
    #[error("structural rejection: {reason}")]
    Structural {
        reason: String,
        findings: Vec<Finding>,
    },

    /// Critical content or reputation found before sanitization.
    #[error("threat detected: {reason}")]
    Threat {
        reason: String,
        findings: Vec<Finding>,
    },

    /// The authoritative transform failed, timed out, or refused the content.
    #[error("sanitization failed: {reason}")]
    Sanitization {
        reason: String,
        findings: Vec<Finding>,
    },

    /// A critical finding survived sanitization.
    #[error("post-sanitization verification failed: {reason}")]
    PostVerification {
        reason: String,
        findings: Vec<Finding>,
    },

    /// Datastore or filesystem failure. The request fails closed.
    #[error("system failure: {0}")]
    System(String),
}

impl PipelineError {
    pub fn structural(reason: impl Into<String>) -> Self {
        Self::Structural {
            reason: reason.into(),
            findings: Vec::new(),
        }
    }

    pub fn sanitization(reason: impl Into<String>) -> Self {
        Self::Sanitization {
            reason: reason.into(),
            findings: Vec::new(),
        }
    }

    pub fn post_verification(reason: impl Into<String>) -> Self {
        Self::PostVerification {
            reason: reason.into(),
            findings: Vec::new(),
        }
    }

    /// Short category label for logs and audit reasons.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Policy(_) => "policy",
            PipelineError::Structural { .. } => "structural",
            PipelineError::Threat { .. } => "threat",
            PipelineError::Sanitization { .. } => "sanitization",
            PipelineError::PostVerification { .. } => "post-verification",
            PipelineError::System(_) => "system",
        }
    }

    /// Generic caller-facing text. Never contains tool output or paths.
    pub fn public_message(&self) -> &'static str {
        match self {
            PipelineError::Policy(_) => "File rejected by upload policy",
            PipelineError::Structural { .. } => "File structure is invalid or unsupported",
            PipelineError::Threat { .. } => "File contains disallowed content",
            PipelineError::Sanitization { .. } => "File could not be sanitized",
            PipelineError::PostVerification { .. } => "File failed security verification",
            PipelineError::System(_) => "Internal error; upload not accepted",
        }
    }

    /// Audit status this failure closes the record with.
    pub fn audit_status(&self) -> AuditStatus {
        match self {
            PipelineError::System(_) => AuditStatus::Error,
            _ => AuditStatus::Rejected,
        }
    }

    /// Findings carried by the failure.
    pub fn findings(&self) -> &[Finding] {
        match self {
            PipelineError::Structural { findings, .. }
            | PipelineError::Threat { findings, .. }
            | PipelineError::Sanitization { findings, .. }
            | PipelineError::PostVerification { findings, .. } => findings,
            PipelineError::Policy(_) | PipelineError::System(_) => &[],
        }
    }

    /// True when the failure proves hostile content in the original bytes.
    pub fn is_threat(&self) -> bool {
        matches!(
            self,
            PipelineError::Threat { .. } | PipelineError::PostVerification { .. }
        )
    }
}

impl From<LedgerError> for PipelineError {
    fn from(e: LedgerError) -> Self {
        PipelineError::System(e.to_string())
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::System(e.to_string())
    }
}
