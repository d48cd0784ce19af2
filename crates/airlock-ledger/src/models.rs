//! Records kept by the ledger.
//!
//! Everything here is stored as JSON in sled trees, so every type derives the
//! Serde traits and timestamps are UTC.

use airlock_scan::Finding;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// Final (or in-flight) state of one upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Processing,
    Sanitized,
    Rejected,
    Error,
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AuditStatus::Processing => "processing",
            AuditStatus::Sanitized => "sanitized",
            AuditStatus::Rejected => "rejected",
            AuditStatus::Error => "error",
        };
        f.write_str(label)
    }
}

/// One audit record per upload, opened at entry and closed at exit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub request_id: String,
    pub client_id: String,
    pub original_filename: String,
    pub status: AuditStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_mime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    #[serde(default)]
    pub findings: Vec<Finding>,
    /// Declared size at entry; stored artifact size after acceptance.
    pub file_size: u64,
    /// Hash of the stored (sanitized) artifact, if one was produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_hash: Option<String>,
    /// Internal reason for a rejection or error. Never shown to callers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Fields written when an audit record is closed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AuditClose {
    pub status: Option<AuditStatus>,
    pub detected_mime: Option<String>,
    pub engine: Option<String>,
    pub findings: Vec<Finding>,
    pub file_size: Option<u64>,
    pub file_hash: Option<String>,
    pub reason: Option<String>,
}

/// Prior judgement of a hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReputationStatus {
    Safe,
    Malicious,
    #[default]
    Unknown,
}

/// Reputation of one SHA-256 hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReputationEntry {
    pub hash: String,
    pub status: ReputationStatus,
    #[serde(default)]
    pub findings: Vec<Finding>,
    pub detection_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_seen: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

impl ReputationEntry {
    /// The entry for a hash never seen before.
    pub fn unknown(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            status: ReputationStatus::Unknown,
            findings: Vec::new(),
            detection_count: 0,
            first_seen: None,
            last_seen: None,
        }
    }

    pub fn is_malicious(&self) -> bool {
        self.status == ReputationStatus::Malicious
    }
}

/// A validated CSV row waiting for the batch decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedRow {
    /// 1-based data row number (the header is row 0).
    pub row_number: usize,
    pub original: Vec<String>,
    pub sanitized: Vec<String>,
}

/// Registry entry for an accepted artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Opaque id: 32 lowercase hex characters.
    pub id: String,
    pub mime: String,
    pub extension: String,
    pub size: u64,
    /// SHA-256 of the stored bytes.
    pub sha256: String,
    /// Kept for the audit trail only; never used to build a path or header.
    pub original_filename: String,
    pub engine: String,
    pub created_at: DateTime<Utc>,
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Errors that can occur in ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The embedded database failed.
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    /// A stored record could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A storage area could not be read or written.
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An artifact id is not 32 lowercase hex characters.
    #[error("Invalid artifact id")]
    InvalidArtifactId,

    /// A record that must exist does not.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A write-once record already exists.
    #[error("Record already exists: {0}")]
    AlreadyExists(String),
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_string(&AuditStatus::Sanitized).unwrap(), "\"sanitized\"");
        assert_eq!(
            serde_json::to_string(&ReputationStatus::Malicious).unwrap(),
            "\"malicious\""
        );
    }

    #[test]
    fn test_unknown_reputation_default() {
        let entry = ReputationEntry::unknown("ab");
        assert_eq!(entry.status, ReputationStatus::Unknown);
        assert_eq!(entry.detection_count, 0);
        assert!(!entry.is_malicious());
    }
}
