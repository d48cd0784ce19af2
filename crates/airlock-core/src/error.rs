//! Error types for Airlock Core.
//!
//! Upload failures are not errors here: [`crate::Gateway::process`] always
//! returns an [`crate::UploadOutcome`]. These variants cover setup and
//! artifact delivery.

use thiserror::Error;

/// Core error type for gateway operations.
#[derive(Debug, Error)]
pub enum AirlockError {
    /// Configuration could not be parsed or is inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The requested id is not a well-formed artifact token.
    #[error("Invalid artifact id")]
    InvalidArtifactId,

    /// No accepted artifact has this id.
    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    /// Stored bytes no longer match the registered hash.
    #[error("Artifact integrity check failed: {0}")]
    Integrity(String),

    /// Ledger error passthrough.
    #[error("Ledger error: {0}")]
    Ledger(#[from] airlock_ledger::LedgerError),

    /// Filesystem error passthrough.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
