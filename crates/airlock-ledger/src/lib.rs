//! # Airlock Ledger - Persistence Collaborators
//!
//! Everything Airlock remembers between requests:
//!
//! | Concern | Type | Backing |
//! |---------|------|---------|
//! | Audit trail | [`AuditRecord`] via [`Datastore`] | sled tree `audit` |
//! | Hash reputation | [`ReputationEntry`] via [`Datastore`] | sled tree `reputation` |
//! | Admission control | [`Datastore::rate_limit_check_and_record`] | sled tree `rate_limits` |
//! | CSV imports | [`StagedRow`] via [`Datastore::commit_rows`] | sled tree `csv_rows` |
//! | Artifact registry | [`ArtifactRecord`] via [`Datastore`] | sled tree `artifacts` |
//! | Quarantine / final files | [`ArtifactStore`] | filesystem |
//!
//! ## Security Notes
//!
//! - Both storage areas should sit outside any web-served directory.
//! - Reputation is keyed by SHA-256; a `malicious` status is never
//!   downgraded by a later `safe` write.
//! - Audit records are write-once: opened as `processing`, closed exactly once.

pub mod artifacts;
pub mod datastore;
pub mod models;

pub use artifacts::{discard, generate_token, is_valid_token, ArtifactStore, StoredArtifact};
pub use datastore::{Datastore, LedgerStats, SledDatastore};
pub use models::{
    sha256_hex, ArtifactRecord, AuditClose, AuditRecord, AuditStatus, LedgerError,
    ReputationEntry, ReputationStatus, Result, StagedRow,
};
