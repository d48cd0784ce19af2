//! # Airlock Core
//!
//! Upload gateway for untrusted CSV, PDF and image files. Orchestrates the
//! signal layer, the format pipelines and the ledger behind one call.
//!
//! ## Threat Coverage
//!
//! | Layer | Component | Threats Blocked |
//! |-------|-----------|-----------------|
//! | Admission | Rate limit | Upload flooding |
//! | Dispatch | Extension / MIME gate | Polyglots, renamed executables |
//! | Tabular | CSV pipeline | Formula injection, encoding bypasses, embedded binaries |
//! | Document | PDF pipeline | JavaScript, auto-actions, launch actions, incremental-update layering, object bombs |
//! | Raster | Image pipeline | Pixel floods, appended payloads, metadata, animation |
//! | Delivery | Opaque ids + headers | Path traversal, content sniffing, inline execution |
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          AIRLOCK CORE                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │   UploadCandidate ──► ┌─────────────┐ ──► UploadOutcome         │
//! │                       │   Gateway   │                           │
//! │                       └──────┬──────┘                           │
//! │              ┌───────────────┼───────────────┐                  │
//! │              ▼               ▼               ▼                  │
//! │       ┌────────────┐  ┌────────────┐  ┌────────────┐            │
//! │       │    CSV     │  │    PDF     │  │   Image    │            │
//! │       │  pipeline  │  │  pipeline  │  │  pipeline  │            │
//! │       └────────────┘  └─────┬──────┘  └─────┬──────┘            │
//! │                             └──► sandbox ◄──┘                   │
//! │                                                                 │
//! │   ledger: audit · reputation · rate limits · rows · artifacts   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use airlock_core::{AirlockConfig, Gateway, RequestContext, UploadCandidate};
//!
//! let gateway = Gateway::open(AirlockConfig::default())?;
//! let ctx = RequestContext::new(session_id);
//! let outcome = gateway.process(&ctx, UploadCandidate::new(name, bytes)).await;
//! if outcome.is_accepted() {
//!     respond_ok(outcome.artifact_id);
//! } else {
//!     respond_rejected(outcome.message);
//! }
//! ```
//!
//! ## Security Notes
//!
//! - Client filename and content type are never trusted; content is sniffed
//! - Nothing reaches final storage without sanitization and post-verification
//! - Every upload produces exactly one audit record
//! - Fail-closed: any internal error rejects the upload

mod config;
mod context;
mod delivery;
mod error;
mod gateway;
mod verdict;

pub use config::{AirlockConfig, GatewayConfig, StorageConfig};
pub use context::{RequestContext, UploadCandidate};
pub use delivery::Delivery;
pub use error::AirlockError;
pub use gateway::Gateway;
pub use verdict::{FindingSummary, RejectionKind, UploadOutcome, UploadStatus};

// Re-export component types for convenience
pub use airlock_ledger::{AuditRecord, AuditStatus, Datastore, SledDatastore};
pub use airlock_pipeline::{BusinessRule, Engine, Feature, ImageBackend};
pub use airlock_sandbox::{CommandSandbox, ProcessSandbox};
pub use airlock_scan::{Category, Finding, FormulaPolicy, Severity};

/// Core result type for gateway operations.
pub type Result<T> = std::result::Result<T, AirlockError>;
