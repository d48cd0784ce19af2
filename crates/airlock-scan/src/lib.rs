//! # Airlock Scan - Signal Layer
//!
//! Every check Airlock runs *before* and *after* sanitization lives here. The
//! checks are pure functions over bytes or decoded structures: no I/O, no
//! external tools, no datastore. They produce [`Finding`]s, which are signals,
//! and the pipelines decide which signals become rejections.
//!
//! ## Threat Model
//!
//! | Threat | Example | Check |
//! |--------|---------|-------|
//! | Type confusion | `invoice.pdf` that is a PE executable | [`magic::sniff_mime`] |
//! | Polyglot payload | PHP appended to a CSV past the first 8 KiB | [`signatures::binary_signature_scan`] |
//! | Encoding bypass | Overlong `<`, UTF-7 `+ADw-` | [`encoding::validate_and_normalize`] |
//! | Formula injection | `=cmd\|' /C calc'!A0` in a cell | [`formula::FormulaGuard`] |
//! | PDF active content | `/OpenAction` → `/Launch` | [`pdf::SemanticScanner`] |
//! | PDF bombs | 10^6 objects, deep nesting | [`pdf::StructureReport`] |
//! | Hidden revisions | Incremental update over a clean first layer | [`pdf::StructureReport`] |
//! | Decompression bombs | 60000×60000 PNG | [`image::dimension_findings`] |
//! | Image-borne scripts | `<script>` in a JPEG comment | [`signatures::image_payload_scan`] |
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         SIGNAL LAYER                         │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌────────────┐  ┌────────────┐  ┌────────────────────────┐  │
//! │  │   MAGIC    │  │ SIGNATURES │  │       ENCODING         │  │
//! │  │  infer +   │  │ Aho-Corasick│ │ UTF-8 / overlong /     │  │
//! │  │  text sniff│  │ + regexes  │  │ UTF-7 / NFC            │  │
//! │  └────────────┘  └────────────┘  └────────────────────────┘  │
//! │  ┌────────────┐  ┌────────────┐  ┌────────────────────────┐  │
//! │  │  FORMULA   │  │    PDF     │  │        IMAGE           │  │
//! │  │   GUARD    │  │ structure +│  │ header dimensions +    │  │
//! │  │            │  │ semantics  │  │ animation markers      │  │
//! │  └────────────┘  └────────────┘  └────────────────────────┘  │
//! │                         │                                    │
//! │                         ▼                                    │
//! │                 Vec<Finding> (signals)                       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use airlock_scan::{has_critical, signatures};
//!
//! let findings = signatures::binary_signature_scan(b"name\n\x7fELF\x02\x01\x01");
//! assert!(has_critical(&findings));
//! ```

pub mod encoding;
pub mod formula;
pub mod image;
pub mod magic;
pub mod models;
pub mod pdf;
pub mod signatures;

pub use encoding::{validate_and_normalize, EncodingIssue};
pub use formula::{FormulaGuard, FormulaHit, FormulaPolicy, DEFAULT_FORMULA_TRIGGERS};
pub use image::ImageLimits;
pub use magic::sniff_mime;
pub use models::{has_critical, worst_severity, Category, Finding, Location, ScanError, Severity};
pub use pdf::{ObjectGraph, SemanticScanner, StructureLimits, StructureReport};
