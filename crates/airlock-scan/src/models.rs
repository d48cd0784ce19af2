//! # Core Types for the Signal Layer
//!
//! This module defines the finding taxonomy shared by every check in Airlock.
//! A [`Finding`] is a *signal*, not a verdict: it records what a check observed,
//! how bad it is, and where it was seen. Only the pipelines decide which
//! findings are promoted to a rejection.
//!
//! ## Design Principles
//!
//! 1. **Exhaustive Classification** - every observation maps to a [`Category`]
//! 2. **Ordered Severity** - [`Severity`] is `Ord`, so "worst finding" is a `max()`
//! 3. **Located** - findings carry an optional [`Location`] (object id, cell, pattern)
//! 4. **Serializable** - everything derives Serde traits for the audit trail

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// How serious a finding is.
///
/// Ordered from least to most severe so that collections can be reduced with
/// `max()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Observation worth recording; never affects the decision.
    Info,
    /// Anomaly that corroborates other evidence but is not fatal alone.
    Suspicious,
    /// Genuine threat indicator.
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Suspicious => write!(f, "SUSPICIOUS"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Which class of check produced a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// File structure: headers, trailers, object graphs, resource ceilings.
    Structural,
    /// Embedded content: signatures, keywords, payload markers.
    Content,
    /// Text encoding: invalid UTF-8, overlong sequences, UTF-7 escapes.
    Encoding,
    /// Image geometry: width, height, pixel count, frames.
    Dimension,
    /// Prior judgement of the same bytes.
    Reputation,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Category::Structural => "structural",
            Category::Content => "content",
            Category::Encoding => "encoding",
            Category::Dimension => "dimension",
            Category::Reputation => "reputation",
        };
        f.write_str(label)
    }
}

/// Where in the file a finding was observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Location {
    /// A PDF object, e.g. `"12 0 R"`.
    Object { id: String },
    /// A CSV cell (1-based data row number, header name).
    Cell { row: usize, column: String },
    /// A whole CSV row (1-based data row number).
    Row { row: usize },
    /// A named signature or regex that matched.
    Pattern { name: String },
    /// A byte offset in the raw stream.
    Offset { offset: usize },
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Object { id } => write!(f, "object {}", id),
            Location::Cell { row, column } => write!(f, "row {} column '{}'", row, column),
            Location::Row { row } => write!(f, "row {}", row),
            Location::Pattern { name } => write!(f, "pattern {}", name),
            Location::Offset { offset } => write!(f, "offset {}", offset),
        }
    }
}

/// A single observation made by a check.
///
/// # Example
///
/// ```rust
/// use airlock_scan::{Category, Finding, Location, Severity};
///
/// let finding = Finding::critical(Category::Content, "Automatic action on open")
///     .at(Location::Object { id: "4 0 R".to_string() });
/// assert_eq!(finding.severity, Severity::Critical);
/// assert!(finding.is_critical());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// Class of check that produced this finding.
    pub category: Category,
    /// How serious it is.
    pub severity: Severity,
    /// Human-readable description (internal; goes to the audit trail).
    pub description: String,
    /// Where it was observed, if meaningful.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

impl Finding {
    /// Creates a finding with no location.
    pub fn new(category: Category, severity: Severity, description: impl Into<String>) -> Self {
        Self {
            category,
            severity,
            description: description.into(),
            location: None,
        }
    }

    /// Creates a critical finding.
    pub fn critical(category: Category, description: impl Into<String>) -> Self {
        Self::new(category, Severity::Critical, description)
    }

    /// Creates a suspicious finding.
    pub fn suspicious(category: Category, description: impl Into<String>) -> Self {
        Self::new(category, Severity::Suspicious, description)
    }

    /// Creates an informational finding.
    pub fn info(category: Category, description: impl Into<String>) -> Self {
        Self::new(category, Severity::Info, description)
    }

    /// Attaches a location.
    pub fn at(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    /// Returns true if this finding is critical.
    #[inline]
    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.severity, self.category, self.description)?;
        if let Some(location) = &self.location {
            write!(f, " ({})", location)?;
        }
        Ok(())
    }
}

/// Returns true if any finding in the slice is critical.
pub fn has_critical(findings: &[Finding]) -> bool {
    findings.iter().any(Finding::is_critical)
}

/// Returns the highest severity in the slice, if any.
pub fn worst_severity(findings: &[Finding]) -> Option<Severity> {
    findings.iter().map(|f| f.severity).max()
}

/// Errors raised by checks that must decode something before they can judge it.
///
/// A `ScanError` is never a finding: it means the check could not run at all,
/// which the pipelines treat as a structural rejection (decode-or-die).
#[derive(Debug, Error)]
pub enum ScanError {
    /// The structure dump was not a recognizable object graph.
    #[error("Unrecognized object graph: {0}")]
    InvalidGraph(String),

    /// The image header could not be decoded.
    #[error("Unreadable image header: {0}")]
    ImageHeader(String),

    /// The CSV header row is missing or unusable.
    #[error("Invalid CSV header: {0}")]
    CsvHeader(String),
}
