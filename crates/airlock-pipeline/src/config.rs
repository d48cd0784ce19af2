//! Per-format pipeline configuration.

use std::time::Duration;

use airlock_scan::image::ImageLimits;
use airlock_scan::{FormulaPolicy, StructureLimits, DEFAULT_FORMULA_TRIGGERS};
use serde::{Deserialize, Serialize};

const MIB: u64 = 1024 * 1024;

/// CSV pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvConfig {
    /// Smallest accepted file in bytes.
    pub min_bytes: u64,

    /// Largest accepted file in bytes.
    pub max_bytes: u64,

    /// Data rows processed; rows past this are ignored, not failed.
    pub max_rows: usize,

    /// Header width ceiling.
    pub max_columns: usize,

    /// Longest accepted record in bytes. Exceeding it stops parsing.
    pub max_line_length: usize,

    /// Row error messages kept for the audit record.
    pub max_errors: usize,

    /// Leading characters treated as formula triggers.
    pub formula_triggers: Vec<char>,

    /// What to do with a triggering cell.
    pub formula_policy: FormulaPolicy,

    /// Sniffed MIME types accepted at ingress.
    pub allowed_mimes: Vec<String>,

    /// Column checks applied to every data row.
    pub rules: Vec<RuleSpec>,
}

impl Default for CsvConfig {
    fn default() -> Self {
        Self {
            min_bytes: 10,
            max_bytes: 5 * MIB,
            max_rows: 10_000,
            max_columns: 50,
            max_line_length: 50_000,
            max_errors: 50,
            formula_triggers: DEFAULT_FORMULA_TRIGGERS.to_vec(),
            formula_policy: FormulaPolicy::Reject,
            allowed_mimes: vec![
                "text/csv".to_string(),
                "text/plain".to_string(),
                "application/csv".to_string(),
            ],
            rules: vec![
                RuleSpec::new("salary", RuleKind::NonNegativeNumber),
                RuleSpec::new("email", RuleKind::Email),
            ],
        }
    }
}

/// A business rule bound to a column name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub column: String,
    pub rule: RuleKind,
}

impl RuleSpec {
    pub fn new(column: impl Into<String>, rule: RuleKind) -> Self {
        Self {
            column: column.into(),
            rule,
        }
    }
}

/// Built-in column predicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RuleKind {
    /// Numeric values must be >= 0; non-numeric values pass.
    NonNegativeNumber,
    /// Must look like `local@domain.tld`.
    Email,
    /// At most `max` characters.
    MaxLength { max: usize },
    /// Must not be empty.
    Required,
}

/// PDF pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PdfConfig {
    pub min_bytes: u64,
    pub max_bytes: u64,
    pub max_objects: usize,
    pub max_streams: usize,
    pub max_pages: usize,
    /// Semantic walk depth cap.
    pub max_depth: usize,
    /// Wall-clock budget per tool invocation.
    pub timeout_secs: u64,
    /// qpdf exit code meaning "succeeded with warnings".
    pub warnings_exit_code: i32,
    /// Rebuild from rendered pages when the linearized output fails
    /// verification.
    pub flatten_fallback: bool,
}

impl Default for PdfConfig {
    fn default() -> Self {
        let limits = StructureLimits::default();
        Self {
            min_bytes: 100,
            max_bytes: 10 * MIB,
            max_objects: limits.max_objects,
            max_streams: limits.max_streams,
            max_pages: limits.max_pages,
            max_depth: limits.max_depth,
            timeout_secs: 5,
            warnings_exit_code: airlock_sandbox::QPDF_WARNINGS_EXIT,
            flatten_fallback: false,
        }
    }
}

impl PdfConfig {
    pub fn limits(&self) -> StructureLimits {
        StructureLimits {
            max_objects: self.max_objects,
            max_streams: self.max_streams,
            max_pages: self.max_pages,
            max_depth: self.max_depth,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Which decoder re-encodes images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageBackend {
    /// In-process `image` crate decoder with allocation limits.
    #[default]
    Native,
    /// `vips copy` through the process sandbox.
    Vips,
}

/// Image pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub min_bytes: u64,
    pub max_bytes: u64,
    pub max_width: u32,
    pub max_height: u32,
    pub max_pixels: u64,
    pub timeout_secs: u64,
    pub backend: ImageBackend,
    pub allowed_mimes: Vec<String>,
}

impl Default for ImageConfig {
    fn default() -> Self {
        let limits = ImageLimits::default();
        Self {
            min_bytes: 100,
            max_bytes: limits.max_bytes,
            max_width: limits.max_width,
            max_height: limits.max_height,
            max_pixels: limits.max_pixels,
            timeout_secs: 10,
            backend: ImageBackend::Native,
            allowed_mimes: vec![
                "image/jpeg".to_string(),
                "image/png".to_string(),
                "image/gif".to_string(),
                "image/webp".to_string(),
            ],
        }
    }
}

impl ImageConfig {
    pub fn limits(&self) -> ImageLimits {
        ImageLimits {
            max_width: self.max_width,
            max_height: self.max_height,
            max_pixels: self.max_pixels,
            max_bytes: self.max_bytes,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_policy_constants() {
        let csv = CsvConfig::default();
        assert_eq!(csv.max_bytes, 5 * 1024 * 1024);
        assert_eq!(csv.max_rows, 10_000);
        assert_eq!(csv.formula_policy, FormulaPolicy::Reject);
        assert_eq!(csv.formula_triggers.len(), 7);

        let pdf = PdfConfig::default();
        assert_eq!(pdf.max_bytes, 10 * 1024 * 1024);
        assert_eq!(pdf.timeout(), Duration::from_secs(5));
        assert!(!pdf.flatten_fallback);

        let image = ImageConfig::default();
        assert_eq!(image.max_pixels, 10_000_000);
        assert_eq!(image.backend, ImageBackend::Native);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let csv: CsvConfig = serde_json::from_str(r#"{"max_rows": 5, "formula_policy": "neutralize"}"#).unwrap();
        assert_eq!(csv.max_rows, 5);
        assert_eq!(csv.formula_policy, FormulaPolicy::Neutralize);
        assert_eq!(csv.max_columns, 50);
    }

    #[test]
    fn test_rule_spec_shape() {
        let rule: RuleSpec =
            serde_json::from_str(r#"{"column": "name", "rule": {"kind": "max_length", "max": 8}}"#)
                .unwrap();
        assert_eq!(rule.rule, RuleKind::MaxLength { max: 8 });
    }
}
