//! # PDF Structure and Semantics
//!
//! Two analyzers over a PDF that has already been dumped to JSON by an external
//! structure tool (qpdf):
//!
//! - **Structural analysis**: object, stream and page counts from the object
//!   graph, plus incremental-update and trailer checks on the raw bytes. A
//!   linearized file carries a first-page trailer of its own, so its second
//!   `startxref` is not counted as an update.
//! - **Semantic scan**: a bounded recursive walk over every object's decoded
//!   dictionary looking for dangerous keys and action names.
//!
//! Both dump layouts are accepted:
//!
//! ```text
//! v1: { "objects": { "1 0 R": {...}, "trailer": {...} }, "pages": [...] }
//! v2: { "qpdf": [ {header}, { "obj:1 0 R": {"value": {...}},
//!                             "obj:4 0 R": {"stream": {"dict": {...}}},
//!                             "trailer": {"value": {...}} } ],
//!       "pages": [...] }
//! ```
//!
//! Failure to obtain a graph is a [`ScanError`], never a finding: an
//! undecodable PDF cannot be sanitized and is rejected outright.

use std::collections::HashSet;

use serde_json::Value;
use tracing::debug;

use crate::models::{Category, Finding, Location, ScanError, Severity};

/// An entry of the dangerous keyword table.
#[derive(Debug, Clone, Copy)]
pub struct PdfKeyword {
    /// PDF name including the leading slash.
    pub name: &'static str,
    /// What the keyword enables.
    pub description: &'static str,
    /// Severity of a semantic hit.
    pub severity: Severity,
    /// Only a hit when the key's value is an action type name.
    pub requires_action_value: bool,
}

const fn keyword(name: &'static str, description: &'static str, severity: Severity) -> PdfKeyword {
    PdfKeyword {
        name,
        description,
        severity,
        requires_action_value: false,
    }
}

/// Dangerous key and action names.
pub const PDF_KEYWORDS: &[PdfKeyword] = &[
    keyword("/JS", "Embedded JavaScript", Severity::Critical),
    keyword("/JavaScript", "Embedded JavaScript", Severity::Critical),
    keyword("/Action", "Generic Action Dictionary", Severity::Critical),
    keyword("/A", "Short Action Dictionary", Severity::Critical),
    keyword("/OpenAction", "Automatic Action on Open", Severity::Critical),
    keyword("/AA", "Additional Action Trigger", Severity::Critical),
    keyword("/Launch", "External Application Launch", Severity::Critical),
    keyword("/SubmitForm", "Form Data Submission", Severity::Critical),
    keyword("/ImportData", "External Data Import", Severity::Critical),
    keyword("/GoToR", "Remote GoTo Action", Severity::Critical),
    keyword("/GoToE", "Embedded File GoTo Action", Severity::Critical),
    keyword("/URI", "External Hyperlink Action", Severity::Critical),
    keyword("/AcroForm", "Interactive Form Actions", Severity::Critical),
    keyword("/EmbeddedFile", "Embedded File Attachment", Severity::Critical),
    keyword("/RichMedia", "Embedded Flash/Media", Severity::Critical),
    keyword("/Sound", "Embedded Audio Object", Severity::Critical),
    keyword("/Movie", "Embedded Video Object", Severity::Critical),
    keyword("/XFA", "XML Forms Architecture", Severity::Critical),
    PdfKeyword {
        name: "/S",
        description: "Action Subtype Identifier",
        severity: Severity::Critical,
        requires_action_value: true,
    },
    keyword("/Metadata", "Embedded XMP Metadata", Severity::Suspicious),
];

/// Action type names that make an `/S` entry an action subtype.
///
/// `/S` also selects transparency groups and structure roles, which are benign.
const ACTION_TYPES: &[&str] = &[
    "/JavaScript",
    "/Launch",
    "/SubmitForm",
    "/ImportData",
    "/ResetForm",
    "/GoTo",
    "/GoToR",
    "/GoToE",
    "/URI",
    "/Named",
    "/Hide",
    "/Sound",
    "/Movie",
    "/Rendition",
    "/RichMediaExecute",
];

/// Trailing window searched for the `%%EOF` marker.
const EOF_WINDOW: usize = 1024;
/// A linearization dictionary must sit wholly within the first 1024 bytes.
const LINEARIZED_WINDOW: usize = 1024;

/// A single object of the dumped graph.
#[derive(Debug, Clone)]
pub struct PdfObject {
    /// Object reference, e.g. `"12 0 R"`, or `"trailer"`.
    pub id: String,
    /// Decoded value (the stream dictionary for streams).
    pub value: Value,
    /// Whether the object is a stream.
    pub is_stream: bool,
}

/// The decoded object graph of one PDF.
#[derive(Debug, Clone, Default)]
pub struct ObjectGraph {
    /// Every object, the trailer included.
    pub objects: Vec<PdfObject>,
    /// Page count reported by the dump's `pages` array, if present.
    pub declared_pages: Option<usize>,
}

impl ObjectGraph {
    /// Parses a qpdf JSON dump (v1 or v2).
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::InvalidGraph`] if the input is not JSON, has neither
    /// layout, or holds no objects.
    pub fn from_qpdf_json(bytes: &[u8]) -> Result<Self, ScanError> {
        let root: Value = serde_json::from_slice(bytes)
            .map_err(|e| ScanError::InvalidGraph(format!("not JSON: {}", e)))?;

        let mut objects = Vec::new();

        if let Some(sections) = root.get("qpdf").and_then(Value::as_array) {
            let table = sections
                .get(1)
                .and_then(Value::as_object)
                .ok_or_else(|| ScanError::InvalidGraph("missing v2 object table".to_string()))?;
            for (key, entry) in table {
                let id = key.strip_prefix("obj:").unwrap_or(key).to_string();
                if let Some(stream) = entry.get("stream") {
                    let dict = stream.get("dict").cloned().unwrap_or(Value::Null);
                    objects.push(PdfObject { id, value: dict, is_stream: true });
                } else {
                    let value = entry.get("value").cloned().unwrap_or(Value::Null);
                    objects.push(PdfObject { id, value, is_stream: false });
                }
            }
        } else if let Some(table) = root.get("objects").and_then(Value::as_object) {
            for (key, entry) in table {
                match entry.get("stream") {
                    Some(stream) if entry.as_object().map(|o| o.len()) == Some(1) => {
                        let dict = stream.get("dict").cloned().unwrap_or(Value::Null);
                        objects.push(PdfObject { id: key.clone(), value: dict, is_stream: true });
                    }
                    _ => objects.push(PdfObject {
                        id: key.clone(),
                        value: entry.clone(),
                        is_stream: false,
                    }),
                }
            }
        } else {
            return Err(ScanError::InvalidGraph("no object table".to_string()));
        }

        if objects.iter().all(|o| o.id == "trailer") {
            return Err(ScanError::InvalidGraph("object table is empty".to_string()));
        }

        let declared_pages = root.get("pages").and_then(Value::as_array).map(Vec::len);

        Ok(Self { objects, declared_pages })
    }

    /// Number of indirect objects (the trailer is not counted).
    pub fn object_count(&self) -> usize {
        self.objects.iter().filter(|o| o.id != "trailer").count()
    }

    /// Number of stream objects.
    pub fn stream_count(&self) -> usize {
        self.objects.iter().filter(|o| o.is_stream).count()
    }

    /// Number of pages: the dump's page list, else objects typed `/Page`.
    pub fn page_count(&self) -> usize {
        self.declared_pages.unwrap_or_else(|| {
            self.objects
                .iter()
                .filter(|o| o.value.get("/Type").and_then(Value::as_str) == Some("/Page"))
                .count()
        })
    }
}

/// Resource ceilings applied to a PDF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructureLimits {
    pub max_objects: usize,
    pub max_streams: usize,
    pub max_pages: usize,
    pub max_depth: usize,
}

impl Default for StructureLimits {
    fn default() -> Self {
        Self {
            max_objects: 50_000,
            max_streams: 10_000,
            max_pages: 5_000,
            max_depth: 50,
        }
    }
}

/// Counts derived from a graph and its raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StructureReport {
    pub object_count: usize,
    pub stream_count: usize,
    pub page_count: usize,
    /// Revisions appended after the first (`startxref` markers beyond the
    /// one or two the layout itself needs).
    pub incremental_updates: usize,
    pub has_eof_marker: bool,
    pub linearized: bool,
}

impl StructureReport {
    /// Builds the report for `graph` and its source `raw` bytes.
    pub fn new(graph: &ObjectGraph, raw: &[u8]) -> Self {
        let linearized = is_linearized(raw);
        let baseline = if linearized { 2 } else { 1 };
        Self {
            object_count: graph.object_count(),
            stream_count: graph.stream_count(),
            page_count: graph.page_count(),
            incremental_updates: count_startxref(raw).saturating_sub(baseline),
            has_eof_marker: has_eof_marker(raw),
            linearized,
        }
    }

    /// Turns the report into findings against `limits`.
    ///
    /// Ceilings are critical; incremental updates and a missing trailer marker
    /// are suspicious.
    pub fn findings(&self, limits: &StructureLimits) -> Vec<Finding> {
        let mut findings = Vec::new();

        let ceilings = [
            ("Object", self.object_count, limits.max_objects),
            ("Stream", self.stream_count, limits.max_streams),
            ("Page", self.page_count, limits.max_pages),
        ];
        for (what, count, max) in ceilings {
            if count > max {
                findings.push(Finding::critical(
                    Category::Structural,
                    format!("{} count {} exceeds safety threshold {}", what, count, max),
                ));
            }
        }

        if self.incremental_updates > 0 {
            findings.push(Finding::suspicious(
                Category::Structural,
                format!(
                    "Multiple xref sections ({} incremental updates)",
                    self.incremental_updates
                ),
            ));
        }

        if !self.has_eof_marker {
            findings.push(Finding::suspicious(
                Category::Structural,
                "PDF trailer missing or malformed",
            ));
        }

        findings
    }
}

/// Counts `startxref` markers; each revision of a PDF appends one.
pub fn count_startxref(raw: &[u8]) -> usize {
    raw.windows(b"startxref".len())
        .filter(|w| *w == b"startxref")
        .count()
}

/// Checks whether the first object is a linearization dictionary.
pub fn is_linearized(raw: &[u8]) -> bool {
    let head = &raw[..raw.len().min(LINEARIZED_WINDOW)];
    let first_object = head
        .windows(b"endobj".len())
        .position(|w| w == b"endobj")
        .map_or(head, |end| &head[..end]);
    first_object
        .windows(b"/Linearized".len())
        .any(|w| w == b"/Linearized")
}

/// Checks the trailing bytes for a `%%EOF` marker.
pub fn has_eof_marker(raw: &[u8]) -> bool {
    let tail = &raw[raw.len().saturating_sub(EOF_WINDOW)..];
    tail.windows(5).any(|w| w == b"%%EOF")
}

/// Recursive keyword search over a decoded object graph.
#[derive(Debug, Clone)]
pub struct SemanticScanner {
    max_depth: usize,
}

impl SemanticScanner {
    /// Creates a scanner that stops descending at `max_depth`.
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    /// Scans every object in `graph`.
    ///
    /// Each keyword is reported at most once per object. Nesting deeper than
    /// the configured depth is itself a critical structural finding.
    pub fn scan(&self, graph: &ObjectGraph) -> Vec<Finding> {
        let mut findings = Vec::new();
        for object in &graph.objects {
            let mut hits: HashSet<&'static str> = HashSet::new();
            let mut too_deep = false;
            self.walk(&object.value, 0, &mut hits, &mut too_deep);

            for keyword in PDF_KEYWORDS.iter().filter(|k| hits.contains(k.name)) {
                debug!(object = %object.id, keyword = keyword.name, "PDF keyword detected");
                findings.push(
                    Finding::new(
                        Category::Content,
                        keyword.severity,
                        format!("Detected {}: {}", keyword.name, keyword.description),
                    )
                    .at(Location::Object { id: object.id.clone() }),
                );
            }

            if too_deep {
                debug!(object = %object.id, max_depth = self.max_depth, "PDF nesting too deep");
                findings.push(
                    Finding::critical(
                        Category::Structural,
                        format!("Nesting exceeds maximum depth {}", self.max_depth),
                    )
                    .at(Location::Object { id: object.id.clone() }),
                );
            }
        }
        findings
    }

    fn walk(
        &self,
        value: &Value,
        depth: usize,
        hits: &mut HashSet<&'static str>,
        too_deep: &mut bool,
    ) {
        if depth > self.max_depth {
            *too_deep = true;
            return;
        }
        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    if let Some(keyword) = lookup(key) {
                        if !keyword.requires_action_value || is_action_type(child) {
                            hits.insert(keyword.name);
                        }
                    }
                    self.walk(child, depth + 1, hits, too_deep);
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.walk(item, depth + 1, hits, too_deep);
                }
            }
            Value::String(name) => {
                if let Some(keyword) = lookup(name) {
                    if !keyword.requires_action_value {
                        hits.insert(keyword.name);
                    }
                }
            }
            _ => {}
        }
    }
}

impl Default for SemanticScanner {
    fn default() -> Self {
        Self::new(StructureLimits::default().max_depth)
    }
}

fn lookup(name: &str) -> Option<&'static PdfKeyword> {
    PDF_KEYWORDS.iter().find(|k| k.name == name)
}

fn is_action_type(value: &Value) -> bool {
    value
        .as_str()
        .map(|name| ACTION_TYPES.contains(&name))
        .unwrap_or(false)
}
