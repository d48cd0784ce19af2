//! CSV pipeline: content scan, row filter, fail-closed batch commit.
//!
//! ```text
//! Ingress ─► ContentScan ─► RowLoop{Encoding ─► Formula ─► BusinessRules} ─► Commit | Rollback
//! ```
//!
//! The row filter is the sanitizer. It re-serializes every accepted row in
//! NFC, and a single bad row anywhere rejects the whole batch: nothing is
//! committed and the staged rows are dropped.

use std::fmt;
use std::sync::{Arc, LazyLock};

use airlock_ledger::{ArtifactStore, Datastore, StagedRow};
use airlock_scan::signatures::binary_signature_scan;
use airlock_scan::{
    validate_and_normalize, Category, Finding, FormulaGuard, FormulaPolicy, Location,
};
use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::config::{CsvConfig, RuleKind};
use crate::error::{PipelineError, Result};
use crate::pipeline::{Engine, Feature, Pipeline, Sanitized, StagedUpload};

static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static email regex"));

const UTF8_BOM: char = '\u{FEFF}';

/// Predicate over a single normalized cell.
pub type CellPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// A column check. Rules whose column is absent from the header are skipped.
#[derive(Clone)]
pub struct BusinessRule {
    column: String,
    name: String,
    check: RuleCheck,
}

#[derive(Clone)]
enum RuleCheck {
    Builtin(RuleKind),
    Custom(CellPredicate),
}

impl fmt::Debug for BusinessRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusinessRule")
            .field("column", &self.column)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl BusinessRule {
    pub fn builtin(column: impl Into<String>, kind: RuleKind) -> Self {
        let name = match &kind {
            RuleKind::NonNegativeNumber => "must not be negative".to_string(),
            RuleKind::Email => "invalid email format".to_string(),
            RuleKind::MaxLength { max } => format!("longer than {} characters", max),
            RuleKind::Required => "must not be empty".to_string(),
        };
        Self {
            column: column.into(),
            name,
            check: RuleCheck::Builtin(kind),
        }
    }

    pub fn custom(column: impl Into<String>, name: impl Into<String>, predicate: CellPredicate) -> Self {
        Self {
            column: column.into(),
            name: name.into(),
            check: RuleCheck::Custom(predicate),
        }
    }

    fn passes(&self, value: &str) -> bool {
        match &self.check {
            RuleCheck::Builtin(RuleKind::NonNegativeNumber) => value
                .trim()
                .parse::<f64>()
                .map(|n| n >= 0.0)
                .unwrap_or(true),
            RuleCheck::Builtin(RuleKind::Email) => EMAIL.is_match(value),
            RuleCheck::Builtin(RuleKind::MaxLength { max }) => value.chars().count() <= *max,
            RuleCheck::Builtin(RuleKind::Required) => !value.trim().is_empty(),
            RuleCheck::Custom(predicate) => predicate(value),
        }
    }
}

/// What the row filter produced.
#[derive(Debug, Default)]
struct RowReport {
    headers: Vec<String>,
    rows: Vec<StagedRow>,
    /// Every error, including those past the message cap.
    error_count: usize,
    /// Capped error findings.
    errors: Vec<Finding>,
    neutralized: usize,
    truncated: bool,
}

impl RowReport {
    fn error(&mut self, finding: Finding, cap: usize) {
        self.error_count += 1;
        if self.errors.len() < cap {
            self.errors.push(finding);
        }
    }
}

/// The CSV pipeline.
pub struct CsvPipeline {
    config: CsvConfig,
    guard: FormulaGuard,
    rules: Vec<BusinessRule>,
    datastore: Arc<dyn Datastore>,
}

impl CsvPipeline {
    pub fn new(config: CsvConfig, datastore: Arc<dyn Datastore>) -> Self {
        let guard = FormulaGuard::new(config.formula_triggers.clone(), config.formula_policy);
        let rules = config
            .rules
            .iter()
            .map(|spec| BusinessRule::builtin(spec.column.clone(), spec.rule.clone()))
            .collect();
        Self {
            config,
            guard,
            rules,
            datastore,
        }
    }

    /// Adds a custom business rule.
    pub fn with_rule(mut self, rule: BusinessRule) -> Self {
        self.rules.push(rule);
        self
    }

    fn filter_rows(&self, bytes: &[u8]) -> Result<RowReport> {
        let cap = self.config.max_errors;
        let max_line = self.config.max_line_length;

        // The reader only ever sees records that fit the line limit.
        let oversized = oversized_record(bytes, max_line);
        let parsed = match oversized {
            Some((0, _)) => {
                return Err(PipelineError::structural(format!(
                    "Header exceeds maximum line length {}",
                    max_line
                )))
            }
            Some((_, start)) => &bytes[..start],
            None => bytes,
        };

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(parsed);
        let mut records = reader.byte_records();

        let header = match records.next() {
            Some(Ok(record)) => record,
            Some(Err(e)) => return Err(PipelineError::structural(format!("Unreadable header: {}", e))),
            None => return Err(PipelineError::structural("Empty CSV file")),
        };
        if header.len() > self.config.max_columns {
            return Err(PipelineError::structural(format!(
                "Header has {} columns, maximum is {}",
                header.len(),
                self.config.max_columns
            )));
        }

        let mut report = RowReport::default();
        let mut headers = Vec::with_capacity(header.len());
        for (index, raw) in header.iter().enumerate() {
            let mut name = validate_and_normalize(raw).map_err(|issue| {
                PipelineError::structural(format!("Invalid header column {}: {}", index + 1, issue))
            })?;
            if index == 0 {
                name = name.trim_start_matches(UTF8_BOM).to_string();
            }
            headers.push(name);
        }
        if headers.iter().all(|h| h.trim().is_empty()) {
            return Err(PipelineError::structural("Header row is empty"));
        }
        match self.guard.apply(&mut headers) {
            Ok(n) => report.neutralized += n,
            Err(hit) => report.error(
                Finding::critical(
                    Category::Content,
                    format!("Header: formula injection, cell starts with {:?}", hit.trigger),
                )
                .at(Location::Row { row: 0 }),
                cap,
            ),
        }

        let mut stopped = false;
        'rows: for (index, result) in records.enumerate() {
            let row = index + 1;
            if row > self.config.max_rows {
                report.truncated = true;
                break;
            }

            let record = match result {
                Ok(record) => record,
                Err(e) => {
                    report.error(
                        Finding::critical(Category::Structural, format!("Row {}: unparseable ({})", row, e))
                            .at(Location::Row { row }),
                        cap,
                    );
                    stopped = true;
                    break;
                }
            };

            if record.len() != headers.len() {
                report.error(
                    Finding::critical(
                        Category::Structural,
                        format!("Row {}: structural mismatch ({} columns, expected {})", row, record.len(), headers.len()),
                    )
                    .at(Location::Row { row }),
                    cap,
                );
                continue;
            }

            let mut original = Vec::with_capacity(record.len());
            let mut sanitized = Vec::with_capacity(record.len());
            for (col, raw) in record.iter().enumerate() {
                match validate_and_normalize(raw) {
                    Ok(cell) => {
                        original.push(String::from_utf8_lossy(raw).into_owned());
                        sanitized.push(cell);
                    }
                    Err(issue) => {
                        report.error(issue.to_finding(row, &headers[col]), cap);
                        continue 'rows;
                    }
                }
            }

            match self.guard.apply(&mut sanitized) {
                Ok(n) => report.neutralized += n,
                Err(hit) => {
                    report.error(
                        Finding::critical(
                            Category::Content,
                            format!("Row {}: formula injection, cell starts with {:?}", row, hit.trigger),
                        )
                        .at(Location::Cell { row, column: headers[hit.column].clone() }),
                        cap,
                    );
                    continue;
                }
            }

            let violations: Vec<String> = self
                .rules
                .iter()
                .filter_map(|rule| {
                    let col = headers.iter().position(|h| *h == rule.column)?;
                    (!rule.passes(&sanitized[col])).then(|| format!("{} {}", rule.column, rule.name))
                })
                .collect();
            if !violations.is_empty() {
                report.error(
                    Finding::critical(
                        Category::Content,
                        format!("Row {}: {}", row, violations.join(", ")),
                    )
                    .at(Location::Row { row }),
                    cap,
                );
                continue;
            }

            report.rows.push(StagedRow {
                row_number: row,
                original,
                sanitized,
            });
        }

        if let Some((row, _)) = oversized {
            if row > self.config.max_rows {
                report.truncated = true;
            } else if !stopped && !report.truncated {
                report.error(
                    Finding::critical(
                        Category::Structural,
                        format!("Row {}: exceeds maximum line length {}", row, max_line),
                    )
                    .at(Location::Row { row }),
                    cap,
                );
            }
        }

        report.headers = headers;
        Ok(report)
    }

    fn serialize(headers: &[String], rows: &[StagedRow]) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record(headers)
            .map_err(|e| PipelineError::System(e.to_string()))?;
        for row in rows {
            writer
                .write_record(&row.sanitized)
                .map_err(|e| PipelineError::System(e.to_string()))?;
        }
        writer
            .into_inner()
            .map_err(|e| PipelineError::System(e.to_string()))
    }
}

/// Finds the first record longer than `max` bytes as `(record index, start
/// offset)`, with the header as record 0.
///
/// Follows the reader's rules: a quote opens a quoted field only at the start
/// of a field, `""` inside quotes is an escape, and blank lines are not
/// records. The scan stops as soon as a record passes `max`.
fn oversized_record(bytes: &[u8], max: usize) -> Option<(usize, usize)> {
    let mut index = 0;
    let mut start = 0;
    let mut in_quotes = false;
    let mut field_start = true;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if in_quotes {
            if b == b'"' {
                if bytes.get(i + 1) == Some(&b'"') {
                    i += 1;
                } else {
                    in_quotes = false;
                }
            }
        } else {
            if b == b'\n' || b == b'\r' {
                if i > start {
                    index += 1;
                }
                start = i + 1;
                field_start = true;
                i += 1;
                continue;
            }
            in_quotes = b == b'"' && field_start;
            field_start = b == b',';
        }
        if i + 1 - start > max {
            return Some((index, start));
        }
        i += 1;
    }
    None
}

#[async_trait]
impl Pipeline for CsvPipeline {
    fn engine(&self) -> Engine {
        Engine::Csv
    }

    fn size_bounds(&self) -> (u64, u64) {
        (self.config.min_bytes, self.config.max_bytes)
    }

    fn accepts_mime(&self, mime: &str) -> bool {
        self.config.allowed_mimes.iter().any(|m| m == mime)
    }

    /// Any critical signal is fatal for CSV: an executable or script
    /// signature has no legitimate place in tabular data.
    fn blocks(&self, finding: &Finding) -> bool {
        finding.is_critical()
    }

    async fn validate(&self, upload: &StagedUpload) -> Result<Vec<Finding>> {
        if !self.accepts_mime(&upload.sniffed_mime) {
            return Err(PipelineError::Policy(format!(
                "Disallowed CSV content type {}",
                upload.sniffed_mime
            )));
        }
        let findings = binary_signature_scan(&upload.bytes);
        debug!(signatures = findings.len(), "CSV content scan complete");
        Ok(findings)
    }

    async fn sanitize(&self, upload: &StagedUpload, store: &ArtifactStore) -> Result<Sanitized> {
        let report = self.filter_rows(&upload.bytes)?;

        if report.error_count > 0 {
            warn!(
                errors = report.error_count,
                staged = report.rows.len(),
                "CSV batch failed closed, staged rows discarded"
            );
            return Err(PipelineError::Sanitization {
                reason: format!("{} row errors; batch rejected", report.error_count),
                findings: report.errors,
            });
        }

        let bytes = Self::serialize(&report.headers, &report.rows)?;
        let output_path = store.quarantine(&bytes, "csv")?;

        let mut notes = vec![Finding::info(
            Category::Content,
            format!("{} rows staged for commit", report.rows.len()),
        )];
        if report.neutralized > 0 {
            notes.push(Finding::info(
                Category::Content,
                format!("{} cells neutralized with a leading quote", report.neutralized),
            ));
        }
        if report.truncated {
            notes.push(Finding::info(
                Category::Structural,
                format!("Row limit {} reached; remaining rows ignored", self.config.max_rows),
            ));
        }

        Ok(Sanitized {
            output_path,
            extension: "csv".to_string(),
            mime: "text/csv".to_string(),
            notes,
            headers: report.headers,
            staged_rows: report.rows,
            scratch: Vec::new(),
        })
    }

    async fn verify(&self, sanitized: &Sanitized) -> Result<Vec<Finding>> {
        let bytes = tokio::fs::read(&sanitized.output_path).await?;
        let mut findings = binary_signature_scan(&bytes);

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(bytes.as_slice());
        for (row, result) in reader.byte_records().enumerate() {
            let record = result.map_err(|e| {
                PipelineError::post_verification(format!("Sanitized CSV unparseable: {}", e))
            })?;
            for (col, raw) in record.iter().enumerate() {
                let column = sanitized.headers.get(col).cloned().unwrap_or_default();
                match validate_and_normalize(raw) {
                    Ok(cell) if cell.as_bytes() != raw => findings.push(
                        Finding::critical(Category::Encoding, "Cell not in normalized form")
                            .at(Location::Cell { row, column }),
                    ),
                    Ok(cell) => {
                        if let Some(trigger) = self.guard.trigger_of(&cell) {
                            findings.push(
                                Finding::critical(
                                    Category::Content,
                                    format!("Formula trigger {:?} survived sanitization", trigger),
                                )
                                .at(Location::Cell { row, column }),
                            );
                        }
                    }
                    Err(issue) => findings.push(issue.to_finding(row, &column)),
                }
            }
        }
        Ok(findings)
    }

    async fn commit(&self, upload: &StagedUpload, sanitized: &Sanitized) -> Result<usize> {
        let committed = self.datastore.commit_rows(
            &upload.request_id,
            &sanitized.headers,
            &sanitized.staged_rows,
        )?;
        info!(batch = %upload.request_id, rows = committed, "CSV batch committed");
        Ok(committed)
    }

    fn features(&self) -> Vec<Feature> {
        let formula = match self.config.formula_policy {
            FormulaPolicy::Reject => "Rejects rows with spreadsheet formula triggers.",
            FormulaPolicy::Neutralize => "Neutralizes formula triggers with a leading quote.",
        };
        vec![
            Feature::new("Deep Inspection", "Scans the whole file for ELF, PE, PHP and shebang signatures."),
            Feature::new("Formula Guard", formula),
            Feature::new("Encoding Shield", "Rejects invalid UTF-8, overlong and UTF-7 bypass sequences; stores NFC."),
            Feature::new("Business Logic", "Validates column rules such as non-negative amounts and email format."),
            Feature::new("Atomic Commits", "All-or-nothing import: one bad row rejects the batch."),
            Feature::new("Isolated Quarantine", "Processes uploads outside the public web root."),
            Feature::new("Forensic Audit", "Records every upload and its findings."),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use airlock_ledger::{sha256_hex, SledDatastore};
    use tempfile::TempDir;

    fn pipeline(config: CsvConfig) -> (CsvPipeline, Arc<SledDatastore>) {
        let store = Arc::new(SledDatastore::temporary().unwrap());
        (CsvPipeline::new(config, store.clone()), store)
    }

    fn upload(bytes: &[u8]) -> StagedUpload {
        StagedUpload {
            request_id: "batch-1".to_string(),
            original_filename: "people.csv".to_string(),
            extension: "csv".to_string(),
            sniffed_mime: "text/csv".to_string(),
            path: "/unused".into(),
            bytes: bytes.to_vec(),
            sha256: sha256_hex(bytes),
        }
    }

    fn areas(dir: &TempDir) -> ArtifactStore {
        ArtifactStore::new(dir.path().join("q"), dir.path().join("f")).unwrap()
    }

    #[tokio::test]
    async fn test_clean_batch_round_trip() {
        let dir = TempDir::new().unwrap();
        let (csv, store) = pipeline(CsvConfig::default());
        let up = upload(b"name,email,salary\nalice,alice@example.com,100\nbob,bob@example.com,0\n");

        assert!(csv.validate(&up).await.unwrap().is_empty());
        let sanitized = csv.sanitize(&up, &areas(&dir)).await.unwrap();
        assert_eq!(sanitized.staged_rows.len(), 2);
        assert!(csv.verify(&sanitized).await.unwrap().is_empty());

        assert_eq!(csv.commit(&up, &sanitized).await.unwrap(), 2);
        assert_eq!(store.committed_rows("batch-1").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_sum_formula_rejects_batch_and_commits_nothing() {
        let dir = TempDir::new().unwrap();
        let (csv, store) = pipeline(CsvConfig::default());
        let up = upload(b"name,total\nalice,10\nbob,=SUM(A1:A2)\ncarol,30\n");

        let err = csv.sanitize(&up, &areas(&dir)).await.unwrap_err();
        match &err {
            PipelineError::Sanitization { findings, .. } => {
                assert_eq!(findings.len(), 1);
                assert_eq!(
                    findings[0].location,
                    Some(Location::Cell { row: 2, column: "total".to_string() })
                );
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(store.committed_rows("batch-1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_neutralize_policy_commits_quoted_cells() {
        let dir = TempDir::new().unwrap();
        let config = CsvConfig {
            formula_policy: FormulaPolicy::Neutralize,
            ..CsvConfig::default()
        };
        let (csv, _) = pipeline(config);
        let up = upload(b"name,total\nbob,=SUM(A1:A2)\n");

        let sanitized = csv.sanitize(&up, &areas(&dir)).await.unwrap();
        assert_eq!(sanitized.staged_rows[0].sanitized[1], "'=SUM(A1:A2)");
        assert_eq!(sanitized.staged_rows[0].original[1], "=SUM(A1:A2)");
        assert!(sanitized.notes.iter().any(|n| n.description.contains("neutralized")));
        assert!(csv.verify(&sanitized).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_encoding_failures_reject() {
        let dir = TempDir::new().unwrap();
        let (csv, _) = pipeline(CsvConfig::default());
        for body in [&b"name\n+ADw-script+AD4-\n"[..], &b"name\nab\xc0\xbc\n"[..], &b"name\n\xff\xfe\n"[..]] {
            let err = csv.sanitize(&upload(body), &areas(&dir)).await.unwrap_err();
            assert!(
                err.findings().iter().any(|f| f.category == Category::Encoding),
                "{:?}",
                err
            );
        }
    }

    #[tokio::test]
    async fn test_nfc_normalization_applied() {
        let dir = TempDir::new().unwrap();
        let (csv, _) = pipeline(CsvConfig::default());
        let up = upload("name,city\nRene\u{301},Paris\n".as_bytes());
        let sanitized = csv.sanitize(&up, &areas(&dir)).await.unwrap();
        assert_eq!(sanitized.staged_rows[0].sanitized[0], "Ren\u{e9}");
        assert!(csv.verify(&sanitized).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_business_rules() {
        let dir = TempDir::new().unwrap();
        let (csv, _) = pipeline(CsvConfig::default());
        let err = csv
            .sanitize(&upload(b"name,email,salary\nbob,not-an-email,5\n"), &areas(&dir))
            .await
            .unwrap_err();
        assert!(err.findings()[0].description.contains("email invalid email format"));

        let custom = pipeline(CsvConfig::default()).0.with_rule(BusinessRule::custom(
            "name",
            "must be lowercase",
            Arc::new(|v: &str| v.chars().all(|c| !c.is_uppercase())),
        ));
        assert!(custom
            .sanitize(&upload(b"name,city\nBOB,Oslo\n"), &areas(&dir))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_column_mismatch_and_error_cap() {
        let dir = TempDir::new().unwrap();
        let config = CsvConfig {
            max_errors: 3,
            ..CsvConfig::default()
        };
        let (csv, _) = pipeline(config);
        let mut body = b"a,b\n".to_vec();
        for _ in 0..10 {
            body.extend_from_slice(b"only-one\n");
        }
        let err = csv.sanitize(&upload(&body), &areas(&dir)).await.unwrap_err();
        assert_eq!(err.findings().len(), 3);
        assert!(err.to_string().contains("10 row errors"));
    }

    #[tokio::test]
    async fn test_row_limit_truncates_without_failing() {
        let dir = TempDir::new().unwrap();
        let config = CsvConfig {
            max_rows: 2,
            ..CsvConfig::default()
        };
        let (csv, _) = pipeline(config);
        let sanitized = csv
            .sanitize(&upload(b"n\n1\n2\n3\n4\n"), &areas(&dir))
            .await
            .unwrap();
        assert_eq!(sanitized.staged_rows.len(), 2);
        assert!(sanitized.notes.iter().any(|n| n.description.contains("Row limit")));
    }

    #[tokio::test]
    async fn test_line_length_is_hard_boundary() {
        let dir = TempDir::new().unwrap();
        let config = CsvConfig {
            max_line_length: 16,
            ..CsvConfig::default()
        };
        let (csv, _) = pipeline(config);
        let err = csv
            .sanitize(&upload(b"n\nshort\naaaaaaaaaaaaaaaaaaaaaaaa\nok\n"), &areas(&dir))
            .await
            .unwrap_err();
        assert_eq!(err.findings().len(), 1);
        assert!(err.findings()[0].description.contains("line length"));
    }

    #[tokio::test]
    async fn test_huge_quoted_field_stops_at_line_limit() {
        let dir = TempDir::new().unwrap();
        let (csv, _) = pipeline(CsvConfig {
            max_line_length: 1_000,
            ..CsvConfig::default()
        });
        let mut body = b"name,note\nann,ok\nbob,\"".to_vec();
        for _ in 0..4_000 {
            body.extend_from_slice(b"padding padding padding padding padding padding\n");
        }
        body.extend_from_slice(b"\"\ncat,ok\n");

        let err = csv.sanitize(&upload(&body), &areas(&dir)).await.unwrap_err();
        assert_eq!(err.findings().len(), 1);
        assert!(err.findings()[0].description.contains("Row 2: exceeds maximum line length 1000"));
    }

    #[tokio::test]
    async fn test_oversized_header_is_structural() {
        let dir = TempDir::new().unwrap();
        let (csv, _) = pipeline(CsvConfig {
            max_line_length: 8,
            ..CsvConfig::default()
        });
        let err = csv
            .sanitize(&upload(b"name,email,salary\na,b,c\n"), &areas(&dir))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Structural { .. }));
    }

    #[test]
    fn test_oversized_record_follows_reader_rules() {
        // Quoted newlines stay inside the record; blank lines are not records.
        let body = b"h\n\n\"a\nb\"\r\nccccccc\n";
        assert_eq!(oversized_record(body, 5), Some((2, 10)));
        assert_eq!(oversized_record(body, 7), None);
        // A quote in the middle of a field is literal.
        assert_eq!(oversized_record(b"h\nab\"c\nd\n", 4), None);
        assert_eq!(oversized_record(b"a,\"x\"\"y\"\n", 8), None);
    }

    #[tokio::test]
    async fn test_signature_scan_blocks() {
        let (csv, _) = pipeline(CsvConfig::default());
        let findings = csv.validate(&upload(b"a,b\n1,#!/bin/sh\n")).await.unwrap();
        assert!(findings.iter().any(|f| csv.blocks(f)));
    }

    #[tokio::test]
    async fn test_disallowed_mime_is_policy_rejection() {
        let (csv, _) = pipeline(CsvConfig::default());
        let mut up = upload(b"a,b\n1,2\n");
        up.sniffed_mime = "application/pdf".to_string();
        assert!(matches!(csv.validate(&up).await, Err(PipelineError::Policy(_))));
    }

    #[tokio::test]
    async fn test_header_with_bom_and_too_many_columns() {
        let dir = TempDir::new().unwrap();
        let (csv, _) = pipeline(CsvConfig {
            max_columns: 2,
            ..CsvConfig::default()
        });
        let sanitized = csv
            .sanitize(&upload("\u{FEFF}name,age\nann,3\n".as_bytes()), &areas(&dir))
            .await
            .unwrap();
        assert_eq!(sanitized.headers[0], "name");

        let err = csv
            .sanitize(&upload(b"a,b,c\n1,2,3\n"), &areas(&dir))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Structural { .. }));
    }
}
