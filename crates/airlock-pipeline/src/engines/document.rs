//! PDF pipeline: qpdf structure dump, semantic scan, linearization.
//!
//! Raw-byte regexes only corroborate. The keyword scan that decides runs
//! over the object graph qpdf decoded, and the same scan runs again over
//! the linearized output. A PDF that still carries active content after
//! linearization is rejected; an optional flatten fallback rebuilds it
//! from rendered pages instead.

use std::path::Path;
use std::sync::Arc;

use airlock_ledger::{discard, ArtifactStore, Datastore};
use airlock_sandbox::{ProcessSandbox, ToolPaths, Toolchain};
use airlock_scan::magic::has_pdf_header;
use airlock_scan::signatures::pdf_keyword_scan;
use airlock_scan::{Category, Finding, ObjectGraph, SemanticScanner, StructureReport};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::PdfConfig;
use crate::error::{PipelineError, Result};
use crate::pipeline::{Engine, Feature, Pipeline, Sanitized, StagedUpload};

/// The PDF pipeline.
pub struct PdfPipeline {
    config: PdfConfig,
    tools: ToolPaths,
    sandbox: Arc<dyn ProcessSandbox>,
    datastore: Arc<dyn Datastore>,
}

impl PdfPipeline {
    pub fn new(
        config: PdfConfig,
        tools: ToolPaths,
        sandbox: Arc<dyn ProcessSandbox>,
        datastore: Arc<dyn Datastore>,
    ) -> Self {
        Self {
            config,
            tools,
            sandbox,
            datastore,
        }
    }

    fn toolchain(&self) -> Toolchain<'_> {
        Toolchain::new(self.sandbox.as_ref(), &self.tools)
            .with_qpdf_warnings_exit(self.config.warnings_exit_code)
    }

    /// Dumps and decodes the object graph of `path`.
    async fn object_graph(&self, path: &Path) -> std::result::Result<ObjectGraph, String> {
        let dump = self
            .toolchain()
            .structure_dump(path, self.config.timeout())
            .await
            .map_err(|e| format!("Structure dump failed: {}", e))?;
        ObjectGraph::from_qpdf_json(&dump).map_err(|e| e.to_string())
    }

    fn graph_findings(&self, graph: &ObjectGraph, raw: &[u8]) -> Vec<Finding> {
        let mut findings = StructureReport::new(graph, raw).findings(&self.config.limits());
        findings.extend(SemanticScanner::new(self.config.max_depth).scan(graph));
        findings
    }
}

#[async_trait]
impl Pipeline for PdfPipeline {
    fn engine(&self) -> Engine {
        Engine::Pdf
    }

    fn size_bounds(&self) -> (u64, u64) {
        (self.config.min_bytes, self.config.max_bytes)
    }

    fn accepts_mime(&self, mime: &str) -> bool {
        mime == "application/pdf"
    }

    async fn validate(&self, upload: &StagedUpload) -> Result<Vec<Finding>> {
        if !has_pdf_header(&upload.bytes) {
            return Err(PipelineError::structural("Missing %PDF- header at offset 0"));
        }

        let mut findings = Vec::new();
        let reputation = self.datastore.reputation_lookup(&upload.sha256)?;
        if reputation.is_malicious() {
            warn!(hash = %upload.sha256, detections = reputation.detection_count, "Known malicious PDF");
            findings.push(Finding::critical(
                Category::Reputation,
                format!("Hash previously flagged malicious ({} detections)", reputation.detection_count),
            ));
        }

        let graph = match self.object_graph(&upload.path).await {
            Ok(graph) => graph,
            Err(reason) => return Err(PipelineError::Structural { reason, findings }),
        };
        debug!(
            objects = graph.object_count(),
            streams = graph.stream_count(),
            pages = graph.page_count(),
            "PDF object graph decoded"
        );

        findings.extend(self.graph_findings(&graph, &upload.bytes));
        findings.extend(pdf_keyword_scan(&upload.bytes));
        Ok(findings)
    }

    async fn sanitize(&self, upload: &StagedUpload, store: &ArtifactStore) -> Result<Sanitized> {
        let output = store.scratch_path("pdf");
        if let Err(e) = self
            .toolchain()
            .linearize(&upload.path, &output, self.config.timeout())
            .await
        {
            discard(&output);
            return Err(PipelineError::sanitization(format!("Linearization failed: {}", e)));
        }
        Ok(Sanitized {
            output_path: output,
            extension: "pdf".to_string(),
            mime: "application/pdf".to_string(),
            notes: vec![Finding::info(
                Category::Structural,
                "Rewritten as one linearized revision with metadata removed",
            )],
            ..Sanitized::default()
        })
    }

    async fn verify(&self, sanitized: &Sanitized) -> Result<Vec<Finding>> {
        let raw = tokio::fs::read(&sanitized.output_path).await?;
        if !has_pdf_header(&raw) {
            return Err(PipelineError::post_verification("Sanitized output lacks %PDF- header"));
        }
        let graph = self
            .object_graph(&sanitized.output_path)
            .await
            .map_err(PipelineError::post_verification)?;
        Ok(self.graph_findings(&graph, &raw))
    }

    async fn fallback(&self, upload: &StagedUpload, store: &ArtifactStore) -> Option<Result<Sanitized>> {
        if !self.config.flatten_fallback {
            return None;
        }
        info!(request_id = %upload.request_id, "Flattening PDF to rendered pages");

        let scratch = match store.scratch_dir() {
            Ok(dir) => dir,
            Err(e) => return Some(Err(e.into())),
        };
        let output = store.scratch_path("pdf");
        let result = self
            .toolchain()
            .render_to_raster_and_rebuild(&upload.path, &output, &scratch, self.config.timeout())
            .await;

        Some(match result {
            Ok(()) => Ok(Sanitized {
                output_path: output,
                extension: "pdf".to_string(),
                mime: "application/pdf".to_string(),
                notes: vec![Finding::info(
                    Category::Structural,
                    "Rebuilt from rendered page images; text and links removed",
                )],
                scratch: vec![scratch],
                ..Sanitized::default()
            }),
            Err(e) => {
                discard(&scratch);
                discard(&output);
                Err(PipelineError::sanitization(format!("Flatten fallback failed: {}", e)))
            }
        })
    }

    fn features(&self) -> Vec<Feature> {
        let mut features = vec![
            Feature::new("QPDF Sanitization", "Rewrites every PDF into one linearized revision without metadata."),
            Feature::new("Resource Guard", "Caps objects, streams, pages and nesting depth."),
            Feature::new("Hash Reputation", "Rejects files whose SHA-256 was flagged malicious before."),
            Feature::new("Active Content Scan", "Finds JavaScript, actions, forms and embedded files in the object graph."),
            Feature::new("Polyglot Defense", "Requires the %PDF- header at offset 0."),
            Feature::new("Post-Sanitization Check", "Scans the rewritten file again before accepting it."),
            Feature::new("Isolated Quarantine", "Processes uploads outside the public web root."),
        ];
        if self.config.flatten_fallback {
            features.push(Feature::new(
                "Flatten Fallback",
                "Rebuilds rejected documents from rendered page images.",
            ));
        }
        features
    }
}
