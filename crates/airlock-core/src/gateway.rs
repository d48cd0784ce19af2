//! The unified Airlock gateway.
//!
//! [`Gateway`] owns the three pipelines and the collaborators they share,
//! and is the only way an upload reaches storage.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use airlock_ledger::{
    discard, is_valid_token, sha256_hex, ArtifactRecord, ArtifactStore, AuditClose, AuditRecord,
    AuditStatus, Datastore, LedgerError, ReputationStatus, SledDatastore,
};
use airlock_pipeline::{
    BusinessRule, CsvPipeline, Engine, Feature, ImagePipeline, PdfPipeline, Pipeline,
    PipelineError, Sanitized, StagedUpload,
};
use airlock_sandbox::{CommandSandbox, ProcessSandbox};
use airlock_scan::{sniff_mime, Category, Finding};
use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    config::{AirlockConfig, GatewayConfig},
    context::{RequestContext, UploadCandidate},
    delivery::Delivery,
    error::AirlockError,
    verdict::{FindingSummary, RejectionKind, UploadOutcome, UploadStatus},
    Result,
};

const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Extension allow-list entry.
#[derive(Debug)]
struct Route {
    extension: &'static str,
    mime: &'static str,
    engine: Engine,
}

const ROUTES: &[Route] = &[
    Route { extension: "csv", mime: "text/csv", engine: Engine::Csv },
    Route { extension: "pdf", mime: "application/pdf", engine: Engine::Pdf },
    Route { extension: "jpg", mime: "image/jpeg", engine: Engine::Image },
    Route { extension: "jpeg", mime: "image/jpeg", engine: Engine::Image },
    Route { extension: "png", mime: "image/png", engine: Engine::Image },
    Route { extension: "gif", mime: "image/gif", engine: Engine::Image },
    Route { extension: "webp", mime: "image/webp", engine: Engine::Image },
];

/// Other spellings a CSV file may sniff as.
const CSV_MIME_EXCEPTIONS: &[&str] = &["application/csv", "text/plain"];

impl Route {
    fn lookup(extension: &str) -> Option<&'static Route> {
        ROUTES.iter().find(|r| r.extension == extension)
    }

    fn admits(&self, sniffed: &str) -> bool {
        sniffed == self.mime
            || (self.engine == Engine::Csv && CSV_MIME_EXCEPTIONS.contains(&sniffed))
    }
}

/// What a run accumulates for its audit record.
#[derive(Debug, Default)]
struct RunLog {
    engine: Option<Engine>,
    detected_mime: Option<String>,
    original_hash: Option<String>,
    findings: Vec<Finding>,
    /// Quarantine paths removed when the run ends, whatever the outcome.
    scratch: Vec<PathBuf>,
}

impl RunLog {
    fn track(&mut self, sanitized: &Sanitized) {
        self.scratch.push(sanitized.output_path.clone());
        self.scratch.extend(sanitized.scratch.iter().cloned());
        self.findings.extend(sanitized.notes.iter().cloned());
    }
}

#[derive(Debug)]
struct Accepted {
    artifact_id: String,
    extension: String,
    sanitized_hash: String,
    sanitized_size: u64,
    committed_rows: usize,
}

#[derive(Debug)]
struct Rejected {
    kind: RejectionKind,
    error: PipelineError,
}

impl Rejected {
    fn new(kind: RejectionKind, error: PipelineError) -> Self {
        Self { kind, error }
    }
}

impl From<PipelineError> for Rejected {
    fn from(error: PipelineError) -> Self {
        Self {
            kind: RejectionKind::from(&error),
            error,
        }
    }
}

impl From<LedgerError> for Rejected {
    fn from(e: LedgerError) -> Self {
        PipelineError::from(e).into()
    }
}

impl From<std::io::Error> for Rejected {
    fn from(e: std::io::Error) -> Self {
        PipelineError::from(e).into()
    }
}

/// The Airlock upload gateway.
///
/// # Security Model
///
/// For every upload, in order:
/// 1. Audit record opened (`processing`)
/// 2. Admission control (per-client rate limit)
/// 3. Extension allow-list, then content sniffing against the extension
/// 4. Size bounds of the selected engine
/// 5. Quarantine write under a random name
/// 6. Signals (`validate`); blocking findings reject without sanitizing
/// 7. Authority (`sanitize`), then `verify`; optional fallback
/// 8. Promotion to final storage, registration, CSV row commit
/// 9. Reputation write-back and audit record closed
///
/// Every path closes the audit record exactly once and removes its
/// quarantine files. Any failure rejects.
///
/// # Example
///
/// ```rust,ignore
/// let gateway = Gateway::open(AirlockConfig::default())?;
/// let ctx = RequestContext::new("client-42");
/// let outcome = gateway.process(&ctx, UploadCandidate::new("report.pdf", bytes)).await;
///
/// if let Some(id) = outcome.artifact_id {
///     let delivery = gateway.fetch(&id)?;
/// }
/// ```
pub struct Gateway {
    config: GatewayConfig,
    datastore: Arc<dyn Datastore>,
    store: ArtifactStore,
    csv: CsvPipeline,
    pdf: PdfPipeline,
    image: ImagePipeline,
}

impl Gateway {
    /// Opens the sled ledger and storage areas named by `config` and runs
    /// external tools as real processes.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the database cannot
    /// be opened or a storage area cannot be created.
    pub fn open(config: AirlockConfig) -> Result<Self> {
        config.validate()?;
        let datastore = Arc::new(SledDatastore::open(&config.storage.db_path)?);
        Self::with_collaborators(config, datastore, Arc::new(CommandSandbox::new()))
    }

    /// Builds a gateway over explicit collaborators.
    pub fn with_collaborators(
        config: AirlockConfig,
        datastore: Arc<dyn Datastore>,
        sandbox: Arc<dyn ProcessSandbox>,
    ) -> Result<Self> {
        config.validate()?;
        let store = ArtifactStore::new(&config.storage.quarantine_dir, &config.storage.final_dir)?;

        let csv = CsvPipeline::new(config.csv.clone(), datastore.clone());
        let pdf = PdfPipeline::new(
            config.pdf.clone(),
            config.tools.clone(),
            sandbox.clone(),
            datastore.clone(),
        );
        let image = ImagePipeline::new(config.image.clone(), config.tools.clone(), sandbox);

        info!(
            rate_limit = config.gateway.rate_limit_per_minute,
            production = config.gateway.production_mode,
            "Airlock gateway initialized"
        );

        Ok(Self {
            config: config.gateway,
            datastore,
            store,
            csv,
            pdf,
            image,
        })
    }

    /// Adds a custom CSV business rule.
    pub fn with_csv_rule(self, rule: BusinessRule) -> Self {
        Self {
            csv: self.csv.with_rule(rule),
            ..self
        }
    }

    pub fn datastore(&self) -> &Arc<dyn Datastore> {
        &self.datastore
    }

    fn pipeline(&self, engine: Engine) -> &dyn Pipeline {
        match engine {
            Engine::Csv => &self.csv,
            Engine::Pdf => &self.pdf,
            Engine::Image => &self.image,
        }
    }

    /// Runs one upload to completion. Never fails: every failure becomes a
    /// rejected or errored outcome with a closed audit record.
    #[instrument(
        skip_all,
        fields(
            request_id = %ctx.request_id,
            client = %ctx.client_id,
            filename = %candidate.filename,
            engine = tracing::field::Empty,
        )
    )]
    pub async fn process(&self, ctx: &RequestContext, candidate: UploadCandidate) -> UploadOutcome {
        let size = candidate.size();

        if let Err(e) = self.datastore.record_audit_start(
            &ctx.request_id,
            &ctx.client_id,
            &candidate.filename,
            size,
        ) {
            error!(error = %e, "Audit record could not be opened; refusing upload");
            return self.unaudited(ctx, size, e);
        }

        let mut log = RunLog::default();
        let result = self.run(ctx, candidate, &mut log).await;
        for path in log.scratch.drain(..) {
            discard(&path);
        }
        self.finish(ctx, size, log, result)
    }

    async fn run(
        &self,
        ctx: &RequestContext,
        candidate: UploadCandidate,
        log: &mut RunLog,
    ) -> std::result::Result<Accepted, Rejected> {
        let limit = self.config.rate_limit_per_minute;
        if !self
            .datastore
            .rate_limit_check_and_record(&ctx.client_id, limit, RATE_WINDOW)?
        {
            log.findings.push(Finding::suspicious(
                Category::Reputation,
                "Rate limit exceeded",
            ));
            return Err(Rejected::new(
                RejectionKind::RateLimited,
                PipelineError::Policy(format!("More than {} uploads per minute", limit)),
            ));
        }

        let extension = candidate.extension().unwrap_or_default();
        let route = Route::lookup(&extension).ok_or_else(|| {
            Rejected::new(
                RejectionKind::UnsupportedExtension,
                PipelineError::Policy(format!("Extension {:?} is not allowed", extension)),
            )
        })?;
        tracing::Span::current().record("engine", route.engine.as_str());
        if let Some(declared) = &candidate.declared_content_type {
            debug!(declared = %declared, "Ignoring client-declared content type");
        }

        let sniffed = sniff_mime(&candidate.bytes);
        log.detected_mime = Some(sniffed.clone());
        log.engine = Some(route.engine);
        if !route.admits(&sniffed) {
            return Err(Rejected::new(
                RejectionKind::MimeExtensionMismatch,
                PipelineError::Policy(format!(
                    "Content sniffed as {} but extension .{} expects {}",
                    sniffed, extension, route.mime
                )),
            ));
        }

        let pipeline = self.pipeline(route.engine);
        let size = candidate.size();
        let (min, max) = pipeline.size_bounds();
        if size < min || size > max {
            return Err(Rejected::new(
                RejectionKind::SizeOutOfBounds,
                PipelineError::Policy(format!("Size {} outside [{}, {}]", size, min, max)),
            ));
        }

        let sha256 = sha256_hex(&candidate.bytes);
        log.original_hash = Some(sha256.clone());
        let path = self.store.quarantine(&candidate.bytes, route.extension)?;
        log.scratch.push(path.clone());

        let upload = StagedUpload {
            request_id: ctx.request_id.clone(),
            original_filename: candidate.filename,
            extension: route.extension.to_string(),
            sniffed_mime: sniffed,
            path,
            bytes: candidate.bytes,
            sha256,
        };
        debug!(engine = %route.engine, "Dispatched to pipeline");

        let signals = pipeline.validate(&upload).await?;
        let blocking: Vec<Finding> = signals.iter().filter(|f| pipeline.blocks(f)).cloned().collect();
        debug!(signals = signals.len(), blocking = blocking.len(), "Validation complete");
        log.findings.extend(signals);
        if !blocking.is_empty() {
            let reason = format!("{} blocking findings before sanitization", blocking.len());
            let threat = blocking
                .iter()
                .any(|f| matches!(f.category, Category::Content | Category::Reputation));
            return Err(if threat {
                PipelineError::Threat { reason, findings: blocking }
            } else {
                PipelineError::Structural { reason, findings: blocking }
            }
            .into());
        }

        let sanitized = self.sanitize_and_verify(pipeline, &upload, log).await?;

        let bytes = tokio::fs::read(&sanitized.output_path).await?;
        let sanitized_hash = sha256_hex(&bytes);
        let stored = self.store.store_final(&bytes, &sanitized.extension)?;
        let record = ArtifactRecord {
            id: stored.id.clone(),
            mime: sanitized.mime.clone(),
            extension: sanitized.extension.clone(),
            size: bytes.len() as u64,
            sha256: sanitized_hash.clone(),
            original_filename: upload.original_filename.clone(),
            engine: route.engine.to_string(),
            created_at: Utc::now(),
        };
        if let Err(e) = self.datastore.register_artifact(&record) {
            self.withdraw(&stored.id, &sanitized.extension);
            return Err(e.into());
        }
        let committed_rows = match pipeline.commit(&upload, &sanitized).await {
            Ok(rows) => rows,
            Err(e) => {
                self.withdraw(&stored.id, &sanitized.extension);
                return Err(e.into());
            }
        };

        Ok(Accepted {
            artifact_id: stored.id,
            extension: sanitized.extension,
            sanitized_hash,
            sanitized_size: bytes.len() as u64,
            committed_rows,
        })
    }

    async fn sanitize_and_verify(
        &self,
        pipeline: &dyn Pipeline,
        upload: &StagedUpload,
        log: &mut RunLog,
    ) -> std::result::Result<Sanitized, PipelineError> {
        let first = pipeline.sanitize(upload, &self.store).await?;
        log.track(&first);

        let failure = match Self::verify(pipeline, &first).await {
            Ok(()) => return Ok(first),
            Err(e) => e,
        };
        discard(&first.output_path);

        match pipeline.fallback(upload, &self.store).await {
            None => Err(failure),
            Some(Err(e)) => {
                warn!(error = %e, "Fallback sanitizer failed");
                Err(failure)
            }
            Some(Ok(second)) => {
                log.track(&second);
                log.findings.extend(failure.findings().iter().cloned());
                Self::verify(pipeline, &second).await.map(|()| second)
            }
        }
    }

    /// Post-verification: any critical finding on the output is fatal.
    async fn verify(pipeline: &dyn Pipeline, sanitized: &Sanitized) -> std::result::Result<(), PipelineError> {
        let critical: Vec<Finding> = pipeline
            .verify(sanitized)
            .await?
            .into_iter()
            .filter(Finding::is_critical)
            .collect();
        if critical.is_empty() {
            return Ok(());
        }
        warn!(critical = critical.len(), "Critical findings survived sanitization");
        Err(PipelineError::PostVerification {
            reason: format!("{} critical findings survived sanitization", critical.len()),
            findings: critical,
        })
    }

    fn withdraw(&self, id: &str, extension: &str) {
        if let Err(e) = self.store.remove_final(id, extension) {
            error!(artifact_id = %id, error = %e, "Failed to withdraw artifact");
        }
    }

    fn finish(
        &self,
        ctx: &RequestContext,
        size: u64,
        mut log: RunLog,
        result: std::result::Result<Accepted, Rejected>,
    ) -> UploadOutcome {
        match result {
            Ok(accepted) => {
                let removed = size as i64 - accepted.sanitized_size as i64;
                log.findings.push(Finding::info(
                    Category::Structural,
                    format!(
                        "Sanitization changed size by {} bytes ({} -> {})",
                        -removed, size, accepted.sanitized_size
                    ),
                ));

                if let Err(e) = self.datastore.reputation_upsert(
                    &accepted.sanitized_hash,
                    ReputationStatus::Safe,
                    &[],
                ) {
                    warn!(error = %e, "Reputation write-back failed");
                }

                let close = AuditClose {
                    status: Some(AuditStatus::Sanitized),
                    detected_mime: log.detected_mime.clone(),
                    engine: log.engine.map(|e| e.to_string()),
                    findings: log.findings.clone(),
                    file_size: Some(accepted.sanitized_size),
                    file_hash: Some(accepted.sanitized_hash.clone()),
                    reason: None,
                };
                if let Err(e) = self.datastore.record_audit_end(&ctx.request_id, close) {
                    error!(error = %e, "Audit record could not be closed; withdrawing artifact");
                    self.withdraw(&accepted.artifact_id, &accepted.extension);
                    return self.rejected(ctx, size, &log, Rejected::from(e));
                }

                info!(
                    artifact_id = %accepted.artifact_id,
                    bytes_removed = removed,
                    rows = accepted.committed_rows,
                    "Upload accepted"
                );
                UploadOutcome {
                    request_id: ctx.request_id.clone(),
                    status: UploadStatus::Accepted,
                    rejection: None,
                    message: "File accepted".to_string(),
                    engine: log.engine,
                    artifact_id: Some(accepted.artifact_id),
                    sanitized_hash: Some(accepted.sanitized_hash),
                    original_size: size,
                    sanitized_size: Some(accepted.sanitized_size),
                    committed_rows: accepted.committed_rows,
                    findings: FindingSummary::of(&log.findings),
                }
            }
            Err(rejected) => {
                for finding in rejected.error.findings() {
                    if !log.findings.contains(finding) {
                        log.findings.push(finding.clone());
                    }
                }

                if rejected.error.is_threat() {
                    if let Some(hash) = &log.original_hash {
                        if let Err(e) = self.datastore.reputation_upsert(
                            hash,
                            ReputationStatus::Malicious,
                            rejected.error.findings(),
                        ) {
                            warn!(error = %e, "Reputation write-back failed");
                        }
                    }
                }

                let close = AuditClose {
                    status: Some(rejected.error.audit_status()),
                    detected_mime: log.detected_mime.clone(),
                    engine: log.engine.map(|e| e.to_string()),
                    findings: log.findings.clone(),
                    file_size: Some(size),
                    file_hash: log.original_hash.clone(),
                    reason: Some(format!("{}: {}", rejected.kind, rejected.error)),
                };
                if let Err(e) = self.datastore.record_audit_end(&ctx.request_id, close) {
                    error!(error = %e, "Audit record could not be closed");
                }

                warn!(kind = %rejected.kind, reason = %rejected.error, "Upload rejected");
                self.rejected(ctx, size, &log, rejected)
            }
        }
    }

    fn rejected(&self, ctx: &RequestContext, size: u64, log: &RunLog, rejected: Rejected) -> UploadOutcome {
        let status = match rejected.error.audit_status() {
            AuditStatus::Error => UploadStatus::Error,
            _ => UploadStatus::Rejected,
        };
        UploadOutcome {
            request_id: ctx.request_id.clone(),
            status,
            rejection: Some(rejected.kind),
            message: self.message(&rejected),
            engine: log.engine,
            artifact_id: None,
            sanitized_hash: None,
            original_size: size,
            sanitized_size: None,
            committed_rows: 0,
            findings: FindingSummary::of(&log.findings),
        }
    }

    fn unaudited(&self, ctx: &RequestContext, size: u64, e: LedgerError) -> UploadOutcome {
        self.rejected(ctx, size, &RunLog::default(), Rejected::from(e))
    }

    fn message(&self, rejected: &Rejected) -> String {
        let generic = match rejected.kind {
            RejectionKind::RateLimited => "Too many uploads; try again later",
            RejectionKind::UnsupportedExtension => "File type not allowed",
            RejectionKind::MimeExtensionMismatch => "File content does not match its extension",
            RejectionKind::SizeOutOfBounds => "File size outside the allowed range",
            _ => rejected.error.public_message(),
        };
        if self.config.production_mode {
            generic.to_string()
        } else {
            format!("{} ({})", generic, rejected.error)
        }
    }

    /// Loads an accepted artifact for delivery.
    ///
    /// # Errors
    ///
    /// - [`AirlockError::InvalidArtifactId`] for anything but a 32-char hex token
    /// - [`AirlockError::ArtifactNotFound`] if no artifact is registered under it
    /// - [`AirlockError::Integrity`] if the stored bytes no longer match
    pub fn fetch(&self, id: &str) -> Result<Delivery> {
        if !is_valid_token(id) {
            return Err(AirlockError::InvalidArtifactId);
        }
        let record = self
            .datastore
            .lookup_artifact(id)?
            .ok_or_else(|| AirlockError::ArtifactNotFound(id.to_string()))?;
        let bytes = match self.store.read_final(&record.id, &record.extension) {
            Ok(bytes) => bytes,
            Err(LedgerError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                return Err(AirlockError::ArtifactNotFound(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        if sha256_hex(&bytes) != record.sha256 {
            error!(artifact_id = %id, "Stored artifact hash mismatch");
            return Err(AirlockError::Integrity(id.to_string()));
        }
        debug!(artifact_id = %id, size = bytes.len(), "Artifact delivered");
        Ok(Delivery::new(&record, bytes))
    }

    /// The audit record of one request.
    pub fn audit_record(&self, request_id: &str) -> Result<Option<AuditRecord>> {
        Ok(self.datastore.audit_record(request_id)?)
    }

    /// Protections applied by each engine.
    pub fn features(&self) -> Vec<(Engine, Vec<Feature>)> {
        [Engine::Csv, Engine::Pdf, Engine::Image]
            .into_iter()
            .map(|engine| (engine, self.pipeline(engine).features()))
            .collect()
    }
}
