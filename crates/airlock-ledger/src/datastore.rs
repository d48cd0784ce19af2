//! # Datastore Collaborator
//!
//! The [`Datastore`] trait is the narrow persistence surface the gateway and
//! pipelines consume. [`SledDatastore`] implements it over an embedded sled
//! database.
//!
//! ## Storage Structure
//!
//! | Tree | Key | Value | Purpose |
//! |------|-----|-------|---------|
//! | `audit` | request id | [`AuditRecord`] | One record per upload |
//! | `reputation` | sha256 hex | [`ReputationEntry`] | Known-good / known-bad hashes |
//! | `rate_limits` | client id | `[i64]` ms timestamps | Sliding admission window |
//! | `csv_rows` | `{batch}/h`, `{batch}/r/{n}` | header, [`StagedRow`] | Committed CSV imports |
//! | `artifacts` | artifact id | [`ArtifactRecord`] | Accepted artifact registry |
//!
//! ## Concurrency
//!
//! No operation does a read-modify-write across calls. Reputation upserts and
//! rate-limit windows go through sled's atomic `update_and_fetch` /
//! `fetch_and_update`; audit opening and artifact registration are
//! compare-and-swap against an absent key; CSV commits are a single batch.
//!
//! Rate-limit keys whose window has fully expired are swept at most once per
//! window, each removal a compare-and-swap against the value that was read, so
//! the tree holds only clients seen within the last window.

use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use airlock_scan::Finding;
use chrono::Utc;
use tracing::{debug, warn};

use crate::models::{
    ArtifactRecord, AuditClose, AuditRecord, AuditStatus, LedgerError, ReputationEntry,
    ReputationStatus, Result, StagedRow,
};

const AUDIT_TREE: &str = "audit";
const REPUTATION_TREE: &str = "reputation";
const RATE_LIMIT_TREE: &str = "rate_limits";
const CSV_ROWS_TREE: &str = "csv_rows";
const ARTIFACT_TREE: &str = "artifacts";

/// Persistence surface for audit, reputation, admission and artifacts.
pub trait Datastore: Send + Sync {
    /// Opens the audit record for a request with status `processing`.
    fn record_audit_start(
        &self,
        request_id: &str,
        client_id: &str,
        filename: &str,
        size: u64,
    ) -> Result<()>;

    /// Closes the audit record for a request. A closed record never changes.
    fn record_audit_end(&self, request_id: &str, close: AuditClose) -> Result<AuditRecord>;

    /// Fetches one audit record.
    fn audit_record(&self, request_id: &str) -> Result<Option<AuditRecord>>;

    /// Every audit record, in request id order.
    fn audit_records(&self) -> Result<Vec<AuditRecord>>;

    /// Looks up a hash; unseen hashes are `unknown`.
    fn reputation_lookup(&self, hash: &str) -> Result<ReputationEntry>;

    /// Records a judgement of a hash and increments its detection count.
    fn reputation_upsert(
        &self,
        hash: &str,
        status: ReputationStatus,
        findings: &[Finding],
    ) -> Result<ReputationEntry>;

    /// Admits at most `limit` requests per `window` for `identifier`.
    /// Admitted requests are recorded; denied ones are not.
    fn rate_limit_check_and_record(
        &self,
        identifier: &str,
        limit: u32,
        window: Duration,
    ) -> Result<bool>;

    /// Atomically commits a batch of validated CSV rows.
    fn commit_rows(&self, batch_id: &str, headers: &[String], rows: &[StagedRow]) -> Result<usize>;

    /// Rows committed for a batch, in row order.
    fn committed_rows(&self, batch_id: &str) -> Result<Vec<StagedRow>>;

    /// Registers an accepted artifact. Ids are write-once.
    fn register_artifact(&self, record: &ArtifactRecord) -> Result<()>;

    /// Looks up an artifact by id.
    fn lookup_artifact(&self, id: &str) -> Result<Option<ArtifactRecord>>;
}

/// Sled-backed [`Datastore`].
///
/// # Example
///
/// ```rust
/// use airlock_ledger::{Datastore, ReputationStatus, SledDatastore};
///
/// let store = SledDatastore::temporary().unwrap();
/// store.reputation_upsert("ab12", ReputationStatus::Malicious, &[]).unwrap();
/// let entry = store.reputation_upsert("ab12", ReputationStatus::Malicious, &[]).unwrap();
/// assert_eq!(entry.detection_count, 2);
/// ```
#[derive(Clone)]
pub struct SledDatastore {
    db: sled::Db,
    audit: sled::Tree,
    reputation: sled::Tree,
    rate_limits: sled::Tree,
    csv_rows: sled::Tree,
    artifacts: sled::Tree,
    last_rate_sweep: Arc<AtomicI64>,
}

impl SledDatastore {
    /// Opens or creates a database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the path is unusable or the
    /// database is corrupted.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_db(sled::open(path)?)
    }

    /// Creates an in-memory database, dropped with the value.
    pub fn temporary() -> Result<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: sled::Db) -> Result<Self> {
        Ok(Self {
            audit: db.open_tree(AUDIT_TREE)?,
            reputation: db.open_tree(REPUTATION_TREE)?,
            rate_limits: db.open_tree(RATE_LIMIT_TREE)?,
            csv_rows: db.open_tree(CSV_ROWS_TREE)?,
            artifacts: db.open_tree(ARTIFACT_TREE)?,
            last_rate_sweep: Arc::new(AtomicI64::new(0)),
            db,
        })
    }

    /// Flushes pending writes to disk.
    pub fn flush(&self) -> Result<usize> {
        Ok(self.db.flush()?)
    }

    /// Removes rate-limit keys with no timestamp newer than `cutoff`.
    ///
    /// A key refreshed concurrently fails its compare-and-swap and is kept.
    fn sweep_rate_limits(&self, cutoff: i64) -> Result<usize> {
        let mut removed = 0;
        for entry in self.rate_limits.iter() {
            let (key, value) = entry?;
            let expired = serde_json::from_slice::<Vec<i64>>(&value)
                .map(|hits| hits.iter().all(|t| *t <= cutoff))
                .unwrap_or(true);
            if expired
                && self
                    .rate_limits
                    .compare_and_swap(&key, Some(&value), None as Option<&[u8]>)?
                    .is_ok()
            {
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, "Swept expired rate-limit windows");
        }
        Ok(removed)
    }

    /// Record counts per tree, for status reporting.
    pub fn stats(&self) -> Result<LedgerStats> {
        let mut stats = LedgerStats {
            reputation_entries: self.reputation.len(),
            artifacts: self.artifacts.len(),
            ..LedgerStats::default()
        };
        for record in self.audit_records()? {
            stats.audits += 1;
            match record.status {
                AuditStatus::Processing => stats.processing += 1,
                AuditStatus::Sanitized => stats.sanitized += 1,
                AuditStatus::Rejected => stats.rejected += 1,
                AuditStatus::Error => stats.errors += 1,
            }
        }
        Ok(stats)
    }
}

/// Counts reported by [`SledDatastore::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerStats {
    pub audits: usize,
    pub processing: usize,
    pub sanitized: usize,
    pub rejected: usize,
    pub errors: usize,
    pub reputation_entries: usize,
    pub artifacts: usize,
}

impl std::fmt::Debug for SledDatastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledDatastore")
            .field("audits", &self.audit.len())
            .field("reputation", &self.reputation.len())
            .field("artifacts", &self.artifacts.len())
            .finish()
    }
}

impl Datastore for SledDatastore {
    fn record_audit_start(
        &self,
        request_id: &str,
        client_id: &str,
        filename: &str,
        size: u64,
    ) -> Result<()> {
        let record = AuditRecord {
            request_id: request_id.to_string(),
            client_id: client_id.to_string(),
            original_filename: filename.to_string(),
            status: AuditStatus::Processing,
            detected_mime: None,
            engine: None,
            findings: Vec::new(),
            file_size: size,
            file_hash: None,
            reason: None,
            started_at: Utc::now(),
            completed_at: None,
        };
        let bytes = serde_json::to_vec(&record)?;
        match self
            .audit
            .compare_and_swap(request_id.as_bytes(), None::<&[u8]>, Some(bytes))?
        {
            Ok(()) => {
                debug!(request_id, "Audit record opened");
                Ok(())
            }
            Err(_) => Err(LedgerError::AlreadyExists(request_id.to_string())),
        }
    }

    fn record_audit_end(&self, request_id: &str, close: AuditClose) -> Result<AuditRecord> {
        if !self.audit.contains_key(request_id.as_bytes())? {
            return Err(LedgerError::NotFound(request_id.to_string()));
        }
        let completed_at = Utc::now();

        let updated = self.audit.update_and_fetch(request_id.as_bytes(), |old| {
            let old = old?;
            let mut record: AuditRecord = match serde_json::from_slice(old) {
                Ok(record) => record,
                Err(_) => return Some(old.to_vec()),
            };
            if record.status != AuditStatus::Processing {
                return Some(old.to_vec());
            }
            record.status = close.status.unwrap_or(AuditStatus::Error);
            record.detected_mime = close.detected_mime.clone().or(record.detected_mime);
            record.engine = close.engine.clone().or(record.engine);
            record.findings = close.findings.clone();
            record.file_size = close.file_size.unwrap_or(record.file_size);
            record.file_hash = close.file_hash.clone();
            record.reason = close.reason.clone();
            record.completed_at = Some(completed_at);
            Some(serde_json::to_vec(&record).unwrap_or_else(|_| old.to_vec()))
        })?;

        let bytes = updated.ok_or_else(|| LedgerError::NotFound(request_id.to_string()))?;
        let record: AuditRecord = serde_json::from_slice(&bytes)?;
        if record.completed_at != Some(completed_at) {
            warn!(request_id, "Audit record was already closed");
        }
        Ok(record)
    }

    fn audit_record(&self, request_id: &str) -> Result<Option<AuditRecord>> {
        match self.audit.get(request_id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn audit_records(&self) -> Result<Vec<AuditRecord>> {
        let mut records = Vec::new();
        for result in self.audit.iter() {
            let (_, bytes) = result?;
            records.push(serde_json::from_slice(&bytes)?);
        }
        Ok(records)
    }

    fn reputation_lookup(&self, hash: &str) -> Result<ReputationEntry> {
        match self.reputation.get(hash.as_bytes())? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(ReputationEntry::unknown(hash)),
        }
    }

    fn reputation_upsert(
        &self,
        hash: &str,
        status: ReputationStatus,
        findings: &[Finding],
    ) -> Result<ReputationEntry> {
        let now = Utc::now();
        let updated = self.reputation.update_and_fetch(hash.as_bytes(), |old| {
            let mut entry = old
                .and_then(|bytes| serde_json::from_slice::<ReputationEntry>(bytes).ok())
                .unwrap_or_else(|| ReputationEntry::unknown(hash));
            // A malicious verdict is never downgraded
            if entry.status != ReputationStatus::Malicious {
                entry.status = status;
            }
            if !findings.is_empty() {
                entry.findings = findings.to_vec();
            }
            entry.detection_count += 1;
            entry.first_seen.get_or_insert(now);
            entry.last_seen = Some(now);
            serde_json::to_vec(&entry)
                .ok()
                .or_else(|| old.map(<[u8]>::to_vec))
        })?;

        let bytes = updated.ok_or_else(|| LedgerError::NotFound(hash.to_string()))?;
        let entry: ReputationEntry = serde_json::from_slice(&bytes)?;
        debug!(hash, status = ?entry.status, count = entry.detection_count, "Reputation updated");
        Ok(entry)
    }

    fn rate_limit_check_and_record(
        &self,
        identifier: &str,
        limit: u32,
        window: Duration,
    ) -> Result<bool> {
        let now = Utc::now().timestamp_millis();
        let cutoff = now - window.as_millis() as i64;
        let limit = limit as usize;

        let live = |bytes: Option<&[u8]>| -> Vec<i64> {
            bytes
                .and_then(|b| serde_json::from_slice::<Vec<i64>>(b).ok())
                .unwrap_or_default()
                .into_iter()
                .filter(|t| *t > cutoff)
                .collect()
        };

        let previous = self.rate_limits.fetch_and_update(identifier.as_bytes(), |old| {
            let mut hits = live(old);
            if hits.len() < limit {
                hits.push(now);
            }
            if hits.is_empty() {
                return None;
            }
            serde_json::to_vec(&hits).ok()
        })?;

        let last = self.last_rate_sweep.load(Ordering::Relaxed);
        if now - last >= window.as_millis() as i64
            && self
                .last_rate_sweep
                .compare_exchange(last, now, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
        {
            self.sweep_rate_limits(cutoff)?;
        }

        Ok(live(previous.as_deref()).len() < limit)
    }

    fn commit_rows(&self, batch_id: &str, headers: &[String], rows: &[StagedRow]) -> Result<usize> {
        let mut batch = sled::Batch::default();
        batch.insert(format!("{}/h", batch_id).as_bytes(), serde_json::to_vec(headers)?);
        for row in rows {
            let key = format!("{}/r/{:010}", batch_id, row.row_number);
            batch.insert(key.as_bytes(), serde_json::to_vec(row)?);
        }
        self.csv_rows.apply_batch(batch)?;
        debug!(batch_id, rows = rows.len(), "CSV rows committed");
        Ok(rows.len())
    }

    fn committed_rows(&self, batch_id: &str) -> Result<Vec<StagedRow>> {
        let prefix = format!("{}/r/", batch_id);
        let mut rows = Vec::new();
        for result in self.csv_rows.scan_prefix(prefix.as_bytes()) {
            let (_, bytes) = result?;
            rows.push(serde_json::from_slice(&bytes)?);
        }
        Ok(rows)
    }

    fn register_artifact(&self, record: &ArtifactRecord) -> Result<()> {
        let bytes = serde_json::to_vec(record)?;
        match self
            .artifacts
            .compare_and_swap(record.id.as_bytes(), None::<&[u8]>, Some(bytes))?
        {
            Ok(()) => Ok(()),
            Err(_) => Err(LedgerError::AlreadyExists(record.id.clone())),
        }
    }

    fn lookup_artifact(&self, id: &str) -> Result<Option<ArtifactRecord>> {
        match self.artifacts.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}
