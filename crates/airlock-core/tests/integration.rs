//! # Airlock Integration Tests
//!
//! End-to-end runs of clean files through the gateway.
//!
//! | Property | Test |
//! |----------|------|
//! | Clean CSV is committed and stored | `test_clean_csv_accepted` |
//! | Accepted PDF re-scans clean | `test_clean_pdf_rescans_clean` |
//! | Accepted image decodes under the pixel ceiling | `test_clean_png_decodes_under_ceiling` |
//! | Sanitizing sanitized output is accepted again | `test_idempotent_on_clean_input` |
//! | Concurrent uploads never share a name | `test_concurrent_uploads_unique_tokens` |
//! | One audit record per upload | `test_audit_record_closed_once` |

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use airlock_core::{
    AirlockError, AuditStatus, Engine, RequestContext, UploadCandidate, UploadStatus,
};
use airlock_ledger::ReputationStatus;
use airlock_scan::image::probe_dimensions;
use airlock_scan::{has_critical, ObjectGraph, SemanticScanner};
use common::{clean_pdf, gateway, png, quarantine_len, test_config, FakeTools};
use tempfile::TempDir;

// =============================================================================
// CLEAN FILES
// =============================================================================

#[tokio::test]
async fn test_clean_csv_accepted() {
    let dir = TempDir::new().unwrap();
    let gw = gateway(test_config(&dir), FakeTools::new());
    let ctx = RequestContext::new("client-1");
    let body = b"name,email,salary\nalice,alice@example.com,100\nbob,bob@example.com,250\n";

    let outcome = gw.process(&ctx, UploadCandidate::new("people.csv", body.to_vec())).await;

    assert_eq!(outcome.status, UploadStatus::Accepted, "{:?}", outcome);
    assert_eq!(outcome.engine, Some(Engine::Csv));
    assert_eq!(outcome.committed_rows, 2);
    assert_eq!(gw.datastore().committed_rows(&ctx.request_id).unwrap().len(), 2);

    let delivery = gw.fetch(outcome.artifact_id.as_deref().unwrap()).unwrap();
    assert_eq!(delivery.header("Content-Type"), Some("text/csv"));
    assert!(delivery.bytes.starts_with(b"name,email,salary"));
    assert_eq!(quarantine_len(&dir), 0);
}

#[tokio::test]
async fn test_clean_pdf_rescans_clean() {
    let dir = TempDir::new().unwrap();
    let tools = FakeTools::new();
    let gw = gateway(test_config(&dir), tools.clone());

    let outcome = gw
        .process(&RequestContext::new("c"), UploadCandidate::new("report.pdf", clean_pdf()))
        .await;
    assert!(outcome.is_accepted(), "{:?}", outcome);
    assert!(tools.calls() >= 3, "dump, linearize and re-dump expected");

    let stored = gw.fetch(outcome.artifact_id.as_deref().unwrap()).unwrap().bytes;
    assert!(stored.starts_with(b"%PDF-"));
    let graph = ObjectGraph::from_qpdf_json(common::dump_for(&stored).as_bytes()).unwrap();
    assert!(!has_critical(&SemanticScanner::default().scan(&graph)));
}

#[tokio::test]
async fn test_clean_png_decodes_under_ceiling() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let ceiling = config.image.max_pixels;
    let gw = gateway(config, FakeTools::new());

    let outcome = gw
        .process(&RequestContext::new("c"), UploadCandidate::new("photo.PNG", png(64, 48)))
        .await;
    assert!(outcome.is_accepted(), "{:?}", outcome);

    let delivery = gw.fetch(outcome.artifact_id.as_deref().unwrap()).unwrap();
    let (w, h) = probe_dimensions(&delivery.bytes).unwrap();
    assert_eq!((w, h), (64, 48));
    assert!(u64::from(w) * u64::from(h) <= ceiling);
    image::load_from_memory(&delivery.bytes).unwrap();
}

#[tokio::test]
async fn test_idempotent_on_clean_input() {
    let dir = TempDir::new().unwrap();
    let gw = gateway(test_config(&dir), FakeTools::new());

    let inputs = [
        ("a.csv", b"city,country\nOslo,Norway\nLima,Peru\n".to_vec()),
        ("b.pdf", clean_pdf()),
        ("c.png", png(40, 40)),
    ];
    for (name, bytes) in inputs {
        let first = gw.process(&RequestContext::new("c"), UploadCandidate::new(name, bytes)).await;
        assert!(first.is_accepted(), "{}: {:?}", name, first);

        let stored = gw.fetch(first.artifact_id.as_deref().unwrap()).unwrap().bytes;
        let second = gw.process(&RequestContext::new("c"), UploadCandidate::new(name, stored)).await;
        assert!(second.is_accepted(), "{} second pass: {:?}", name, second);
    }
}

// =============================================================================
// CONCURRENCY
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_uploads_unique_tokens() {
    let dir = TempDir::new().unwrap();
    let gw = Arc::new(gateway(test_config(&dir), FakeTools::new()));

    let mut handles = Vec::new();
    for i in 0..8u32 {
        let gw = gw.clone();
        handles.push(tokio::spawn(async move {
            let ctx = RequestContext::new(format!("client-{}", i));
            gw.process(&ctx, UploadCandidate::new("p.png", png(32 + i, 32))).await
        }));
    }

    let mut ids = HashSet::new();
    for handle in handles {
        let outcome = handle.await.unwrap();
        assert!(outcome.is_accepted(), "{:?}", outcome);
        assert!(ids.insert(outcome.artifact_id.unwrap()));
    }
    assert_eq!(ids.len(), 8);
    assert_eq!(std::fs::read_dir(dir.path().join("final")).unwrap().count(), 8);
}

// =============================================================================
// AUDIT AND REPUTATION
// =============================================================================

#[tokio::test]
async fn test_audit_record_closed_once() {
    let dir = TempDir::new().unwrap();
    let gw = gateway(test_config(&dir), FakeTools::new());
    let ctx = RequestContext::new("c");

    let outcome = gw
        .process(&ctx, UploadCandidate::new("report.pdf", clean_pdf()))
        .await;
    let record = gw.audit_record(&ctx.request_id).unwrap().unwrap();

    assert_eq!(record.status, AuditStatus::Sanitized);
    assert_eq!(record.detected_mime.as_deref(), Some("application/pdf"));
    assert_eq!(record.file_hash, outcome.sanitized_hash);
    assert!(record.findings.iter().any(|f| f.description.contains("changed size")));
    assert_eq!(gw.datastore().audit_records().unwrap().len(), 1);

    let hash = outcome.sanitized_hash.unwrap();
    let reputation = gw.datastore().reputation_lookup(&hash).unwrap();
    assert_eq!(reputation.status, ReputationStatus::Safe);
}

#[tokio::test]
async fn test_reusing_request_id_is_refused() {
    let dir = TempDir::new().unwrap();
    let gw = gateway(test_config(&dir), FakeTools::new());
    let ctx = RequestContext::new("c").with_request_id("fixed");

    let first = gw.process(&ctx, UploadCandidate::new("a.csv", b"x,y\n1,2\n3,4\n".to_vec())).await;
    assert!(first.is_accepted(), "{:?}", first);
    let second = gw.process(&ctx, UploadCandidate::new("a.csv", b"x,y\n1,2\n3,4\n".to_vec())).await;
    assert_eq!(second.status, UploadStatus::Error);

    let record = gw.audit_record("fixed").unwrap().unwrap();
    assert_eq!(record.status, AuditStatus::Sanitized);
}

// =============================================================================
// DELIVERY
// =============================================================================

#[tokio::test]
async fn test_fetch_validates_ids() {
    let dir = TempDir::new().unwrap();
    let gw = gateway(test_config(&dir), FakeTools::new());

    assert!(matches!(gw.fetch("../../etc/passwd"), Err(AirlockError::InvalidArtifactId)));
    assert!(matches!(
        gw.fetch("0123456789abcdef0123456789ABCDEF"),
        Err(AirlockError::InvalidArtifactId)
    ));
    assert!(matches!(
        gw.fetch("0123456789abcdef0123456789abcdef"),
        Err(AirlockError::ArtifactNotFound(_))
    ));
}

#[tokio::test]
async fn test_tampered_artifact_fails_integrity() {
    let dir = TempDir::new().unwrap();
    let gw = gateway(test_config(&dir), FakeTools::new());
    let outcome = gw
        .process(&RequestContext::new("c"), UploadCandidate::new("a.csv", b"k,v\na,1\nb,2\n".to_vec()))
        .await;
    let id = outcome.artifact_id.unwrap();

    std::fs::write(dir.path().join("final").join(format!("{}.csv", id)), b"k,v\n=1+1,x\n").unwrap();
    assert!(matches!(gw.fetch(&id), Err(AirlockError::Integrity(_))));
}

#[test]
fn test_features_cover_every_engine() {
    let dir = TempDir::new().unwrap();
    let gw = gateway(test_config(&dir), FakeTools::new());
    let features = gw.features();

    assert_eq!(features.len(), 3);
    assert!(features.iter().all(|(_, list)| !list.is_empty()));
    let pdf = &features.iter().find(|(e, _)| *e == Engine::Pdf).unwrap().1;
    assert!(pdf.iter().any(|f| f.name == "QPDF Sanitization"));
}
