//! # Threat Scenarios
//!
//! Hostile uploads against the full gateway. Every test asserts the
//! rejection code and, where it matters, that nothing reached storage.

mod common;

use std::io::Cursor;

use airlock_core::{AuditStatus, RejectionKind, RequestContext, UploadCandidate, UploadStatus};
use airlock_ledger::ReputationStatus;
use airlock_sandbox::{SandboxError, ToolOutput};
use common::{animated_gif, clean_pdf, gateway, launch_pdf, png, quarantine_len, test_config, FakeTools};
use image::codecs::gif::GifDecoder;
use image::AnimationDecoder;
use tempfile::TempDir;

fn final_len(dir: &TempDir) -> usize {
    std::fs::read_dir(dir.path().join("final")).unwrap().count()
}

// =============================================================================
// ADMISSION AND DISPATCH
// =============================================================================

#[tokio::test]
async fn test_executable_renamed_to_pdf() {
    let dir = TempDir::new().unwrap();
    let tools = FakeTools::new();
    let gw = gateway(test_config(&dir), tools.clone());

    let mut exe = b"MZ\x90\x00\x03\x00\x00\x00\x04\x00\x00\x00\xff\xff\x00\x00".to_vec();
    exe.resize(512, 0);
    let outcome = gw.process(&RequestContext::new("c"), UploadCandidate::new("invoice.pdf", exe)).await;

    assert_eq!(outcome.rejection, Some(RejectionKind::MimeExtensionMismatch));
    assert_eq!(tools.calls(), 0, "no tool may see a mismatched file");
    assert_eq!(quarantine_len(&dir), 0);
    assert_eq!(final_len(&dir), 0);
}

#[tokio::test]
async fn test_disallowed_extension() {
    let dir = TempDir::new().unwrap();
    let gw = gateway(test_config(&dir), FakeTools::new());
    let ctx = RequestContext::new("c");

    let outcome = gw.process(&ctx, UploadCandidate::new("setup.exe", vec![0u8; 300])).await;

    assert_eq!(outcome.status, UploadStatus::Rejected);
    assert_eq!(outcome.rejection.unwrap().code(), "unsupported-extension");
    let record = gw.audit_record(&ctx.request_id).unwrap().unwrap();
    assert_eq!(record.status, AuditStatus::Rejected);
    assert!(record.reason.unwrap().starts_with("unsupported-extension"));
}

#[tokio::test]
async fn test_undersized_pdf() {
    let dir = TempDir::new().unwrap();
    let gw = gateway(test_config(&dir), FakeTools::new());

    let outcome = gw
        .process(&RequestContext::new("c"), UploadCandidate::new("t.pdf", b"%PDF-1.4\n%%EOF\n".to_vec()))
        .await;
    assert_eq!(outcome.rejection, Some(RejectionKind::SizeOutOfBounds));
}

#[tokio::test]
async fn test_rate_limit_denies_third_upload() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.gateway.rate_limit_per_minute = 2;
    let gw = gateway(config, FakeTools::new());

    let body = b"a,b\n1,2\n3,4\n".to_vec();
    for _ in 0..2 {
        let ok = gw.process(&RequestContext::new("noisy"), UploadCandidate::new("a.csv", body.clone())).await;
        assert!(ok.is_accepted(), "{:?}", ok);
    }
    let ctx = RequestContext::new("noisy");
    let denied = gw.process(&ctx, UploadCandidate::new("a.csv", body.clone())).await;
    assert_eq!(denied.rejection, Some(RejectionKind::RateLimited));
    assert_eq!(gw.audit_record(&ctx.request_id).unwrap().unwrap().status, AuditStatus::Rejected);

    let other = gw.process(&RequestContext::new("quiet"), UploadCandidate::new("a.csv", body)).await;
    assert!(other.is_accepted(), "limits are per client");
}

// =============================================================================
// CSV
// =============================================================================

#[tokio::test]
async fn test_formula_injection_rejects_batch() {
    let dir = TempDir::new().unwrap();
    let gw = gateway(test_config(&dir), FakeTools::new());
    let ctx = RequestContext::new("c");
    let body = b"item,total\nwidget,10\nevil,=SUM(A1:A9)\nother,4\n".to_vec();

    let outcome = gw.process(&ctx, UploadCandidate::new("orders.csv", body)).await;

    assert_eq!(outcome.rejection, Some(RejectionKind::Sanitization));
    assert_eq!(outcome.committed_rows, 0);
    assert!(gw.datastore().committed_rows(&ctx.request_id).unwrap().is_empty());
    assert_eq!(final_len(&dir), 0);
    let record = gw.audit_record(&ctx.request_id).unwrap().unwrap();
    assert!(record.findings.iter().any(|f| f.description.contains("formula injection")));
}

#[tokio::test]
async fn test_csv_with_php_payload_is_a_threat() {
    let dir = TempDir::new().unwrap();
    let gw = gateway(test_config(&dir), FakeTools::new());

    let body = b"name,note\nbob,<?php system($_GET['c']); ?>\n".to_vec();
    let outcome = gw.process(&RequestContext::new("c"), UploadCandidate::new("notes.csv", body)).await;

    assert_eq!(outcome.rejection, Some(RejectionKind::Threat));
    assert!(outcome.findings.critical >= 1);
}

// =============================================================================
// PDF
// =============================================================================

#[tokio::test]
async fn test_launch_action_fails_post_verification() {
    let dir = TempDir::new().unwrap();
    let gw = gateway(test_config(&dir), FakeTools::new());
    let bytes = launch_pdf();
    let hash = airlock_ledger::sha256_hex(&bytes);

    let first = gw.process(&RequestContext::new("c"), UploadCandidate::new("doc.pdf", bytes.clone())).await;
    assert_eq!(first.rejection, Some(RejectionKind::PostVerification));
    assert_eq!(final_len(&dir), 0);
    assert_eq!(
        gw.datastore().reputation_lookup(&hash).unwrap().status,
        ReputationStatus::Malicious
    );

    let second = gw.process(&RequestContext::new("c"), UploadCandidate::new("doc.pdf", bytes)).await;
    assert_eq!(second.rejection, Some(RejectionKind::Threat), "known-bad hash short-circuits");
    assert_eq!(quarantine_len(&dir), 0);
}

#[tokio::test]
async fn test_flatten_fallback_recovers_document() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.pdf.flatten_fallback = true;
    let gw = gateway(config, FakeTools::new());
    let ctx = RequestContext::new("c");

    let outcome = gw.process(&ctx, UploadCandidate::new("doc.pdf", launch_pdf())).await;
    assert!(outcome.is_accepted(), "{:?}", outcome);

    let stored = gw.fetch(outcome.artifact_id.as_deref().unwrap()).unwrap().bytes;
    assert_eq!(stored, clean_pdf());
    let record = gw.audit_record(&ctx.request_id).unwrap().unwrap();
    assert!(record.findings.iter().any(|f| f.is_critical()), "first-pass failure is audited");
    assert_eq!(quarantine_len(&dir), 0);
}

#[tokio::test]
async fn test_qpdf_crash_is_a_sanitization_failure() {
    struct Crashing;

    #[async_trait::async_trait]
    impl airlock_core::ProcessSandbox for Crashing {
        async fn run(&self, inv: &airlock_sandbox::Invocation) -> airlock_sandbox::Result<ToolOutput> {
            if inv.has_arg("--json") {
                let bytes = std::fs::read(&inv.args[1])?;
                Ok(ToolOutput::success(common::dump_for(&bytes)))
            } else {
                Err(SandboxError::TimedOut {
                    program: inv.program.clone(),
                    timeout_ms: 5_000,
                })
            }
        }
    }

    let dir = TempDir::new().unwrap();
    let datastore = std::sync::Arc::new(airlock_core::SledDatastore::temporary().unwrap());
    let gw = airlock_core::Gateway::with_collaborators(
        test_config(&dir),
        datastore,
        std::sync::Arc::new(Crashing),
    )
    .unwrap();

    let outcome = gw.process(&RequestContext::new("c"), UploadCandidate::new("a.pdf", clean_pdf())).await;
    assert_eq!(outcome.rejection, Some(RejectionKind::Sanitization));
    assert_eq!(quarantine_len(&dir), 0);
}

// =============================================================================
// IMAGES
// =============================================================================

#[tokio::test]
async fn test_animated_gif_flattened() {
    let dir = TempDir::new().unwrap();
    let gw = gateway(test_config(&dir), FakeTools::new());

    let outcome = gw
        .process(&RequestContext::new("c"), UploadCandidate::new("anim.gif", animated_gif(3)))
        .await;
    assert!(outcome.is_accepted(), "{:?}", outcome);

    let stored = gw.fetch(outcome.artifact_id.as_deref().unwrap()).unwrap().bytes;
    assert!(!stored.windows(11).any(|w| w == b"NETSCAPE2.0"));
    let frames = GifDecoder::new(Cursor::new(stored)).unwrap().into_frames().count();
    assert_eq!(frames, 1);
}

#[tokio::test]
async fn test_pixel_flood_rejected_before_decode() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.image.max_width = 16;
    let gw = gateway(config, FakeTools::new());

    let outcome = gw.process(&RequestContext::new("c"), UploadCandidate::new("big.png", png(64, 64))).await;
    assert_eq!(outcome.rejection, Some(RejectionKind::Structural));
    assert_eq!(final_len(&dir), 0);
}

#[tokio::test]
async fn test_polyglot_png_payload_stripped() {
    let dir = TempDir::new().unwrap();
    let gw = gateway(test_config(&dir), FakeTools::new());
    let ctx = RequestContext::new("c");
    let mut bytes = png(48, 48);
    bytes.extend_from_slice(b"<?php echo shell_exec($_GET['x']); ?>");

    let outcome = gw.process(&ctx, UploadCandidate::new("avatar.png", bytes)).await;
    assert!(outcome.is_accepted(), "{:?}", outcome);
    assert!(outcome.findings.suspicious >= 1, "payload is still reported");

    let stored = gw.fetch(outcome.artifact_id.as_deref().unwrap()).unwrap().bytes;
    assert!(!stored.windows(5).any(|w| w == b"<?php"));
    image::load_from_memory(&stored).unwrap();
}

// =============================================================================
// DISCLOSURE
// =============================================================================

#[tokio::test]
async fn test_production_messages_are_generic() {
    let dir = TempDir::new().unwrap();
    let gw = gateway(test_config(&dir), FakeTools::new());

    let outcome = gw.process(&RequestContext::new("c"), UploadCandidate::new("x.exe", vec![1u8; 200])).await;
    assert_eq!(outcome.message, "File type not allowed");

    let body = b"item,total\nevil,=cmd|' /C calc'!A0\n".to_vec();
    let outcome = gw.process(&RequestContext::new("c"), UploadCandidate::new("o.csv", body)).await;
    assert!(!outcome.message.contains("Row"), "{}", outcome.message);
    assert!(!outcome.message.contains(dir.path().to_str().unwrap()));
}

#[tokio::test]
async fn test_development_messages_carry_reason() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.gateway.production_mode = false;
    let gw = gateway(config, FakeTools::new());

    let outcome = gw.process(&RequestContext::new("c"), UploadCandidate::new("x.exe", vec![1u8; 200])).await;
    assert!(outcome.message.starts_with("File type not allowed ("));
    assert!(outcome.message.contains("\"exe\""));
}
