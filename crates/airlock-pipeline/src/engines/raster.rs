//! Image pipeline: header checks, then a full decode and re-encode.
//!
//! Header dimensions are read before any pixel buffer is allocated. The
//! re-encoder is the authority: whatever was appended, hidden in metadata
//! or carried in later GIF frames does not survive it.

use std::path::PathBuf;
use std::sync::Arc;

use airlock_ledger::{discard, ArtifactStore};
use airlock_sandbox::{ProcessSandbox, ReencodeOptions, ToolPaths, Toolchain};
use airlock_scan::image::{animation_finding, dimension_findings, gif_frame_markers, probe_dimensions};
use airlock_scan::magic::verify_image_magic;
use airlock_scan::signatures::image_payload_scan;
use airlock_scan::{Category, Finding};
use async_trait::async_trait;
use image::ImageFormat;
use tracing::debug;

use super::reencode;
use crate::config::{ImageBackend, ImageConfig};
use crate::error::{PipelineError, Result};
use crate::pipeline::{Engine, Feature, Pipeline, Sanitized, StagedUpload};

/// The image pipeline.
pub struct ImagePipeline {
    config: ImageConfig,
    tools: ToolPaths,
    sandbox: Arc<dyn ProcessSandbox>,
}

/// Stored extension for a sniffed image MIME.
fn extension_for(mime: &str) -> Option<&'static str> {
    match mime {
        "image/jpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

impl ImagePipeline {
    pub fn new(config: ImageConfig, tools: ToolPaths, sandbox: Arc<dyn ProcessSandbox>) -> Self {
        Self {
            config,
            tools,
            sandbox,
        }
    }

    fn format_of(mime: &str) -> Result<ImageFormat> {
        ImageFormat::from_mime_type(mime)
            .ok_or_else(|| PipelineError::Policy(format!("No image codec for {}", mime)))
    }

    async fn reencode_native(&self, upload: &StagedUpload, store: &ArtifactStore, ext: &str) -> Result<PathBuf> {
        let format = Self::format_of(&upload.sniffed_mime)?;
        let bytes = reencode::reencode_with_timeout(
            upload.bytes.clone(),
            format,
            self.config.limits(),
            self.config.timeout(),
        )
        .await
        .map_err(|e| PipelineError::sanitization(format!("Re-encode failed: {}", e)))?;
        Ok(store.quarantine(&bytes, ext)?)
    }

    async fn reencode_vips(&self, upload: &StagedUpload, store: &ArtifactStore, ext: &str) -> Result<PathBuf> {
        let output = store.scratch_path(ext);
        let result = Toolchain::new(self.sandbox.as_ref(), &self.tools)
            .decode_and_reencode(&upload.path, &output, ReencodeOptions::default(), self.config.timeout())
            .await;
        match result {
            Ok(()) => Ok(output),
            Err(e) => {
                discard(&output);
                Err(PipelineError::sanitization(format!("Re-encode failed: {}", e)))
            }
        }
    }
}

#[async_trait]
impl Pipeline for ImagePipeline {
    fn engine(&self) -> Engine {
        Engine::Image
    }

    fn size_bounds(&self) -> (u64, u64) {
        (self.config.min_bytes, self.config.max_bytes)
    }

    fn accepts_mime(&self, mime: &str) -> bool {
        self.config.allowed_mimes.iter().any(|m| m == mime)
    }

    /// Dimension violations block alongside structure and reputation:
    /// decoding an oversized image is the attack.
    fn blocks(&self, finding: &Finding) -> bool {
        finding.is_critical()
            && matches!(
                finding.category,
                Category::Structural | Category::Dimension | Category::Reputation
            )
    }

    async fn validate(&self, upload: &StagedUpload) -> Result<Vec<Finding>> {
        if !self.accepts_mime(&upload.sniffed_mime) {
            return Err(PipelineError::Policy(format!(
                "Disallowed image type {}",
                upload.sniffed_mime
            )));
        }

        let mut findings = Vec::new();
        if !verify_image_magic(&upload.bytes, &upload.sniffed_mime) {
            findings.push(Finding::suspicious(
                Category::Structural,
                format!("Magic bytes do not match {}", upload.sniffed_mime),
            ));
        }

        let (width, height) = match probe_dimensions(&upload.bytes) {
            Ok(dims) => dims,
            Err(e) => {
                return Err(PipelineError::Structural {
                    reason: e.to_string(),
                    findings,
                })
            }
        };
        debug!(width, height, mime = %upload.sniffed_mime, "Image header read");
        findings.extend(dimension_findings(width, height, &self.config.limits()));

        if upload.sniffed_mime == "image/gif" {
            findings.extend(animation_finding(&upload.bytes));
        }
        findings.extend(image_payload_scan(&upload.bytes));
        Ok(findings)
    }

    async fn sanitize(&self, upload: &StagedUpload, store: &ArtifactStore) -> Result<Sanitized> {
        let ext = extension_for(&upload.sniffed_mime).ok_or_else(|| {
            PipelineError::Policy(format!("Disallowed image type {}", upload.sniffed_mime))
        })?;
        let output_path = match self.config.backend {
            ImageBackend::Native => self.reencode_native(upload, store, ext).await?,
            ImageBackend::Vips => self.reencode_vips(upload, store, ext).await?,
        };
        Ok(Sanitized {
            output_path,
            extension: ext.to_string(),
            mime: upload.sniffed_mime.clone(),
            notes: vec![Finding::info(
                Category::Content,
                "Re-encoded from decoded pixels; metadata and extra frames dropped",
            )],
            ..Sanitized::default()
        })
    }

    async fn verify(&self, sanitized: &Sanitized) -> Result<Vec<Finding>> {
        let raw = tokio::fs::read(&sanitized.output_path).await?;
        let limits = self.config.limits();
        let mut findings = Vec::new();

        if raw.len() as u64 > limits.max_bytes {
            findings.push(Finding::critical(
                Category::Dimension,
                format!("Re-encoded size {} exceeds maximum {}", raw.len(), limits.max_bytes),
            ));
        }
        if !verify_image_magic(&raw, &sanitized.mime) {
            findings.push(Finding::critical(
                Category::Structural,
                format!("Re-encoded output is not {}", sanitized.mime),
            ));
        }
        if sanitized.mime == "image/gif" && gif_frame_markers(&raw) > 1 {
            findings.push(Finding::critical(
                Category::Structural,
                "More than one GIF frame survived re-encoding",
            ));
        }

        let (width, height) = probe_dimensions(&raw)
            .map_err(|e| PipelineError::post_verification(e.to_string()))?;
        findings.extend(dimension_findings(width, height, &limits));

        let format = Self::format_of(&sanitized.mime)?;
        let decoded = tokio::task::spawn_blocking(move || reencode::decode(&raw, format, &limits))
            .await
            .map_err(|e| PipelineError::System(e.to_string()))?;
        if let Err(e) = decoded {
            return Err(PipelineError::post_verification(format!("Re-encoded output does not decode: {}", e)));
        }
        Ok(findings)
    }

    fn features(&self) -> Vec<Feature> {
        vec![
            Feature::new("Pixel Flood Guard", "Reads dimensions from the header before decoding."),
            Feature::new("Magic Byte Check", "Requires the file signature to match its type."),
            Feature::new("Re-encoding", "Rebuilds every image from decoded pixels."),
            Feature::new("Metadata Stripping", "Drops EXIF, ICC, comments and ancillary chunks."),
            Feature::new("Animation Flattening", "Keeps only the first GIF frame."),
            Feature::new("Isolated Quarantine", "Processes uploads outside the public web root."),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use airlock_ledger::sha256_hex;
    use airlock_sandbox::CommandSandbox;
    use airlock_scan::has_critical;
    use image::codecs::gif::GifEncoder;
    use image::{Delay, Frame, Rgba, RgbaImage};
    use std::io::Cursor;
    use tempfile::TempDir;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([1, 2, 3, 255]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn animated_gif(frames: u8) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut out);
            for i in 0..frames {
                let img = RgbaImage::from_pixel(16, 16, Rgba([i * 40, 0, 0, 255]));
                let frame = Frame::from_parts(img, 0, 0, Delay::from_numer_denom_ms(100, 1));
                encoder.encode_frame(frame).unwrap();
            }
        }
        out
    }

    fn staged(dir: &TempDir, bytes: &[u8], mime: &str) -> StagedUpload {
        let ext = extension_for(mime).unwrap_or("bin");
        let path = dir.path().join(format!("in.{}", ext));
        std::fs::write(&path, bytes).unwrap();
        StagedUpload {
            request_id: "r1".to_string(),
            original_filename: format!("upload.{}", ext),
            extension: ext.to_string(),
            sniffed_mime: mime.to_string(),
            path,
            bytes: bytes.to_vec(),
            sha256: sha256_hex(bytes),
        }
    }

    fn pipeline(config: ImageConfig) -> ImagePipeline {
        ImagePipeline::new(config, ToolPaths::default(), Arc::new(CommandSandbox::new()))
    }

    #[tokio::test]
    async fn test_png_round_trip() {
        let dir = TempDir::new().unwrap();
        let areas = ArtifactStore::new(dir.path().join("q"), dir.path().join("f")).unwrap();
        let images = pipeline(ImageConfig::default());
        let mut bytes = png(32, 32);
        bytes.extend_from_slice(b"<script>alert(1)</script>");
        let up = staged(&dir, &bytes, "image/png");

        let findings = images.validate(&up).await.unwrap();
        assert!(findings.iter().any(|f| f.description.contains("Script tag")));
        assert!(!findings.iter().any(|f| images.blocks(f)));

        let sanitized = images.sanitize(&up, &areas).await.unwrap();
        assert_eq!(sanitized.extension, "png");
        assert!(!has_critical(&images.verify(&sanitized).await.unwrap()));
        let out = std::fs::read(&sanitized.output_path).unwrap();
        assert!(!out.windows(7).any(|w| w == b"<script"));
    }

    #[tokio::test]
    async fn test_pixel_flood_blocks_before_decode() {
        let dir = TempDir::new().unwrap();
        let images = pipeline(ImageConfig {
            max_width: 16,
            ..ImageConfig::default()
        });
        let findings = images.validate(&staged(&dir, &png(64, 8), "image/png")).await.unwrap();
        assert!(findings
            .iter()
            .any(|f| f.category == Category::Dimension && images.blocks(f)));
    }

    #[tokio::test]
    async fn test_animated_gif_keeps_first_frame() {
        let dir = TempDir::new().unwrap();
        let areas = ArtifactStore::new(dir.path().join("q"), dir.path().join("f")).unwrap();
        let images = pipeline(ImageConfig::default());
        let up = staged(&dir, &animated_gif(3), "image/gif");

        let findings = images.validate(&up).await.unwrap();
        assert!(findings.iter().any(|f| f.description.contains("Animated GIF")));

        let sanitized = images.sanitize(&up, &areas).await.unwrap();
        let out = std::fs::read(&sanitized.output_path).unwrap();
        assert!(gif_frame_markers(&out) <= 1);
        assert!(images.verify(&sanitized).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_truncated_header_is_structural() {
        let dir = TempDir::new().unwrap();
        let images = pipeline(ImageConfig::default());
        let mut bytes = png(8, 8);
        bytes.truncate(12);
        let err = images.validate(&staged(&dir, &bytes, "image/png")).await.unwrap_err();
        assert!(matches!(err, PipelineError::Structural { .. }));
    }

    #[tokio::test]
    async fn test_disallowed_type_is_policy() {
        let dir = TempDir::new().unwrap();
        let images = pipeline(ImageConfig::default());
        let err = images
            .validate(&staged(&dir, b"BM fake bitmap", "image/bmp"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Policy(_)));
    }
}
