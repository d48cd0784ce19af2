//! Raster image checks: header-only dimension guard and GIF animation detection

use std::io::Cursor;
use std::sync::LazyLock;

use image::ImageReader;
use regex::bytes::Regex;
use serde::{Deserialize, Serialize};

use crate::models::{Category, Finding, ScanError};

/// Graphic control extension followed by an image descriptor.
static GIF_FRAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s-u)\x00\x21\xF9\x04.{4}\x00\x2C").expect("static GIF frame regex")
});

/// Geometry and size ceilings for images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageLimits {
    pub max_width: u32,
    pub max_height: u32,
    pub max_pixels: u64,
    pub max_bytes: u64,
}

impl Default for ImageLimits {
    fn default() -> Self {
        Self {
            max_width: 4000,
            max_height: 4000,
            max_pixels: 10_000_000,
            max_bytes: 5 * 1024 * 1024,
        }
    }
}

/// Reads width and height from the image header without decoding pixels.
///
/// # Errors
///
/// Returns [`ScanError::ImageHeader`] if the format is unknown or the header
/// cannot be decoded.
pub fn probe_dimensions(bytes: &[u8]) -> Result<(u32, u32), ScanError> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ScanError::ImageHeader(e.to_string()))?
        .into_dimensions()
        .map_err(|e| ScanError::ImageHeader(e.to_string()))
}

/// Checks dimensions against `limits`. Every violation is critical.
pub fn dimension_findings(width: u32, height: u32, limits: &ImageLimits) -> Vec<Finding> {
    let mut findings = Vec::new();
    if width > limits.max_width {
        findings.push(Finding::critical(
            Category::Dimension,
            format!("Width {} exceeds maximum {}", width, limits.max_width),
        ));
    }
    if height > limits.max_height {
        findings.push(Finding::critical(
            Category::Dimension,
            format!("Height {} exceeds maximum {}", height, limits.max_height),
        ));
    }
    let pixels = u64::from(width) * u64::from(height);
    if pixels > limits.max_pixels {
        findings.push(Finding::critical(
            Category::Dimension,
            format!("Total pixels {} exceed maximum {}", pixels, limits.max_pixels),
        ));
    }
    findings
}

/// Counts GIF frame markers in the raw bytes.
pub fn gif_frame_markers(bytes: &[u8]) -> usize {
    GIF_FRAME.find_iter(bytes).count()
}

/// Returns an info finding when a GIF carries more than one frame.
pub fn animation_finding(bytes: &[u8]) -> Option<Finding> {
    let frames = gif_frame_markers(bytes);
    (frames > 1).then(|| {
        Finding::info(
            Category::Dimension,
            format!("Animated GIF with {} frames; only the first is kept", frames),
        )
    })
}
