//! In-process image re-encoding with decoder allocation limits.

use std::io::Cursor;
use std::time::Duration;

use airlock_scan::image::ImageLimits;
use image::{DynamicImage, ImageFormat, ImageReader, Limits};

/// Bytes per pixel of the widest decoded buffer (RGBA, 32-bit float).
const MAX_BYTES_PER_PIXEL: u64 = 16;

/// Decoder limits derived from the geometry ceilings.
pub fn decoder_limits(limits: &ImageLimits) -> Limits {
    let mut decoder = Limits::default();
    decoder.max_image_width = Some(limits.max_width);
    decoder.max_image_height = Some(limits.max_height);
    decoder.max_alloc = Some(limits.max_pixels.saturating_mul(MAX_BYTES_PER_PIXEL));
    decoder
}

/// Fully decodes the first frame of `bytes` under `limits`.
pub fn decode(bytes: &[u8], format: ImageFormat, limits: &ImageLimits) -> Result<DynamicImage, String> {
    let mut reader = ImageReader::with_format(Cursor::new(bytes), format);
    reader.limits(decoder_limits(limits));
    reader.decode().map_err(|e| format!("decode failed: {}", e))
}

/// Decodes and writes a fresh file in the same format.
///
/// Only pixels survive: ancillary chunks, EXIF, ICC profiles, comments,
/// extra frames and trailing bytes are not carried over.
pub fn reencode(bytes: &[u8], format: ImageFormat, limits: &ImageLimits) -> Result<Vec<u8>, String> {
    let image = decode(bytes, format, limits)?;
    let image = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8()),
        ImageFormat::Gif => DynamicImage::ImageRgba8(image.to_rgba8()),
        _ if image.color().has_alpha() => DynamicImage::ImageRgba8(image.to_rgba8()),
        _ => DynamicImage::ImageRgb8(image.to_rgb8()),
    };
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, format)
        .map_err(|e| format!("encode failed: {}", e))?;
    Ok(out.into_inner())
}

/// Runs [`reencode`] on the blocking pool under a wall-clock budget.
///
/// A decoder that overruns the budget cannot be interrupted; its thread
/// finishes in the background and the result is dropped.
pub async fn reencode_with_timeout(
    bytes: Vec<u8>,
    format: ImageFormat,
    limits: ImageLimits,
    timeout: Duration,
) -> Result<Vec<u8>, String> {
    let task = tokio::task::spawn_blocking(move || reencode(&bytes, format, &limits));
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(format!("re-encoder task failed: {}", join)),
        Err(_) => Err(format!("re-encoder exceeded {} ms", timeout.as_millis())),
    }
}
