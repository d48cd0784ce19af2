//! Magic byte inspection
//!
//! Identifies the true type of an upload from its content alone. The client's
//! filename and `Content-Type` are never consulted here; the gateway compares
//! what this module reports against what the extension promises.

use std::sync::LazyLock;

/// MIME reported for content no matcher recognizes.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// How many leading bytes the text heuristic inspects.
const TEXT_SNIFF_WINDOW: usize = 8192;

/// Raster signatures: (offset, bytes, mime).
///
/// WEBP needs two entries: `RIFF` at 0 and `WEBP` at 8.
static IMAGE_MAGIC: LazyLock<Vec<(usize, &'static [u8], &'static str)>> = LazyLock::new(|| {
    vec![
        (0, &[0xFF, 0xD8, 0xFF], "image/jpeg"),
        (0, &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A], "image/png"),
        (0, b"GIF87a", "image/gif"),
        (0, b"GIF89a", "image/gif"),
        (8, b"WEBP", "image/webp"),
    ]
});

/// Sniffs the MIME type of `bytes`.
///
/// Binary formats are recognized by the `infer` matchers. Content without a
/// binary signature that reads as text is classified as `text/csv` when its
/// first line is delimited and `text/plain` otherwise. Anything else is
/// [`OCTET_STREAM`].
///
/// # Example
///
/// ```rust
/// use airlock_scan::magic::sniff_mime;
///
/// assert_eq!(sniff_mime(b"%PDF-1.7\n"), "application/pdf");
/// assert_eq!(sniff_mime(b"name,email\nbob,b@x.io\n"), "text/csv");
/// assert_ne!(sniff_mime(b"MZ\x90\x00\x03\x00\x00\x00"), "application/pdf");
/// ```
pub fn sniff_mime(bytes: &[u8]) -> String {
    if let Some(kind) = infer::get(bytes) {
        return kind.mime_type().to_string();
    }

    if looks_textual(bytes) {
        if first_line_is_delimited(bytes) {
            return "text/csv".to_string();
        }
        return "text/plain".to_string();
    }

    OCTET_STREAM.to_string()
}

/// True when the sniff window holds no NUL and no C0 control bytes other
/// than tab, LF, FF and CR. High bytes are allowed; encoding is judged later.
fn looks_textual(bytes: &[u8]) -> bool {
    if bytes.is_empty() {
        return false;
    }
    let window = &bytes[..bytes.len().min(TEXT_SNIFF_WINDOW)];
    window
        .iter()
        .all(|&b| b >= 0x20 || matches!(b, b'\t' | b'\n' | b'\r' | 0x0C))
}

fn first_line_is_delimited(bytes: &[u8]) -> bool {
    let window = &bytes[..bytes.len().min(TEXT_SNIFF_WINDOW)];
    let line = window
        .split(|&b| b == b'\n')
        .next()
        .unwrap_or_default();
    line.iter().any(|&b| matches!(b, b',' | b';' | b'\t' | b'|'))
}

/// Returns the raster MIME whose signature `bytes` start with, if any.
pub fn image_mime_from_magic(bytes: &[u8]) -> Option<&'static str> {
    IMAGE_MAGIC
        .iter()
        .find(|(offset, signature, mime)| {
            let at = bytes.get(*offset..*offset + signature.len()) == Some(*signature);
            // WEBP also needs the RIFF container tag at 0
            if *mime == "image/webp" {
                at && bytes.starts_with(b"RIFF")
            } else {
                at
            }
        })
        .map(|(_, _, mime)| *mime)
}

/// Checks that `bytes` carry the signature of the expected raster `mime`.
pub fn verify_image_magic(bytes: &[u8], mime: &str) -> bool {
    image_mime_from_magic(bytes) == Some(mime)
}

/// Checks for the `%PDF-` header at offset 0.
#[inline]
pub fn has_pdf_header(bytes: &[u8]) -> bool {
    bytes.starts_with(b"%PDF-")
}
