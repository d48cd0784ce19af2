//! Content signature scanning
//!
//! Byte-level scans over the *whole* upload, not just its header, so a payload
//! placed past the first few kilobytes is still seen.
//!
//! | Scan | Used by | Severity of a hit |
//! |------|---------|-------------------|
//! | [`binary_signature_scan`] | CSV | critical |
//! | [`image_payload_scan`] | Image | suspicious |
//! | [`pdf_keyword_scan`] | PDF | suspicious |
//!
//! Fixed signature sets are matched with one Aho-Corasick automaton per set;
//! the PDF keyword scan needs delimiters around each keyword and uses
//! per-keyword byte regexes instead.

use std::collections::HashSet;
use std::sync::LazyLock;

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use regex::bytes::Regex;
use tracing::debug;

use crate::models::{Category, Finding, Location, Severity};
use crate::pdf::{PdfKeyword, PDF_KEYWORDS};

/// A named byte signature.
#[derive(Debug, Clone, Copy)]
pub struct Signature {
    /// Short name used in findings.
    pub name: &'static str,
    /// Bytes to look for.
    pub bytes: &'static [u8],
}

/// Executable and script signatures that never belong in a CSV file.
///
/// The bare two-byte `MZ` is deliberately absent: it occurs in ordinary text.
pub const BINARY_SIGNATURES: &[Signature] = &[
    Signature { name: "ELF executable", bytes: b"\x7fELF" },
    Signature { name: "PE executable", bytes: b"MZ\x90\x00" },
    Signature { name: "PHP open tag", bytes: b"<?php" },
    Signature { name: "PHP short echo tag", bytes: b"<?=" },
    Signature { name: "Shebang", bytes: b"#!/" },
    Signature { name: "NUL byte", bytes: b"\x00" },
];

/// Script and execution markers looked for in raster files (case-insensitive).
pub const IMAGE_PAYLOAD_MARKERS: &[Signature] = &[
    Signature { name: "PHP open tag", bytes: b"<?php" },
    Signature { name: "PHP short tag", bytes: b"<? " },
    Signature { name: "Script tag", bytes: b"<script" },
    Signature { name: "JavaScript URI", bytes: b"javascript:" },
    Signature { name: "onload handler", bytes: b"onload=" },
    Signature { name: "onerror handler", bytes: b"onerror=" },
    Signature { name: "eval call", bytes: b"eval(" },
    Signature { name: "base64_decode call", bytes: b"base64_decode" },
];

/// Aho-Corasick matcher over a fixed signature set.
pub struct SignatureSet {
    signatures: &'static [Signature],
    automaton: AhoCorasick,
}

impl std::fmt::Debug for SignatureSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureSet")
            .field("signature_count", &self.signatures.len())
            .finish_non_exhaustive()
    }
}

impl SignatureSet {
    /// Builds the automaton for `signatures`.
    ///
    /// # Errors
    ///
    /// Returns the builder error if the automaton cannot be constructed.
    pub fn build(
        signatures: &'static [Signature],
        case_insensitive: bool,
    ) -> Result<Self, aho_corasick::BuildError> {
        let automaton = AhoCorasickBuilder::new()
            .ascii_case_insensitive(case_insensitive)
            .match_kind(MatchKind::Standard)
            .build(signatures.iter().map(|s| s.bytes))?;
        Ok(Self { signatures, automaton })
    }

    /// Returns each distinct signature found, with the offset of its first
    /// occurrence, in order of appearance.
    pub fn find_all(&self, haystack: &[u8]) -> Vec<(&'static Signature, usize)> {
        let mut seen = HashSet::new();
        let mut hits = Vec::new();
        for m in self.automaton.find_overlapping_iter(haystack) {
            let index = m.pattern().as_usize();
            if seen.insert(index) {
                hits.push((&self.signatures[index], m.start()));
            }
            if seen.len() == self.signatures.len() {
                break;
            }
        }
        hits
    }
}

static BINARY_SET: LazyLock<SignatureSet> = LazyLock::new(|| {
    SignatureSet::build(BINARY_SIGNATURES, false).expect("static binary signature set")
});

static IMAGE_PAYLOAD_SET: LazyLock<SignatureSet> = LazyLock::new(|| {
    SignatureSet::build(IMAGE_PAYLOAD_MARKERS, true).expect("static payload marker set")
});

/// One delimited, case-insensitive regex per PDF keyword:
/// `[whitespace or /] KEY [whitespace, /, [ or <]`.
static PDF_KEYWORD_REGEXES: LazyLock<Vec<(&'static PdfKeyword, Regex)>> = LazyLock::new(|| {
    PDF_KEYWORDS
        .iter()
        .map(|keyword| {
            let bare = regex::escape(keyword.name.trim_start_matches('/'));
            let pattern = format!(r"(?i-u)[\s/]{}[\s/\[<]", bare);
            let regex = Regex::new(&pattern).expect("static keyword regex");
            (keyword, regex)
        })
        .collect()
});

/// Scans for executable and script signatures anywhere in the content.
///
/// Every hit is a critical content finding.
pub fn binary_signature_scan(bytes: &[u8]) -> Vec<Finding> {
    BINARY_SET
        .find_all(bytes)
        .into_iter()
        .map(|(signature, offset)| {
            debug!(signature = signature.name, offset, "Binary signature detected");
            Finding::critical(
                Category::Content,
                format!("{} detected in file content", signature.name),
            )
            .at(Location::Offset { offset })
        })
        .collect()
}

/// Scans a raster file for script and execution markers.
///
/// Hits are suspicious signals; the re-encoder is the authority.
pub fn image_payload_scan(bytes: &[u8]) -> Vec<Finding> {
    IMAGE_PAYLOAD_SET
        .find_all(bytes)
        .into_iter()
        .map(|(signature, offset)| {
            debug!(marker = signature.name, offset, "Image payload marker detected");
            Finding::suspicious(
                Category::Content,
                format!("Payload marker found: {}", signature.name),
            )
            .at(Location::Offset { offset })
        })
        .collect()
}

/// Regex-scans raw PDF bytes for the dangerous keyword table.
///
/// Corroborates the semantic scan for occurrences the structure dump did not
/// decode. Hits are suspicious only: raw-byte regexes false-positive.
pub fn pdf_keyword_scan(bytes: &[u8]) -> Vec<Finding> {
    PDF_KEYWORD_REGEXES
        .iter()
        .filter_map(|(keyword, regex)| {
            regex.find(bytes).map(|m| {
                debug!(keyword = keyword.name, offset = m.start(), "Raw PDF keyword hit");
                Finding::new(
                    Category::Content,
                    Severity::Suspicious,
                    format!("Raw keyword hit for {}: {}", keyword.name, keyword.description),
                )
                .at(Location::Offset { offset: m.start() })
            })
        })
        .collect()
}
