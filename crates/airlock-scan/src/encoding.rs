//! Encoding validation for text cells
//!
//! A cell is accepted only if it is well-formed UTF-8, contains no overlong
//! sequence and no UTF-7 style escape run. Accepted cells come back in
//! Unicode Normalization Form C.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::models::{Category, Finding, Location};

/// `+...-` escape runs used to smuggle markup past UTF-8 filters.
static UTF7_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\+[A-Za-z0-9+/]+-").expect("static UTF-7 regex"));

/// Why a cell failed encoding validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingIssue {
    /// Not well-formed UTF-8.
    InvalidUtf8 { offset: usize },
    /// A UTF-8 sequence longer than the code point needs.
    Overlong { offset: usize },
    /// A UTF-7 style `+...-` escape run.
    Utf7Escape,
}

impl fmt::Display for EncodingIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodingIssue::InvalidUtf8 { offset } => {
                write!(f, "Invalid UTF-8 at byte {}", offset)
            }
            EncodingIssue::Overlong { offset } => {
                write!(f, "Overlong UTF-8 encoding at byte {}", offset)
            }
            EncodingIssue::Utf7Escape => write!(f, "UTF-7 escape sequence detected"),
        }
    }
}

impl EncodingIssue {
    /// Converts the issue into a critical finding located at a cell.
    pub fn to_finding(&self, row: usize, column: &str) -> Finding {
        Finding::critical(Category::Encoding, self.to_string()).at(Location::Cell {
            row,
            column: column.to_string(),
        })
    }
}

/// Validates a raw cell and returns its NFC form.
///
/// # Errors
///
/// Returns the first [`EncodingIssue`] found.
///
/// # Example
///
/// ```rust
/// use airlock_scan::encoding::{validate_and_normalize, EncodingIssue};
///
/// // "e" + combining acute accent composes to U+00E9
/// assert_eq!(validate_and_normalize(b"caf\x65\xcc\x81").unwrap(), "caf\u{e9}");
/// assert!(matches!(
///     validate_and_normalize(b"\xc0\xbc"),
///     Err(EncodingIssue::Overlong { offset: 0 })
/// ));
/// assert_eq!(validate_and_normalize(b"+ADw-script"), Err(EncodingIssue::Utf7Escape));
/// ```
pub fn validate_and_normalize(raw: &[u8]) -> Result<String, EncodingIssue> {
    let text = match std::str::from_utf8(raw) {
        Ok(text) => text,
        Err(e) => {
            if let Some(offset) = find_overlong(raw) {
                return Err(EncodingIssue::Overlong { offset });
            }
            return Err(EncodingIssue::InvalidUtf8 { offset: e.valid_up_to() });
        }
    };

    if UTF7_ESCAPE.is_match(text) {
        return Err(EncodingIssue::Utf7Escape);
    }

    Ok(text.nfc().collect())
}

/// Finds the first overlong UTF-8 lead sequence.
///
/// Overlong forms: lead bytes `C0`/`C1`, `E0` followed by a continuation below
/// `A0`, and `F0` followed by a continuation below `90`.
pub fn find_overlong(raw: &[u8]) -> Option<usize> {
    raw.iter().enumerate().find_map(|(i, &b)| {
        let next = raw.get(i + 1).copied();
        let overlong = match b {
            0xC0 | 0xC1 => true,
            0xE0 => matches!(next, Some(n) if (0x80..0xA0).contains(&n)),
            0xF0 => matches!(next, Some(n) if (0x80..0x90).contains(&n)),
            _ => false,
        };
        overlong.then_some(i)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_ascii_passes_unchanged() {
        assert_eq!(validate_and_normalize(b"alice@example.com").unwrap(), "alice@example.com");
    }

    #[test]
    fn test_nfc_normalization() {
        let decomposed = "Re\u{301}sume\u{301}";
        let normalized = validate_and_normalize(decomposed.as_bytes()).unwrap();
        assert_eq!(normalized, "R\u{e9}sum\u{e9}");
        assert!(normalized.len() < decomposed.len());
    }

    #[test]
    fn test_invalid_utf8() {
        assert_eq!(
            validate_and_normalize(b"ok\xffbad"),
            Err(EncodingIssue::InvalidUtf8 { offset: 2 })
        );
    }

    #[test]
    fn test_overlong_forms() {
        // '<' encoded in two and three bytes
        assert_eq!(find_overlong(b"a\xc0\xbc"), Some(1));
        assert_eq!(find_overlong(b"\xe0\x80\xbc"), Some(0));
        // '/' in four bytes
        assert_eq!(find_overlong(b"\xf0\x80\x80\xaf"), Some(0));
        // Legitimate three-byte sequence starting with E0
        assert_eq!(find_overlong("\u{0800}".as_bytes()), None);
    }

    #[test]
    fn test_utf7_escape_rejected() {
        assert_eq!(
            validate_and_normalize(b"+ADw-script+AD4-"),
            Err(EncodingIssue::Utf7Escape)
        );
        assert!(validate_and_normalize(b"1 + 2 = 3").is_ok());
    }

    #[test]
    fn test_issue_to_finding_location() {
        let finding = EncodingIssue::Utf7Escape.to_finding(4, "name");
        assert!(finding.is_critical());
        assert_eq!(
            finding.location,
            Some(Location::Cell { row: 4, column: "name".to_string() })
        );
    }
}
