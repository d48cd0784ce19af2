//! Serving accepted artifacts by opaque id.

use airlock_ledger::ArtifactRecord;

/// Headers every delivery carries regardless of type.
const FIXED_HEADERS: &[(&str, &str)] = &[
    ("X-Content-Type-Options", "nosniff"),
    ("Content-Security-Policy", "default-src 'none'; sandbox"),
    ("Cache-Control", "private"),
];

/// An artifact ready to hand to an HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: String,
    pub bytes: Vec<u8>,
    /// Generated download name; never the uploader's filename.
    pub filename: String,
    pub headers: Vec<(&'static str, String)>,
}

impl Delivery {
    pub(crate) fn new(record: &ArtifactRecord, bytes: Vec<u8>) -> Self {
        let filename = download_name(record);
        let mut headers = vec![
            ("Content-Type", record.mime.clone()),
            ("Content-Length", bytes.len().to_string()),
            (
                "Content-Disposition",
                format!("attachment; filename=\"{}\"", filename),
            ),
        ];
        headers.extend(FIXED_HEADERS.iter().map(|(k, v)| (*k, v.to_string())));
        Self {
            id: record.id.clone(),
            bytes,
            filename,
            headers,
        }
    }

    /// Looks up a header value, ignoring ASCII case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// `airlock-<engine>-<first 12 id chars>.<ext>`
fn download_name(record: &ArtifactRecord) -> String {
    let short: String = record.id.chars().take(12).collect();
    format!("airlock-{}-{}.{}", record.engine, short, record.extension)
}
