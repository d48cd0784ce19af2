//! Request-scoped inputs to a gateway run.

use airlock_ledger::generate_token;

/// Who is uploading, and under which request id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Audit and CSV batch key. Unique per upload.
    pub request_id: String,
    /// Rate-limit identifier (session, API key, client address).
    pub client_id: String,
}

impl RequestContext {
    /// A context with a freshly generated request id.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            request_id: generate_token(),
            client_id: client_id.into(),
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }
}

/// One untrusted upload. Lives for a single request and is never persisted
/// as-is.
#[derive(Debug, Clone)]
pub struct UploadCandidate {
    pub bytes: Vec<u8>,
    /// Used for extension dispatch and the audit trail only.
    pub filename: String,
    /// Client-declared size; informational.
    pub declared_size: Option<u64>,
    /// Client-declared content type; never trusted.
    pub declared_content_type: Option<String>,
}

impl UploadCandidate {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        Self {
            declared_size: Some(bytes.len() as u64),
            bytes,
            filename: filename.into(),
            declared_content_type: None,
        }
    }

    pub fn with_declared_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.declared_content_type = Some(content_type.into());
        self
    }

    /// Actual size of the received bytes.
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Lowercased extension of the declared filename.
    pub fn extension(&self) -> Option<String> {
        std::path::Path::new(&self.filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
    }
}
