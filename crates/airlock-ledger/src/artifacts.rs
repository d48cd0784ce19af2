//! Write-once storage areas for uploads
//!
//! Two directories, both meant to live outside any served document root:
//!
//! - **quarantine**: the raw upload and every intermediate tool output
//! - **final**: accepted, sanitized artifacts only
//!
//! File names are always fresh random tokens (UUIDv4, 122 random bits, as 32
//! lowercase hex) plus a fixed extension chosen by Airlock. Nothing derived
//! from the client's filename ever reaches a path. Files are created with
//! `create_new`, so an existing file is never overwritten.

use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{LedgerError, Result};

/// Length of an artifact id or storage token.
pub const TOKEN_LEN: usize = 32;

/// Generates a fresh storage token.
pub fn generate_token() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Checks that `id` is exactly 32 lowercase hex characters.
pub fn is_valid_token(id: &str) -> bool {
    id.len() == TOKEN_LEN && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// An artifact written to the final area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub id: String,
    pub path: PathBuf,
}

/// Quarantine and final storage areas.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    quarantine_dir: PathBuf,
    final_dir: PathBuf,
}

impl ArtifactStore {
    /// Creates both areas if needed (mode 0700 on Unix).
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Io`] if a directory cannot be created.
    pub fn new(quarantine_dir: impl Into<PathBuf>, final_dir: impl Into<PathBuf>) -> Result<Self> {
        let store = Self {
            quarantine_dir: quarantine_dir.into(),
            final_dir: final_dir.into(),
        };
        for dir in [&store.quarantine_dir, &store.final_dir] {
            fs::create_dir_all(dir)?;
            restrict(dir)?;
        }
        Ok(store)
    }

    pub fn quarantine_dir(&self) -> &Path {
        &self.quarantine_dir
    }

    pub fn final_dir(&self) -> &Path {
        &self.final_dir
    }

    /// Writes the raw upload under a fresh quarantine name.
    pub fn quarantine(&self, bytes: &[u8], extension: &str) -> Result<PathBuf> {
        let path = self.scratch_path(extension);
        write_new(&path, bytes)?;
        debug!(path = %path.display(), size = bytes.len(), "Quarantined upload");
        Ok(path)
    }

    /// A fresh, not-yet-created path in quarantine for a tool output.
    pub fn scratch_path(&self, extension: &str) -> PathBuf {
        self.quarantine_dir
            .join(format!("{}.{}", generate_token(), extension))
    }

    /// A fresh scratch directory in quarantine (for multi-file tool output).
    pub fn scratch_dir(&self) -> Result<PathBuf> {
        let dir = self.quarantine_dir.join(generate_token());
        fs::create_dir(&dir)?;
        Ok(dir)
    }

    /// Writes accepted bytes to the final area under a new artifact id.
    pub fn store_final(&self, bytes: &[u8], extension: &str) -> Result<StoredArtifact> {
        let id = generate_token();
        let path = self.final_path(&id, extension)?;
        write_new(&path, bytes)?;
        debug!(id = %id, size = bytes.len(), "Artifact promoted");
        Ok(StoredArtifact { id, path })
    }

    /// Reads an accepted artifact.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidArtifactId`] for a malformed id, and
    /// [`LedgerError::Io`] if the file is missing.
    pub fn read_final(&self, id: &str, extension: &str) -> Result<Vec<u8>> {
        let path = self.final_path(id, extension)?;
        Ok(fs::read(path)?)
    }

    /// Removes an accepted artifact (used when registration fails).
    pub fn remove_final(&self, id: &str, extension: &str) -> Result<()> {
        let path = self.final_path(id, extension)?;
        discard(&path);
        Ok(())
    }

    fn final_path(&self, id: &str, extension: &str) -> Result<PathBuf> {
        if !is_valid_token(id) || !extension.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(LedgerError::InvalidArtifactId);
        }
        Ok(self.final_dir.join(format!("{}.{}", id, extension)))
    }
}

/// Deletes a file or directory tree, ignoring "not found".
pub fn discard(path: &Path) {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    if let Err(e) = result {
        if e.kind() != ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to discard file");
        }
    }
}

fn write_new(path: &Path, bytes: &[u8]) -> Result<()> {
    create_with(path, |file| {
        file.write_all(bytes)?;
        file.sync_all()
    })
}

/// Creates `path` exclusively and fills it, removing the file if the fill fails.
fn create_with<F>(path: &Path, fill: F) -> Result<()>
where
    F: FnOnce(&mut File) -> io::Result<()>,
{
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    if let Err(e) = fill(&mut file) {
        drop(file);
        if let Err(cleanup) = fs::remove_file(path) {
            warn!(path = %path.display(), error = %cleanup, "Failed to remove partial file");
        }
        return Err(e.into());
    }
    Ok(())
}

#[cfg(unix)]
fn restrict(dir: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict(_dir: &Path) -> Result<()> {
    Ok(())
}
