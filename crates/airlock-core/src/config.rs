//! Configuration types for Airlock.

use std::path::{Path, PathBuf};

use airlock_pipeline::{CsvConfig, ImageConfig, PdfConfig};
use airlock_sandbox::ToolPaths;
use serde::{Deserialize, Serialize};

use crate::{error::AirlockError, Result};

/// Top-level configuration, loaded from TOML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AirlockConfig {
    /// Admission and caller-facing settings.
    pub gateway: GatewayConfig,

    /// Database and storage areas.
    pub storage: StorageConfig,

    /// External tool locations.
    pub tools: ToolPaths,

    /// CSV pipeline.
    pub csv: CsvConfig,

    /// PDF pipeline.
    pub pdf: PdfConfig,

    /// Image pipeline.
    pub image: ImageConfig,
}

/// Gateway settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Uploads admitted per client in any sliding minute.
    pub rate_limit_per_minute: u32,

    /// Caller-facing messages are generic category text when set.
    pub production_mode: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_minute: 10,
            production_mode: true,
        }
    }
}

/// Where Airlock keeps its state. Both areas must sit outside any
/// web-served directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: PathBuf,
    pub quarantine_dir: PathBuf,
    pub final_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./airlock_data/ledger.db"),
            quarantine_dir: PathBuf::from("./airlock_data/quarantine"),
            final_dir: PathBuf::from("./airlock_data/final"),
        }
    }
}

impl AirlockConfig {
    /// Parses a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| AirlockError::Config(e.to_string()))
    }

    /// Loads a TOML file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Checks cross-field consistency.
    ///
    /// # Errors
    ///
    /// Returns [`AirlockError::Config`] naming the first bad setting.
    pub fn validate(&self) -> Result<()> {
        let bad = |msg: String| Err(AirlockError::Config(msg));

        if self.gateway.rate_limit_per_minute == 0 {
            return bad("gateway.rate_limit_per_minute must be at least 1".into());
        }
        for (section, min, max) in [
            ("csv", self.csv.min_bytes, self.csv.max_bytes),
            ("pdf", self.pdf.min_bytes, self.pdf.max_bytes),
            ("image", self.image.min_bytes, self.image.max_bytes),
        ] {
            if min > max {
                return bad(format!("{}.min_bytes ({}) exceeds max_bytes ({})", section, min, max));
            }
        }
        if self.csv.max_rows == 0 || self.csv.max_columns == 0 || self.csv.max_line_length == 0 {
            return bad("csv row, column and line limits must be positive".into());
        }
        if self.csv.max_errors == 0 {
            return bad("csv.max_errors must be at least 1".into());
        }
        if self.csv.formula_triggers.is_empty() {
            return bad("csv.formula_triggers must not be empty".into());
        }
        if self.pdf.timeout_secs == 0 || self.image.timeout_secs == 0 {
            return bad("tool timeouts must be at least one second".into());
        }
        if self.image.max_width == 0 || self.image.max_height == 0 || self.image.max_pixels == 0 {
            return bad("image dimension limits must be positive".into());
        }
        if self.storage.quarantine_dir == self.storage.final_dir {
            return bad("storage.quarantine_dir and storage.final_dir must differ".into());
        }
        Ok(())
    }
}
