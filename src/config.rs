use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Chunk-size selector values exposed to users
pub const CHUNK_SIZE_CHOICES: &[&str] = &["256K", "512K", "1M", "2M", "4M", "8M", "16M"];

/// Parse a chunk-size selector ("256K", "4M", ...) into bytes
pub fn parse_chunk_size(s: &str) -> Option<u64> {
    let normalized = s.trim().to_uppercase();
    let (digits, unit) = normalized.split_at(normalized.len().checked_sub(1)?);
    let value: u64 = digits.parse().ok()?;
    let bytes = match unit {
        "K" => value.checked_mul(1024)?,
        "M" => value.checked_mul(1024 * 1024)?,
        _ => return None,
    };
    CHUNK_SIZE_CHOICES
        .contains(&normalized.as_str())
        .then_some(bytes)
}

/// Engine configuration stored as JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Base URL of the upload control plane
    pub api_base: String,
    /// Default chunk size selector
    pub chunk_size: String,
    /// Default number of concurrent chunk transfers (1..=8)
    pub concurrency: usize,
    /// Whether to adapt the chunk size from network diagnostics
    pub auto_tune: bool,
    /// Default storage provider (s3, google_drive, gcs)
    pub storage_type: String,
    /// Whether to write logs to file
    pub log_to_file: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:8080".to_string(),
            chunk_size: "1M".to_string(),
            concurrency: 3,
            auto_tune: false,
            storage_type: "s3".to_string(),
            log_to_file: true,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file, falling back to defaults when
    /// the file does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse config from {}", path.display()))
    }

    /// Write configuration as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)
            .with_context(|| format!("failed to write config to {}", path.display()))
    }
}
