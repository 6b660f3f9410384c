//! Daemon configuration.
//!
//! Read from `~/.fgp/services/recorder/config.json` when present. Every
//! field has a default so a partial (or missing) file is fine.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Base directory for recorder state, config and the daemon socket.
pub fn service_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".fgp")
        .join("services")
        .join("recorder")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Base URL of the task-recording server
    pub api_url: String,
    pub headless: bool,
    /// Quiet period after the last scroll event before the action is sent
    pub scroll_debounce_ms: u64,
    /// Grid stride in pixels for region text sampling
    pub sample_stride: f64,
    /// Inline outline applied to the hovered element
    pub outline: String,
    /// Where the recording flags are persisted (`~` is expanded)
    pub state_file: String,
    pub request_timeout_secs: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000".to_string(),
            headless: true,
            scroll_debounce_ms: 2000,
            sample_stride: 5.0,
            outline: "2px solid red".to_string(),
            state_file: "~/.fgp/services/recorder/state.json".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl RecorderConfig {
    pub fn default_path() -> PathBuf {
        service_dir().join("config.json")
    }

    /// Load from `path`, falling back to defaults when the file is absent.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.sample_stride.is_finite() && self.sample_stride >= 1.0) {
            anyhow::bail!("sample_stride must be >= 1 (got {})", self.sample_stride);
        }
        if self.api_url.trim().is_empty() {
            anyhow::bail!("api_url must not be empty");
        }
        Ok(())
    }

    pub fn state_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.state_file).to_string())
    }

    pub fn scroll_debounce(&self) -> Duration {
        Duration::from_millis(self.scroll_debounce_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
