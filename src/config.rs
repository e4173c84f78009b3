// SPDX-License-Identifier: GPL-3.0-only

use crate::constants::app_info;
use crate::errors::{AppError, AppResult};
use crate::pipelines::photo::CaptureSettings;
use crate::pipelines::shot::{GateConfig, OrchestratorConfig};
use crate::storage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Name of the configuration file inside the application config directory
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Focus/metering timeouts and pause policy
    pub orchestrator: OrchestratorConfig,
    /// Backpressure thresholds
    pub gate: GateConfig,
    /// Default settings for new shots
    pub capture: CaptureSettings,
    /// Save directory override (default: ~/Pictures/Camera)
    pub output_dir: Option<PathBuf>,
}

impl Config {
    /// Default location: `<config_dir>/camera-shot/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(app_info::APP_ID).join(CONFIG_FILE))
    }

    /// Load from the default location; a missing file yields defaults
    pub fn load() -> AppResult<Self> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => {
                debug!("No config directory, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn load_from(path: &Path) -> AppResult<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(AppError::Config(format!(
                    "cannot read {}: {}",
                    path.display(),
                    e
                )));
            }
        };
        serde_json::from_str(&contents).map_err(|e| {
            AppError::Config(format!("invalid config {}: {}", path.display(), e))
        })
    }

    pub fn save_to(&self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Directory shots are saved to
    pub fn photo_directory(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(storage::default_photo_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_path_ends_with_app_id() {
        if let Some(path) = Config::default_path() {
            assert!(path.ends_with("camera-shot/config.json"));
        }
    }

    #[test]
    fn test_output_dir_override() {
        let config = Config {
            output_dir: Some(PathBuf::from("/tmp/shots")),
            ..Default::default()
        };
        assert_eq!(config.photo_directory(), PathBuf::from("/tmp/shots"));
    }
}
