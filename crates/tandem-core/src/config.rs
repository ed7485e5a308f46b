//! Runtime configuration
//!
//! Loaded from `~/.tandem/config.toml`. Every field has a default, so a
//! missing file is not an error. A handful of environment variables override
//! the file for quick experiments.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths;
use crate::tools::registry::PermissionMode;

const DEFAULT_MODEL: &str = "claude-sonnet-4-5";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TandemConfig {
    /// Shared directory for file-based coordination records.
    pub status_dir: PathBuf,
    pub permission_mode: PermissionMode,
    pub approval_timeout_secs: u64,
    pub provider_timeout_secs: u64,
    pub tool_timeout_secs: u64,
    /// Upper bound on completion requests within one turn.
    pub max_iterations: usize,
    pub model: String,
    pub max_tokens: usize,
    pub discovery: DiscoveryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Try mDNS before falling back to the status directory.
    pub enabled: bool,
    pub browse_window_ms: u64,
    /// Extra wait after the browse window for in-flight responses.
    pub settle_ms: u64,
    /// Port advertised in the SRV record. Nothing listens on it.
    pub port: u16,
}

impl Default for TandemConfig {
    fn default() -> Self {
        Self {
            status_dir: paths::default_status_dir(),
            permission_mode: PermissionMode::default(),
            approval_timeout_secs: 300,
            provider_timeout_secs: 120,
            tool_timeout_secs: 120,
            max_iterations: 50,
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 8192,
            discovery: DiscoveryConfig::default(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            browse_window_ms: 2000,
            settle_ms: 250,
            port: 0,
        }
    }
}

impl TandemConfig {
    /// Load from the default location and apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&paths::config_file())?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from an explicit path. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config file at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {:?}", path))?;
        let config: TandemConfig =
            toml::from_str(&content).with_context(|| format!("Failed to parse {:?}", path))?;

        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("TANDEM_STATUS_DIR").filter(|v| !v.is_empty()) {
            self.status_dir = PathBuf::from(dir);
        }
        if let Some(model) = lookup("TANDEM_MODEL").filter(|v| !v.is_empty()) {
            self.model = model;
        }
        match lookup("TANDEM_PERMISSION_MODE").as_deref() {
            Some("autonomous") => self.permission_mode = PermissionMode::Autonomous,
            Some("supervised") => self.permission_mode = PermissionMode::Supervised,
            Some(other) => {
                tracing::warn!(value = other, "Ignoring unknown TANDEM_PERMISSION_MODE")
            }
            None => {}
        }
    }

    pub fn approval_timeout(&self) -> Duration {
        Duration::from_secs(self.approval_timeout_secs)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

impl DiscoveryConfig {
    pub fn browse_window(&self) -> Duration {
        Duration::from_millis(self.browse_window_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = TandemConfig::load_from(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.max_iterations, 50);
        assert_eq!(config.permission_mode, PermissionMode::Supervised);
        assert!(config.discovery.enabled);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "permission_mode = \"autonomous\"\n\n[discovery]\nbrowse_window_ms = 500\n",
        )
        .unwrap();

        let config = TandemConfig::load_from(&path).unwrap();
        assert_eq!(config.permission_mode, PermissionMode::Autonomous);
        assert_eq!(config.discovery.browse_window(), Duration::from_millis(500));
        assert_eq!(config.discovery.settle_ms, 250);
        assert_eq!(config.approval_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn unparseable_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "max_iterations = \"many\"").unwrap();

        let err = TandemConfig::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse"));
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("TANDEM_STATUS_DIR", "/srv/shared/status"),
            ("TANDEM_PERMISSION_MODE", "autonomous"),
        ]
        .into_iter()
        .collect();

        let mut config = TandemConfig::default();
        config.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.status_dir, PathBuf::from("/srv/shared/status"));
        assert_eq!(config.permission_mode, PermissionMode::Autonomous);
        assert_eq!(config.model, DEFAULT_MODEL);
    }
}
