//! Centralized path utilities
//!
//! All application paths in one place for consistency

use std::path::PathBuf;

const CONFIG_DIR_NAME: &str = ".tandem";

/// Get the tandem config directory (~/.tandem)
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
}

/// Get the config file path (~/.tandem/config.toml)
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Get the logs directory (~/.tandem/logs)
pub fn logs_dir() -> PathBuf {
    config_dir().join("logs")
}

/// Default shared status directory for file-based coordination
/// (~/.tandem/status). Agents that should see each other must agree on this.
pub fn default_status_dir() -> PathBuf {
    config_dir().join("status")
}
