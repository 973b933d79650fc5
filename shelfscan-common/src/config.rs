//! Configuration loading and data folder resolution

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// TOML configuration file contents (`~/.config/shelfscan/config.toml`)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TomlConfig {
    /// Data folder holding the shared shelfscan.db
    pub data_dir: Option<String>,
    /// Log filter (e.g. "info", "shelfscan_id=debug")
    pub log_level: Option<String>,
}

/// Data folder resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable (`SHELFSCAN_DATA`)
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_data_dir(cli_arg: Option<&str>) -> Result<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        debug!(path, "Data folder from command-line argument");
        return Ok(PathBuf::from(path));
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var("SHELFSCAN_DATA") {
        debug!(%path, "Data folder from SHELFSCAN_DATA");
        return Ok(PathBuf::from(path));
    }

    // Priority 3: TOML config file
    if let Ok(config_path) = default_config_path() {
        if let Ok(config) = load_toml_config(&config_path) {
            if let Some(dir) = config.data_dir {
                debug!(config = %config_path.display(), %dir, "Data folder from config file");
                return Ok(PathBuf::from(dir));
            }
        }
    }

    // Priority 4: OS-dependent compiled default
    let default = default_data_dir();
    debug!(path = %default.display(), "Data folder from compiled default");
    Ok(default)
}

/// Load and parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read config failed: {}", e)))?;
    toml::from_str(&content).map_err(|e| Error::Config(format!("Parse config failed: {}", e)))
}

/// Write TOML config, creating parent directories as needed (best-effort backup copy)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize config failed: {}", e)))?;
    std::fs::write(path, content)?;
    info!(path = %path.display(), "Wrote config file");
    Ok(())
}

/// Default configuration file path for the platform
pub fn default_config_path() -> Result<PathBuf> {
    let path = dirs::config_dir()
        .map(|d| d.join("shelfscan").join("config.toml"))
        .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))?;

    if path.exists() {
        Ok(path)
    } else {
        Err(Error::Config(format!("Config file not found: {:?}", path)))
    }
}

/// OS-dependent default data folder path
fn default_data_dir() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/shelfscan (or /var/lib/shelfscan for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("shelfscan"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/shelfscan"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("shelfscan"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/shelfscan"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("shelfscan"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\shelfscan"))
    } else {
        PathBuf::from("./shelfscan_data")
    }
}
