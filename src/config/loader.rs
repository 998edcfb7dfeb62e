//! Config file loader and serialization.

use super::ScanSettings;
use crate::error::ConfigError;
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_DIR: &str = ".config/plantscan";

/// Get the default config path: ~/.config/plantscan/config.json
pub fn get_global_config_path() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or_else(|| {
        ConfigError::ValidationFailed("Cannot determine home directory".to_string())
    })?;
    Ok(home.join(CONFIG_DIR).join("config.json"))
}

/// Load config from JSON file.
pub fn load_config_from_file(path: &Path) -> Result<ScanSettings, ConfigError> {
    validate_config_path(path)?;

    let content = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::FileNotFound(format!(
                "Configuration file not found at: {}",
                path.display()
            ))
        } else {
            ConfigError::IoError(e)
        }
    })?;

    let settings: ScanSettings = serde_json::from_str(&content).map_err(ConfigError::InvalidJson)?;
    log::debug!("Loaded scan config from {}", path.display());
    Ok(settings)
}

/// Save config to JSON file. The `cameras` list is regenerated from `axes`.
pub fn save_config_to_file(settings: &ScanSettings, path: &Path) -> Result<(), ConfigError> {
    validate_config_path(path)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(ConfigError::IoError)?;
        }
    }

    let mut settings = settings.clone();
    settings.sync_cameras();
    let json_content = serde_json::to_string_pretty(&settings).map_err(ConfigError::InvalidJson)?;
    fs::write(path, json_content).map_err(ConfigError::IoError)?;

    log::debug!("Saved scan config to {}", path.display());
    Ok(())
}

/// Create default config.
pub fn create_default_config() -> ScanSettings {
    ScanSettings::default()
}

/// Validate config path (.json extension required).
pub fn validate_config_path(path: &Path) -> Result<(), ConfigError> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::ValidationFailed(
            "Configuration path cannot be empty".to_string(),
        ));
    }

    match path.extension() {
        Some(ext) if ext == "json" => {}
        Some(ext) => {
            return Err(ConfigError::ValidationFailed(format!(
                "Configuration file must have .json extension, got .{}",
                ext.to_string_lossy()
            )))
        }
        None => {
            return Err(ConfigError::ValidationFailed(
                "Configuration file must have .json extension".to_string(),
            ))
        }
    }

    if path.to_str().is_none() {
        return Err(ConfigError::ValidationFailed(
            "Configuration path contains invalid characters".to_string(),
        ));
    }

    Ok(())
}
