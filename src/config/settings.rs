use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};

use super::AppConfig;

const APP_NAME: &str = "ctxpack";
const CONFIG_FILE: &str = "config.json";

/// Returns the platform-specific configuration directory for the application.
pub fn get_config_directory() -> Option<PathBuf> {
    ProjectDirs::from("com", "ctxpack", APP_NAME)
        .map(|proj_dirs| proj_dirs.config_dir().to_path_buf())
}

/// Returns the full path to the configuration file.
pub fn get_config_file_path() -> Option<PathBuf> {
    get_config_directory().map(|dir| dir.join(CONFIG_FILE))
}

/// Loads the configuration from `path`, or from the platform default location
/// when `path` is `None`.
///
/// A missing default file yields the defaults. A file that cannot be parsed is
/// logged and replaced by the defaults as well. An explicitly named file that
/// does not exist is an error.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let (config_path, explicit) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => match get_config_file_path() {
            Some(p) => (p, false),
            None => {
                tracing::debug!("Could not determine config directory; using defaults");
                return Ok(AppConfig::default());
            }
        },
    };

    if !config_path.exists() {
        if explicit {
            anyhow::bail!("Config file not found: {}", config_path.display());
        }
        tracing::debug!("No config at {:?}; using defaults", config_path);
        return Ok(AppConfig::default());
    }

    let config_content = fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read config file {}", config_path.display()))?;

    match serde_json::from_str::<AppConfig>(&config_content) {
        Ok(config) => {
            tracing::info!("Loaded config from {:?}", config_path);
            Ok(config)
        }
        Err(e) => {
            tracing::warn!(
                "Failed to parse config file at {:?}: {}. Falling back to default config.",
                config_path,
                e
            );
            Ok(AppConfig::default())
        }
    }
}
