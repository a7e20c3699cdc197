use std::path::Path;

use log::{info, warn};

use crate::config::{sanitize_config, Config};
use crate::error::ConfigError;

pub fn read_config_file(path: &Path) -> Result<Config, ConfigError> {
    let config_content = std::fs::read_to_string(path)?;
    Ok(toml::from_str::<Config>(&config_content)?)
}

pub fn persist_config_file(config: &Config, path: &Path) -> Result<(), ConfigError> {
    let config_text = toml::to_string(config)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, config_text)?;
    Ok(())
}

/// Reads the config at `path`, writing the defaults there first if the file
/// does not exist. Unreadable files fall back to defaults.
pub fn load_or_create_config(path: &Path) -> Config {
    if !path.exists() {
        info!(
            "Config file not found. Creating default config. path={}",
            path.display()
        );
        if let Err(err) = persist_config_file(&Config::default(), path) {
            warn!(
                "Failed to write default config to {}: {}",
                path.display(),
                err
            );
            return Config::default();
        }
    }

    match read_config_file(path) {
        Ok(config) => sanitize_config(config),
        Err(err) => {
            warn!(
                "Failed to load config file {}. Using defaults. error={}",
                path.display(),
                err
            );
            Config::default()
        }
    }
}
