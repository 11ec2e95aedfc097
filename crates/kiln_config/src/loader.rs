//! Reading `kiln.toml` and rejecting settings the cache cannot work with.

use crate::error::ConfigError;
use crate::types::KilnConfig;
use std::path::Path;

/// File name looked up in the project root.
pub const CONFIG_FILE: &str = "kiln.toml";

/// Reads and validates `<project_dir>/kiln.toml`.
pub fn load_config(project_dir: &Path) -> Result<KilnConfig, ConfigError> {
    let config_path = project_dir.join(CONFIG_FILE);
    let content = std::fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
        path: config_path.clone(),
        source,
    })?;
    load_config_from_str(&content)
}

/// Parses and validates configuration text.
pub fn load_config_from_str(content: &str) -> Result<KilnConfig, ConfigError> {
    let config: KilnConfig =
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &KilnConfig) -> Result<(), ConfigError> {
    if config.cache.dir.as_os_str().is_empty() {
        return Err(ConfigError::MissingField("cache.dir"));
    }
    if config.snapshot.frozen && config.snapshot.path.is_none() {
        return Err(ConfigError::Invalid(
            "snapshot.frozen requires snapshot.path".to_string(),
        ));
    }
    Ok(())
}
