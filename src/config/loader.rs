//! Configuration loading and management
//!
//! This module handles loading configuration from files and environment variables.

use std::path::Path;

use tracing::{debug, info};

use super::types::Config;
use crate::error::ConfigError;

/// Load configuration from a JSON file
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed or validated.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    debug!("Loading configuration from {:?}", path);

    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let contents = std::fs::read_to_string(path)?;

    let config: Config = serde_json::from_str(&contents).map_err(|e| {
        ConfigError::ParseError(format!("Failed to parse JSON: {e} at {path:?}"))
    })?;

    config.validate()?;

    info!(
        "Configuration loaded: {} tables from {}",
        config.tables.capacity, config.tables.base_table_number
    );

    Ok(config)
}

/// Load configuration from a JSON string
///
/// # Errors
///
/// Returns `ConfigError` if parsing or validation fails.
pub fn load_config_str(json: &str) -> Result<Config, ConfigError> {
    let config: Config =
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    config.validate()?;

    Ok(config)
}

/// Load configuration with environment variable overrides
///
/// Environment variables:
/// - `ST_ROUTER_LOG_LEVEL`: Override log level
/// - `ST_ROUTER_IPC_SOCKET`: Override IPC socket path
/// - `ST_ROUTER_BASE_TABLE`: Override the first table number
/// - `ST_ROUTER_TABLE_CAPACITY`: Override the number of tables
///
/// # Errors
///
/// Returns `ConfigError` if loading, parsing or an override fails.
pub fn load_config_with_env(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let mut config = load_config(path)?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    Ok(config)
}

/// Apply overrides looked up through `lookup`, then re-validate
///
/// # Errors
///
/// Returns `ConfigError::EnvError` for unparsable values and
/// `ConfigError::ValidationError` if the result is invalid.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(level) = lookup("ST_ROUTER_LOG_LEVEL") {
        config.log.level = level;
        debug!("Log level overridden to {}", config.log.level);
    }

    if let Some(socket) = lookup("ST_ROUTER_IPC_SOCKET") {
        config.ipc.socket_path = socket.into();
        debug!("IPC socket path overridden to {:?}", config.ipc.socket_path);
    }

    if let Some(base) = lookup("ST_ROUTER_BASE_TABLE") {
        config.tables.base_table_number = base.parse().map_err(|_| ConfigError::EnvError {
            name: "ST_ROUTER_BASE_TABLE".into(),
            reason: format!("Invalid table number: {base}"),
        })?;
        debug!(
            "Base table number overridden to {}",
            config.tables.base_table_number
        );
    }

    if let Some(capacity) = lookup("ST_ROUTER_TABLE_CAPACITY") {
        config.tables.capacity = capacity.parse().map_err(|_| ConfigError::EnvError {
            name: "ST_ROUTER_TABLE_CAPACITY".into(),
            reason: format!("Invalid number: {capacity}"),
        })?;
        debug!("Table capacity overridden to {}", config.tables.capacity);
    }

    config.validate()
}

/// Write a default configuration file
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be written.
pub fn create_default_config(path: impl AsRef<Path>) -> Result<(), ConfigError> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let json = serde_json::to_string_pretty(&Config::default())
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;
    std::fs::write(path, json)?;

    info!("Created default configuration at {:?}", path);
    Ok(())
}
