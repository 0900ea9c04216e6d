//! Configuration module for st-router
//!
//! This module provides configuration types and loading utilities.
//!
//! # Example
//!
//! ```no_run
//! use st_router::config::load_config;
//!
//! let config = load_config("/etc/st-router/config.json").unwrap();
//! println!("First table: {}", config.tables.base_table_number);
//! ```

mod loader;
mod types;

pub use loader::{
    apply_env_overrides, create_default_config, load_config, load_config_str,
    load_config_with_env,
};
pub use types::{ChainsConfig, CommandsConfig, Config, IpcConfig, LogConfig, TablesConfig};
