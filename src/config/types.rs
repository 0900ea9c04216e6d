//! Configuration types for st-router
//!
//! This module defines all configuration structures used by the daemon.
//! Every section has defaults, so an empty JSON object is a valid config.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::table::{reserved, DEFAULT_BASE_TABLE_NUMBER, DEFAULT_TABLE_CAPACITY};

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Table pool sizing
    #[serde(default)]
    pub tables: TablesConfig,

    /// External program locations
    #[serde(default)]
    pub commands: CommandsConfig,

    /// Firewall chain names
    #[serde(default)]
    pub chains: ChainsConfig,

    /// IPC configuration
    #[serde(default)]
    pub ipc: IpcConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tables.validate()?;
        self.commands.validate()?;
        self.chains.validate()?;
        self.ipc.validate()?;
        Ok(())
    }
}

/// Table pool configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TablesConfig {
    /// Number of interfaces that can hold a table at once
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Kernel table number (and fwmark) of the first slot
    #[serde(default = "default_base_table_number")]
    pub base_table_number: u32,
}

impl TablesConfig {
    /// Validate table configuration
    ///
    /// The range `[base, base + capacity)` must fit in `u32` and must not
    /// cover a kernel-reserved table.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::ValidationError(
                "tables.capacity must be greater than 0".into(),
            ));
        }

        let last = u32::try_from(self.capacity - 1)
            .ok()
            .and_then(|offset| self.base_table_number.checked_add(offset))
            .ok_or_else(|| {
                ConfigError::ValidationError(format!(
                    "table range starting at {} with {} slots overflows",
                    self.base_table_number, self.capacity
                ))
            })?;

        if let Some(table) = reserved::ALL
            .iter()
            .find(|&&t| (self.base_table_number..=last).contains(&t))
        {
            return Err(ConfigError::ValidationError(format!(
                "table range {}-{} includes reserved kernel table {}",
                self.base_table_number, last, table
            )));
        }

        Ok(())
    }
}

impl Default for TablesConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            base_table_number: default_base_table_number(),
        }
    }
}

/// Locations of the external tools
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CommandsConfig {
    /// `ip` binary
    #[serde(default = "default_ip_path")]
    pub ip_path: String,

    /// `iptables` binary
    #[serde(default = "default_iptables_path")]
    pub iptables_path: String,

    /// `ip6tables` binary
    #[serde(default = "default_ip6tables_path")]
    pub ip6tables_path: String,
}

impl CommandsConfig {
    /// Validate command paths
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, path) in [
            ("commands.ip_path", &self.ip_path),
            ("commands.iptables_path", &self.iptables_path),
            ("commands.ip6tables_path", &self.ip6tables_path),
        ] {
            if path.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "{name} cannot be empty"
                )));
            }
        }
        Ok(())
    }
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            ip_path: default_ip_path(),
            iptables_path: default_iptables_path(),
            ip6tables_path: default_ip6tables_path(),
        }
    }
}

/// Firewall chains the daemon appends to
///
/// The chains themselves are created and hooked into the built-in chains by
/// whoever owns the firewall layout.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChainsConfig {
    /// `nat` table chain holding the MASQUERADE rules
    #[serde(default = "default_nat_postrouting")]
    pub nat_postrouting: String,

    /// `mangle` table chain holding the per-UID MARK rules
    #[serde(default = "default_mangle_output")]
    pub mangle_output: String,
}

impl ChainsConfig {
    /// Validate chain names
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nat_postrouting.is_empty() || self.mangle_output.is_empty() {
            return Err(ConfigError::ValidationError(
                "chain names cannot be empty".into(),
            ));
        }
        if self.nat_postrouting.contains(char::is_whitespace)
            || self.mangle_output.contains(char::is_whitespace)
        {
            return Err(ConfigError::ValidationError(
                "chain names cannot contain whitespace".into(),
            ));
        }
        Ok(())
    }
}

impl Default for ChainsConfig {
    fn default() -> Self {
        Self {
            nat_postrouting: default_nat_postrouting(),
            mangle_output: default_mangle_output(),
        }
    }
}

/// IPC server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IpcConfig {
    /// Path to Unix socket
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Socket file mode (octal, e.g., 0o660)
    #[serde(default = "default_socket_mode")]
    pub socket_mode: u32,

    /// Enable IPC server
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum message size in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

impl IpcConfig {
    /// Validate IPC configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.socket_path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "IPC socket path cannot be empty when IPC is enabled".into(),
            ));
        }

        if self.max_message_size == 0 {
            return Err(ConfigError::ValidationError(
                "max_message_size must be greater than 0".into(),
            ));
        }

        Ok(())
    }
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            socket_mode: default_socket_mode(),
            enabled: true,
            max_message_size: default_max_message_size(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Include target (module path)
    #[serde(default = "default_true")]
    pub target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            target: true,
        }
    }
}

const fn default_capacity() -> usize {
    DEFAULT_TABLE_CAPACITY
}

const fn default_base_table_number() -> u32 {
    DEFAULT_BASE_TABLE_NUMBER
}

fn default_ip_path() -> String {
    "/sbin/ip".into()
}

fn default_iptables_path() -> String {
    "/sbin/iptables".into()
}

fn default_ip6tables_path() -> String {
    "/sbin/ip6tables".into()
}

fn default_nat_postrouting() -> String {
    "st_nat_POSTROUTING".into()
}

fn default_mangle_output() -> String {
    "st_mangle_OUTPUT".into()
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("/var/run/st-router.sock")
}

const fn default_socket_mode() -> u32 {
    0o660
}

const fn default_max_message_size() -> usize {
    64 * 1024
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}

const fn default_true() -> bool {
    true
}
