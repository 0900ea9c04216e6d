//! Error types for st-router
//!
//! This module defines the error hierarchy for the secondary table controller.
//! Errors are grouped by subsystem and each group reports whether a retry of
//! the failed operation could succeed.

use std::io;

use thiserror::Error;

/// Top-level error type for st-router
#[derive(Debug, Error)]
pub enum StRouterError {
    /// Configuration errors (file parsing, validation)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Table pool and policy driver errors
    #[error("Table error: {0}")]
    Table(#[from] TableError),

    /// IPC communication errors
    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),

    /// I/O errors not covered by other categories
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StRouterError {
    /// Check if this error is recoverable (can retry operation)
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_) => false,
            Self::Table(e) => e.is_recoverable(),
            Self::Ipc(e) => e.is_recoverable(),
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
            ),
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found or inaccessible
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Validation error (invalid values, missing required fields)
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Environment variable error
    #[error("Environment variable error: {name}: {reason}")]
    EnvError { name: String, reason: String },

    /// I/O error while reading config
    #[error("I/O error reading configuration: {0}")]
    IoError(#[from] io::Error),
}

impl ConfigError {
    /// Config errors are not recoverable without user intervention
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        false
    }
}

/// Table pool and policy driver errors
///
/// Every public controller operation fails with one of these kinds. The
/// `Display` text is suitable for returning to the requesting client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    /// No free table slot is left
    #[error("Max number of NATed interfaces reached ({capacity} tables in use)")]
    SlotExhausted { capacity: usize },

    /// The operation needs an interface that is not tracked
    #[error("Interface not found: {0}")]
    InterfaceNotFound(String),

    /// Index out of range or pointing at an unoccupied slot
    #[error("Invalid table index: {0}")]
    InvalidTableIndex(usize),

    /// An external command exited non-zero or could not be started
    #[error("Command failed: {command}: {reason}")]
    CommandExecution { command: String, reason: String },

    /// The UID mark map refused an add or remove
    #[error("UID mark map rejected {action} of uids {start}-{end} with mark {mark}")]
    UidMapRejected {
        action: &'static str,
        start: u32,
        end: u32,
        mark: u32,
    },

    /// Malformed caller input
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl TableError {
    /// Check if this error is recoverable
    ///
    /// Exhaustion clears once another interface releases its slot, and an
    /// external command may succeed when the kernel state changes.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        match self {
            Self::SlotExhausted { .. } | Self::CommandExecution { .. } => true,
            Self::InterfaceNotFound(_)
            | Self::InvalidTableIndex(_)
            | Self::UidMapRejected { .. }
            | Self::InvalidArgument(_) => false,
        }
    }

    /// Create a command execution error
    pub fn command(argv: &[String], reason: impl Into<String>) -> Self {
        Self::CommandExecution {
            command: argv.join(" "),
            reason: reason.into(),
        }
    }

    /// Create an interface-not-found error
    pub fn interface_not_found(name: impl Into<String>) -> Self {
        Self::InterfaceNotFound(name.into())
    }

    /// Create an invalid argument error
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

/// IPC communication errors
#[derive(Debug, Error)]
pub enum IpcError {
    /// Failed to create Unix socket
    #[error("Failed to create IPC socket at {path}: {reason}")]
    SocketCreation { path: String, reason: String },

    /// Failed to bind Unix socket
    #[error("Failed to bind IPC socket to {path}: {reason}")]
    BindError { path: String, reason: String },

    /// Connection error
    #[error("IPC connection error: {0}")]
    ConnectionError(String),

    /// Protocol error (invalid message format)
    #[error("IPC protocol error: {0}")]
    ProtocolError(String),

    /// Serialization error
    #[error("IPC serialization error: {0}")]
    SerializationError(String),

    /// I/O error
    #[error("IPC I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl IpcError {
    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::SocketCreation { .. } | Self::BindError { .. } | Self::SerializationError(_) => {
                false
            }
            Self::ConnectionError(_) | Self::ProtocolError(_) => true,
            Self::IoError(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::BrokenPipe
            ),
        }
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::ProtocolError(msg.into())
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::SerializationError(msg.into())
    }
}
