//! IPC Protocol definitions
//!
//! This module defines the command and response types used for
//! inter-process communication via Unix socket.

use std::io;
use std::net::{IpAddr, Ipv6Addr};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{IpcError, TableError};
use crate::table::TableInfo;

/// IPC command types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcCommand {
    /// Ping to check if the server is alive
    Ping,

    /// Get server status
    Status,

    /// List occupied tables
    ListTables,

    /// Add a route to the interface's table, claiming one if needed
    AddRoute {
        interface: String,
        destination: IpAddr,
        prefix: u8,
        /// `::` (the default) makes the route device-scoped
        #[serde(default = "default_gateway")]
        gateway: IpAddr,
    },

    /// Remove a route from the interface's table
    RemoveRoute {
        interface: String,
        destination: IpAddr,
        prefix: u8,
        #[serde(default = "default_gateway")]
        gateway: IpAddr,
    },

    /// Route traffic from `address` through the interface's table
    AddFromRule { interface: String, address: String },

    /// Remove a source rule
    RemoveFromRule { interface: String, address: String },

    /// Add a local route in the interface's table
    AddLocalRoute { interface: String, address: String },

    /// Remove a local route; the table is reclaimed even if `ip` fails
    RemoveLocalRoute { interface: String, address: String },

    /// Install the fwmark rule and MASQUERADE for an interface
    AddFwmarkRule { interface: String },

    /// Remove the fwmark rule and MASQUERADE for an interface
    RemoveFwmarkRule { interface: String },

    /// Mark traffic of a UID range with the interface's mark
    AddUidRule {
        interface: String,
        uid_start: u32,
        uid_end: u32,
    },

    /// Stop marking traffic of a UID range
    RemoveUidRule {
        interface: String,
        uid_start: u32,
        uid_end: u32,
    },

    /// Look up the mark assigned to a UID
    GetUidMark { uid: u32 },

    /// Stop the server
    Shutdown,
}

fn default_gateway() -> IpAddr {
    IpAddr::V6(Ipv6Addr::UNSPECIFIED)
}

/// IPC response types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcResponse {
    /// Ping response
    Pong,

    /// Status response
    Status(ServerStatus),

    /// Occupied tables
    Tables {
        tables: Vec<TableInfo>,
    },

    /// Mark lookup result
    UidMark {
        uid: u32,
        mark: Option<u32>,
    },

    /// Success response (for commands that don't return data)
    Success {
        /// Optional message
        message: Option<String>,
    },

    /// Error response
    Error(ResponseError),
}

impl IpcResponse {
    /// Create a success response with a message
    pub fn success_with_message(msg: impl Into<String>) -> Self {
        Self::Success {
            message: Some(msg.into()),
        }
    }

    /// Create an error response
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error(ResponseError {
            code,
            message: message.into(),
        })
    }

    /// Check if this is an error response
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Turn a controller result into a response
    pub fn from_result(result: Result<(), TableError>, ok_message: &str) -> Self {
        match result {
            Ok(()) => Self::success_with_message(ok_message),
            Err(e) => Self::error(ErrorCode::from(&e), e.to_string()),
        }
    }
}

/// Server status information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStatus {
    /// Server version
    pub version: String,
    /// Uptime in seconds
    pub uptime_secs: u64,
    /// Number of table slots
    pub capacity: usize,
    /// Slots currently held by an interface
    pub occupied: usize,
    /// Table number of slot 0
    pub base_table_number: u32,
}

/// Error payload of a response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseError {
    /// Error code
    pub code: ErrorCode,
    /// Error message
    pub message: String,
}

impl std::fmt::Display for ResponseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for ResponseError {}

/// Error codes for IPC responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Invalid command
    InvalidCommand,
    /// Invalid parameters
    InvalidParameters,
    /// Interface not tracked
    NotFound,
    /// No free table
    ResourceExhausted,
    /// An external command failed
    OperationFailed,
    /// Internal error
    InternalError,
}

impl From<&TableError> for ErrorCode {
    fn from(err: &TableError) -> Self {
        match err {
            TableError::SlotExhausted { .. } => Self::ResourceExhausted,
            TableError::InterfaceNotFound(_) => Self::NotFound,
            TableError::CommandExecution { .. } => Self::OperationFailed,
            TableError::InvalidTableIndex(_)
            | TableError::UidMapRejected { .. }
            | TableError::InvalidArgument(_) => Self::InvalidParameters,
        }
    }
}

/// Message framing for IPC
///
/// Messages are length-prefixed:
/// - 4 bytes: message length (big-endian u32)
/// - N bytes: JSON message
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Encode a message with length prefix
#[allow(clippy::cast_possible_truncation)]
pub fn encode_message<T: Serialize>(msg: &T) -> Result<Vec<u8>, serde_json::Error> {
    let json = serde_json::to_vec(msg)?;
    let len = json.len() as u32;

    let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + json.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&json);

    Ok(buf)
}

/// Decode a message body (without its length prefix)
pub fn decode_message<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, serde_json::Error> {
    serde_json::from_slice(data)
}

/// One frame read off a stream
#[derive(Debug, PartialEq, Eq)]
pub enum Frame {
    /// A complete message body
    Body(Vec<u8>),
    /// The prefix announced more than the allowed size; the body is unread
    Oversized(usize),
    /// The peer closed the stream before sending a prefix
    Closed,
}

/// Read one length-prefixed frame of at most `max_size` bytes
pub async fn read_frame<R>(reader: &mut R, max_size: usize) -> io::Result<Frame>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; LENGTH_PREFIX_SIZE];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(Frame::Closed),
        Err(e) => return Err(e),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_size {
        return Ok(Frame::Oversized(len));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Frame::Body(body))
}

/// Encode `msg` and write it as one frame
pub async fn write_frame<W, T>(writer: &mut W, msg: &T) -> Result<(), IpcError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let encoded = encode_message(msg).map_err(|e| IpcError::serialization(e.to_string()))?;
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}
