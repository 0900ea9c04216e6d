//! IPC (Inter-Process Communication) module
//!
//! This module provides a Unix socket-based IPC server for driving the
//! routing tables at runtime.
//!
//! # Protocol
//!
//! Messages are length-prefixed JSON:
//! - 4 bytes: message length (big-endian u32)
//! - N bytes: JSON-encoded command or response
//!
//! # Example
//!
//! ```no_run
//! use st_router::ipc::{IpcClient, IpcCommand, IpcResponse};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = IpcClient::new("/var/run/st-router.sock");
//!
//! client
//!     .send(IpcCommand::AddFwmarkRule { interface: "wlan0".into() })
//!     .await?;
//!
//! if let IpcResponse::Tables { tables } = client.send(IpcCommand::ListTables).await? {
//!     for table in tables {
//!         println!("{} -> table {}", table.interface, table.table_number);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod handler;
mod protocol;
mod server;

pub use handler::{apply, IpcHandler};
pub use protocol::{
    decode_message, encode_message, read_frame, write_frame, ErrorCode, Frame, IpcCommand,
    IpcResponse, ResponseError, ServerStatus, LENGTH_PREFIX_SIZE, MAX_MESSAGE_SIZE,
};
pub use server::{IpcClient, IpcServer};
