//! Integration tests for st-router
//!
//! Every test drives the public API against a [`RecordingRunner`], so no
//! test touches the host's routing tables.
//!
//! # Test Organization
//!
//! - `table_lifecycle`: slot claiming, counting and release through the controller
//! - `uid_marking`: UID range rules and the UID mark map
//! - `ipc_control`: the same operations over the Unix socket
//!
//! [`RecordingRunner`]: st_router::exec::RecordingRunner

pub mod ipc_control;
pub mod table_lifecycle;
pub mod uid_marking;
