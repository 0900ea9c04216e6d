//! st-router: per-interface policy routing tables for tethering and VPN
//!
//! Each upstream interface that needs its own routing is given a slot in a
//! small, fixed pool of kernel routing tables. The slot's table number
//! doubles as the firewall mark that steers traffic into it, so a single
//! number ties together the `ip rule`, the `ip route` entries and the
//! `iptables` rules that belong to an interface.
//!
//! # Architecture
//!
//! ```text
//! IPC client → IpcServer → IpcHandler → PolicyController → ip / iptables
//!                                             ↓
//!                                         TablePool
//! ```
//!
//! A slot is claimed lazily by the first route or fwmark rule of an
//! interface and released when its last counted rule is removed.
//!
//! # Quick Start
//!
//! ```no_run
//! use st_router::config::load_config;
//! use st_router::exec::SystemRunner;
//! use st_router::policy::{PolicyController, UidRangeMarkMap};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("/etc/st-router/config.json")?;
//! let mut controller = PolicyController::from_config(
//!     &config,
//!     Box::new(SystemRunner),
//!     Box::new(UidRangeMarkMap::new()),
//! );
//!
//! controller.add_fwmark_rule("rmnet0")?;
//! controller.add_uid_rule("rmnet0", 10_000, 19_999)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`action`]: add/delete selector shared by every operation
//! - [`config`]: Configuration types and loading
//! - [`error`]: Error types
//! - [`exec`]: External command execution
//! - [`ipc`]: IPC server and protocol
//! - [`policy`]: Routing and firewall operations
//! - [`table`]: Routing table slot pool

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod action;
pub mod config;
pub mod error;
pub mod exec;
pub mod ipc;
pub mod policy;
pub mod table;

// Re-export commonly used types at the crate root
pub use action::RuleAction;
pub use config::Config;
pub use error::{ConfigError, IpcError, StRouterError, TableError};
pub use exec::{CommandRunner, RecordingRunner, SystemRunner};
pub use ipc::{IpcClient, IpcCommand, IpcHandler, IpcResponse, IpcServer};
pub use policy::{PolicyController, UidMarkMap, UidRangeMarkMap};
pub use table::{TableInfo, TablePool};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
