//! Policy routing driver
//!
//! Turns table pool decisions into `ip`/`iptables` commands.
//!
//! - [`controller`]: the [`PolicyController`] operations
//! - [`commands`]: exact argument vectors for each kernel change
//! - [`uid_map`]: UID range to mark bookkeeping
//!
//! # Example
//!
//! ```
//! use st_router::config::Config;
//! use st_router::exec::RecordingRunner;
//! use st_router::policy::{PolicyController, UidRangeMarkMap};
//!
//! let runner = RecordingRunner::new();
//! let mut ctl = PolicyController::from_config(
//!     &Config::default(),
//!     Box::new(runner.clone()),
//!     Box::new(UidRangeMarkMap::new()),
//! );
//!
//! ctl.add_fwmark_rule("wlan0").unwrap();
//! assert_eq!(ctl.find_table_number("wlan0"), Some(0));
//! assert_eq!(runner.command_lines()[0], "/sbin/ip rule add fwmark 60 table 60");
//! ```

pub mod commands;
pub mod controller;
pub mod uid_map;

pub use commands::{ip_version_flag, CommandSet, IptablesTarget};
pub use controller::PolicyController;
pub use uid_map::{UidMarkMap, UidRangeMarkMap};
