//! Secondary routing table pool
//!
//! This module tracks which interface owns which secondary routing table and
//! how many policy-routing constructs currently depend on it. It performs no
//! I/O; the [`policy`](crate::policy) driver decides when to allocate, count
//! and release slots.
//!
//! # Table and mark numbering
//!
//! ```text
//! slot index:      0     1     2    ...  N-1
//! kernel table:   B+0   B+1   B+2   ...  B+N-1
//! fwmark:         B+0   B+1   B+2   ...  B+N-1
//! ```
//!
//! where `B` is the configured base table number. A single mark therefore
//! selects the matching table through one `ip rule fwmark` entry.

mod pool;

pub use pool::{
    reserved, validate_interface_name, TableInfo, TablePool, DEFAULT_BASE_TABLE_NUMBER,
    DEFAULT_TABLE_CAPACITY, IFNAMSIZ, MAX_INTERFACE_NAME_LEN,
};
