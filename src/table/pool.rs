//! Fixed-capacity pool of secondary routing tables
//!
//! Each slot pairs an interface name with a count of the policy-routing
//! constructs (routes, source rules, local routes, fwmark rules) that depend on
//! it. The slot position is the table index; the kernel table number and the
//! fwmark value are both `index + base_table_number`.
//!
//! # Invariants
//!
//! - A slot is unoccupied (empty name) iff its rule count is zero.
//! - A non-empty interface name occupies at most one slot.
//! - An index stays bound to its interface until the count drops to zero.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::action::RuleAction;
use crate::error::TableError;

/// Kernel interface name buffer size, including the trailing NUL
pub const IFNAMSIZ: usize = 16;

/// Longest interface name a slot can hold
pub const MAX_INTERFACE_NAME_LEN: usize = IFNAMSIZ - 1;

/// Default number of tracked interfaces
pub const DEFAULT_TABLE_CAPACITY: usize = 16;

/// Default first kernel table number handed out by the pool
pub const DEFAULT_BASE_TABLE_NUMBER: u32 = 60;

/// Kernel routing tables that the pool must never hand out.
pub mod reserved {
    /// `RT_TABLE_UNSPEC`
    pub const UNSPEC: u32 = 0;
    /// `RT_TABLE_DEFAULT`
    pub const DEFAULT: u32 = 253;
    /// `RT_TABLE_MAIN`
    pub const MAIN: u32 = 254;
    /// `RT_TABLE_LOCAL`
    pub const LOCAL: u32 = 255;

    /// All reserved table numbers
    pub const ALL: &[u32] = &[UNSPEC, DEFAULT, MAIN, LOCAL];

    /// Check whether a table number is reserved by the kernel
    #[must_use]
    pub fn is_reserved(table: u32) -> bool {
        ALL.contains(&table)
    }
}

/// One tracked interface
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct TableSlot {
    /// Empty when the slot is free
    interface: String,
    rule_count: u32,
}

impl TableSlot {
    fn is_occupied(&self) -> bool {
        !self.interface.is_empty()
    }

    fn release(&mut self) {
        self.interface.clear();
        self.rule_count = 0;
    }
}

/// Snapshot of an occupied slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    /// Slot position
    pub index: usize,
    /// Interface holding the slot
    pub interface: String,
    /// Active rules attributed to the slot
    pub rule_count: u32,
    /// Kernel routing table number
    pub table_number: u32,
    /// Firewall mark selecting the table (always equal to `table_number`)
    pub fwmark: u32,
}

/// Check that a name can occupy a slot
///
/// # Errors
///
/// Returns `TableError::InvalidArgument` for empty names, names longer than
/// [`MAX_INTERFACE_NAME_LEN`] bytes, or names containing NUL.
pub fn validate_interface_name(name: &str) -> Result<(), TableError> {
    if name.is_empty() {
        return Err(TableError::invalid("interface name must not be empty"));
    }
    if name.len() > MAX_INTERFACE_NAME_LEN {
        return Err(TableError::invalid(format!(
            "interface name '{name}' exceeds {MAX_INTERFACE_NAME_LEN} bytes"
        )));
    }
    if name.contains('\0') {
        return Err(TableError::invalid("interface name must not contain NUL"));
    }
    Ok(())
}

/// Fixed-capacity table pool
#[derive(Debug, Clone)]
pub struct TablePool {
    slots: Vec<TableSlot>,
    base_table_number: u32,
}

impl TablePool {
    /// Create a pool with `capacity` free slots starting at `base_table_number`
    ///
    /// # Example
    ///
    /// ```
    /// use st_router::table::TablePool;
    ///
    /// let pool = TablePool::new(16, 60);
    /// assert_eq!(pool.capacity(), 16);
    /// assert_eq!(pool.occupied_count(), 0);
    /// ```
    #[must_use]
    pub fn new(capacity: usize, base_table_number: u32) -> Self {
        Self {
            slots: vec![TableSlot::default(); capacity],
            base_table_number,
        }
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Table number of slot 0
    pub const fn base_table_number(&self) -> u32 {
        self.base_table_number
    }

    /// Number of slots currently held by an interface
    pub fn occupied_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_occupied()).count()
    }

    /// Find the slot holding `name`
    ///
    /// The comparison is exact. Passing `""` finds the first free slot.
    ///
    /// # Example
    ///
    /// ```
    /// use st_router::table::TablePool;
    ///
    /// let mut pool = TablePool::new(4, 60);
    /// assert_eq!(pool.find_table_number("wlan0"), None);
    /// assert_eq!(pool.find_table_number(""), Some(0));
    ///
    /// let index = pool.allocate("wlan0").unwrap();
    /// assert_eq!(pool.find_table_number("wlan0"), Some(index));
    /// assert_eq!(pool.find_table_number("wlan"), None);
    /// ```
    pub fn find_table_number(&self, name: &str) -> Option<usize> {
        self.slots.iter().position(|s| s.interface == name)
    }

    /// Find the first unoccupied slot
    pub fn find_free_slot(&self) -> Option<usize> {
        self.find_table_number("")
    }

    /// Look up `name`, claiming a free slot if it is not tracked yet
    ///
    /// A freshly claimed slot has a rule count of zero until the caller
    /// records a rule; callers that fail before doing so must call
    /// [`release_if_unused`](Self::release_if_unused).
    ///
    /// # Errors
    ///
    /// Returns `TableError::InvalidArgument` for an unusable name and
    /// `TableError::SlotExhausted` when every slot is taken.
    pub fn allocate(&mut self, name: &str) -> Result<usize, TableError> {
        validate_interface_name(name)?;

        if let Some(index) = self.find_table_number(name) {
            return Ok(index);
        }

        let Some(index) = self.find_free_slot() else {
            warn!(
                "Max number of NATed interfaces reached ({}), cannot track {}",
                self.capacity(),
                name
            );
            return Err(TableError::SlotExhausted {
                capacity: self.capacity(),
            });
        };

        let slot = &mut self.slots[index];
        slot.interface.push_str(name);
        slot.rule_count = 0;
        info!(
            "Assigned table {} (index {}) to {}",
            self.table_number(index),
            index,
            name
        );
        Ok(index)
    }

    /// Check that `index` is in range and occupied
    ///
    /// # Errors
    ///
    /// Returns `TableError::InvalidTableIndex` otherwise.
    pub fn verify_table_index(&self, index: usize) -> Result<(), TableError> {
        match self.slots.get(index) {
            Some(slot) if slot.is_occupied() => Ok(()),
            _ => Err(TableError::InvalidTableIndex(index)),
        }
    }

    /// Adjust the rule count of `index`, returning the new count
    ///
    /// Removing the last rule releases the slot. A removal that would go
    /// below zero is clamped at zero. Out-of-range indices and additions to
    /// an unoccupied slot are ignored.
    pub fn modify_rule_count(&mut self, index: usize, action: RuleAction) -> u32 {
        let Some(slot) = self.slots.get_mut(index) else {
            warn!("Ignoring rule count {} for out-of-range index {}", action, index);
            return 0;
        };

        match action {
            RuleAction::Add => {
                if !slot.is_occupied() {
                    warn!("Ignoring rule count add for unoccupied index {}", index);
                    return 0;
                }
                slot.rule_count = slot.rule_count.saturating_add(1);
                debug!("{} rule count now {}", slot.interface, slot.rule_count);
            }
            RuleAction::Del => {
                if slot.rule_count <= 1 {
                    if slot.is_occupied() {
                        info!(
                            "Released table {} (index {}) from {}",
                            index as u64 + u64::from(self.base_table_number),
                            index,
                            slot.interface
                        );
                    }
                    slot.release();
                } else {
                    slot.rule_count -= 1;
                    debug!("{} rule count now {}", slot.interface, slot.rule_count);
                }
            }
        }
        slot.rule_count
    }

    /// Release `index` if it is occupied but no rule depends on it
    ///
    /// Returns `true` if the slot was released.
    pub fn release_if_unused(&mut self, index: usize) -> bool {
        match self.slots.get_mut(index) {
            Some(slot) if slot.is_occupied() && slot.rule_count == 0 => {
                debug!("Releasing unused slot {} held by {}", index, slot.interface);
                slot.release();
                true
            }
            _ => false,
        }
    }

    /// Kernel routing table number for `index`
    #[allow(clippy::cast_possible_truncation)]
    pub const fn table_number(&self, index: usize) -> u32 {
        self.base_table_number + index as u32
    }

    /// Firewall mark for `index`, identical to its table number
    pub const fn fwmark(&self, index: usize) -> u32 {
        self.table_number(index)
    }

    /// Rule count of `index` (zero for free or out-of-range slots)
    pub fn rule_count(&self, index: usize) -> u32 {
        self.slots.get(index).map_or(0, |s| s.rule_count)
    }

    /// Interface holding `index`, if any
    pub fn interface(&self, index: usize) -> Option<&str> {
        self.slots
            .get(index)
            .filter(|s| s.is_occupied())
            .map(|s| s.interface.as_str())
    }

    /// Snapshot of every occupied slot in index order
    pub fn slots(&self) -> Vec<TableInfo> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_occupied())
            .map(|(index, s)| TableInfo {
                index,
                interface: s.interface.clone(),
                rule_count: s.rule_count,
                table_number: self.table_number(index),
                fwmark: self.fwmark(index),
            })
            .collect()
    }
}

impl Default for TablePool {
    fn default() -> Self {
        Self::new(DEFAULT_TABLE_CAPACITY, DEFAULT_BASE_TABLE_NUMBER)
    }
}
