//! Secondary table policy driver
//!
//! [`PolicyController`] owns the [`TablePool`] and keeps it consistent with
//! the kernel: it picks or claims a slot, issues the `ip`/`iptables` commands
//! and folds the result back into the rule count.
//!
//! The controller is not internally synchronized. Callers must run one
//! operation at a time against a given instance.

use std::net::IpAddr;

use ipnet::IpNet;
use tracing::{debug, error, info, warn};

use super::commands::CommandSet;
use super::uid_map::UidMarkMap;
use crate::action::RuleAction;
use crate::config::Config;
use crate::error::TableError;
use crate::exec::{run_checked, CommandRunner};
use crate::table::{TableInfo, TablePool};

/// Keeps routing-policy state for tracked interfaces
pub struct PolicyController {
    pool: TablePool,
    commands: CommandSet,
    runner: Box<dyn CommandRunner>,
    uid_map: Box<dyn UidMarkMap>,
}

impl PolicyController {
    /// Create a controller from its parts
    pub fn new(
        pool: TablePool,
        commands: CommandSet,
        runner: Box<dyn CommandRunner>,
        uid_map: Box<dyn UidMarkMap>,
    ) -> Self {
        Self {
            pool,
            commands,
            runner,
            uid_map,
        }
    }

    /// Create a controller with an empty pool sized by `config`
    pub fn from_config(
        config: &Config,
        runner: Box<dyn CommandRunner>,
        uid_map: Box<dyn UidMarkMap>,
    ) -> Self {
        Self::new(
            TablePool::new(config.tables.capacity, config.tables.base_table_number),
            CommandSet::new(&config.commands, &config.chains),
            runner,
            uid_map,
        )
    }

    /// The table pool
    pub fn pool(&self) -> &TablePool {
        &self.pool
    }

    /// Slot index held by `iface`
    pub fn find_table_number(&self, iface: &str) -> Option<usize> {
        self.pool.find_table_number(iface)
    }

    /// Snapshot of occupied slots
    pub fn tables(&self) -> Vec<TableInfo> {
        self.pool.slots()
    }

    /// Mark the UID mark map assigns to `uid`
    pub fn mark_for_uid(&self, uid: u32) -> Option<u32> {
        self.uid_map.mark_for_uid(uid)
    }

    // ------------------------------------------------------------------
    // Routes
    // ------------------------------------------------------------------

    /// Add `dest/prefix` to the table of `iface`, claiming a table if needed
    ///
    /// The route goes through `gateway` unless it is the unspecified address,
    /// in which case it is scoped to the device only.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a bad name or prefix, `SlotExhausted` if no
    /// table is free, `CommandExecution` if `ip route` fails. A table claimed
    /// by this call is released again on failure.
    pub fn add_route(
        &mut self,
        iface: &str,
        dest: IpAddr,
        prefix: u8,
        gateway: IpAddr,
    ) -> Result<(), TableError> {
        to_cidr(dest, prefix)?;
        let index = self.pool.allocate(iface)?;

        let result = self.modify_route(RuleAction::Add, iface, dest, prefix, gateway, index);
        if result.is_err() {
            self.pool.release_if_unused(index);
        }
        result
    }

    /// Remove `dest/prefix` from the table of `iface`
    ///
    /// # Errors
    ///
    /// `InterfaceNotFound` if `iface` holds no table, `CommandExecution` if
    /// `ip route` fails.
    pub fn remove_route(
        &mut self,
        iface: &str,
        dest: IpAddr,
        prefix: u8,
        gateway: IpAddr,
    ) -> Result<(), TableError> {
        let Some(index) = self.pool.find_table_number(iface) else {
            error!("Interface not found: {}", iface);
            return Err(TableError::interface_not_found(iface));
        };

        self.modify_route(RuleAction::Del, iface, dest, prefix, gateway, index)
    }

    /// Issue one `ip route` change against table `index`
    ///
    /// The rule count is only updated when the command succeeds.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a bad prefix, `InvalidTableIndex` for an
    /// unoccupied slot, `CommandExecution` if `ip route` fails.
    pub fn modify_route(
        &mut self,
        action: RuleAction,
        iface: &str,
        dest: IpAddr,
        prefix: u8,
        gateway: IpAddr,
        index: usize,
    ) -> Result<(), TableError> {
        let cidr = to_cidr(dest, prefix)?;
        self.pool.verify_table_index(index)?;

        let table = self.pool.table_number(index);
        let via = (!gateway.is_unspecified()).then_some(gateway);
        let cmd = self.commands.route(action, &cidr, via, iface, table);

        if let Err(e) = run_checked(self.runner.as_ref(), &cmd) {
            error!(
                "ip route {} failed: {} via {} dev {} table {}",
                action, cidr, gateway, iface, table
            );
            return Err(e);
        }

        let count = self.pool.modify_rule_count(index, action);
        debug!("Route {} {} on {} (rule count {})", action, cidr, iface, count);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Source and local rules
    // ------------------------------------------------------------------

    /// Add or remove a "from `addr` lookup table" policy rule
    ///
    /// IPv6 is selected when `addr` contains a colon.
    ///
    /// # Errors
    ///
    /// `InvalidTableIndex` for an unoccupied slot, `CommandExecution` if
    /// `ip rule` fails (the rule count is then left unchanged).
    pub fn modify_from_rule(
        &mut self,
        index: usize,
        action: RuleAction,
        addr: &str,
    ) -> Result<(), TableError> {
        self.pool.verify_table_index(index)?;

        let table = self.pool.table_number(index);
        let cmd = self.commands.from_rule(action, addr, table);
        if let Err(e) = run_checked(self.runner.as_ref(), &cmd) {
            error!("ip rule {} from {} table {} failed", action, addr, table);
            return Err(e);
        }

        self.pool.modify_rule_count(index, action);
        Ok(())
    }

    /// Add or remove a local route for `addr` on `iface` in table `index`
    ///
    /// The rule count changes before the command runs: deleting a local route
    /// of an interface that is already gone fails, and the slot must still be
    /// reclaimable.
    ///
    /// # Errors
    ///
    /// `InvalidTableIndex` for an unoccupied slot, `CommandExecution` if
    /// `ip route` fails.
    pub fn modify_local_route(
        &mut self,
        index: usize,
        action: RuleAction,
        iface: &str,
        addr: &str,
    ) -> Result<(), TableError> {
        self.pool.verify_table_index(index)?;

        let table = self.pool.table_number(index);
        self.pool.modify_rule_count(index, action);

        let cmd = self.commands.local_route(action, addr, iface, table);
        run_checked(self.runner.as_ref(), &cmd).map_err(|e| {
            match action {
                RuleAction::Del => warn!(
                    "Local route {} dev {} table {} not removed: {}",
                    addr, iface, table, e
                ),
                RuleAction::Add => error!(
                    "Local route {} dev {} table {} not added: {}",
                    addr, iface, table, e
                ),
            }
            e
        })
    }

    // ------------------------------------------------------------------
    // Fwmark and NAT
    // ------------------------------------------------------------------

    /// Route traffic marked for `iface` through its table and masquerade it
    ///
    /// # Errors
    ///
    /// See [`set_fwmark_rule`](Self::set_fwmark_rule).
    pub fn add_fwmark_rule(&mut self, iface: &str) -> Result<(), TableError> {
        self.set_fwmark_rule(iface, true)
    }

    /// Undo [`add_fwmark_rule`](Self::add_fwmark_rule)
    ///
    /// # Errors
    ///
    /// See [`set_fwmark_rule`](Self::set_fwmark_rule).
    pub fn remove_fwmark_rule(&mut self, iface: &str) -> Result<(), TableError> {
        self.set_fwmark_rule(iface, false)
    }

    /// Install or remove `ip rule fwmark N table N` plus the IPv4 MASQUERADE
    /// rule matching mark `N` on `iface`
    ///
    /// The rule count tracks the fwmark rule. If it fails, the NAT rule is not
    /// attempted and the count is untouched. If only the NAT rule fails, the
    /// fwmark rule stays counted and the NAT failure is returned.
    ///
    /// # Errors
    ///
    /// `InvalidArgument`/`SlotExhausted` when claiming a table on add,
    /// `InterfaceNotFound` on remove of an untracked interface,
    /// `CommandExecution` if either command fails.
    pub fn set_fwmark_rule(&mut self, iface: &str, add: bool) -> Result<(), TableError> {
        let action = RuleAction::from_add(add);
        let index = if add {
            self.pool.allocate(iface)?
        } else {
            self.pool
                .find_table_number(iface)
                .ok_or_else(|| TableError::interface_not_found(iface))?
        };
        let mark = self.pool.fwmark(index);

        let cmd = self.commands.fwmark_rule(action, mark);
        if let Err(e) = run_checked(self.runner.as_ref(), &cmd) {
            error!("ip rule {} fwmark {} failed for {}", action, mark, iface);
            if add {
                self.pool.release_if_unused(index);
            }
            return Err(e);
        }
        self.pool.modify_rule_count(index, action);

        // No IPv6 NAT on this path
        let nat = self.commands.nat_masquerade(action, iface, mark);
        self.run_all(&nat).map_err(|e| {
            error!("NAT {} for {} mark {} failed: {}", action, iface, mark, e);
            e
        })?;

        info!("Fwmark {} {} for {} (table {})", mark, action, iface, mark);
        Ok(())
    }

    // ------------------------------------------------------------------
    // UID marking
    // ------------------------------------------------------------------

    /// Mark traffic from UIDs `start..=end` with the mark of `iface`
    ///
    /// # Errors
    ///
    /// See [`set_uid_rule`](Self::set_uid_rule).
    pub fn add_uid_rule(&mut self, iface: &str, start: u32, end: u32) -> Result<(), TableError> {
        self.set_uid_rule(iface, start, end, true)
    }

    /// Undo [`add_uid_rule`](Self::add_uid_rule)
    ///
    /// # Errors
    ///
    /// See [`set_uid_rule`](Self::set_uid_rule).
    pub fn remove_uid_rule(&mut self, iface: &str, start: u32, end: u32) -> Result<(), TableError> {
        self.set_uid_rule(iface, start, end, false)
    }

    /// Record the UID range in the UID mark map, then install or remove the
    /// `MARK` rule for both IPv4 and IPv6
    ///
    /// `iface` must already hold a table; no table is claimed here. UID rules
    /// do not count towards the slot's rule count.
    ///
    /// # Errors
    ///
    /// `InterfaceNotFound` if `iface` holds no table, `UidMapRejected` if the
    /// map refuses the change (no firewall command is issued then),
    /// `CommandExecution` if `iptables` or `ip6tables` fails.
    pub fn set_uid_rule(
        &mut self,
        iface: &str,
        start: u32,
        end: u32,
        add: bool,
    ) -> Result<(), TableError> {
        let action = RuleAction::from_add(add);
        let Some(index) = self.pool.find_table_number(iface) else {
            error!("Interface not found: {}", iface);
            return Err(TableError::interface_not_found(iface));
        };
        let mark = self.pool.fwmark(index);

        let accepted = if add {
            self.uid_map.add(start, end, mark)
        } else {
            self.uid_map.remove(start, end, mark)
        };
        if !accepted {
            error!(
                "UID mark map rejected {} of {}-{} mark {}",
                action, start, end, mark
            );
            return Err(TableError::UidMapRejected {
                action: action.ip_verb(),
                start,
                end,
                mark,
            });
        }

        let cmds = self.commands.uid_mark(action, start, end, mark);
        self.run_all(&cmds)?;

        info!("UID rule {} {}-{} -> {} (mark {})", action, start, end, iface, mark);
        Ok(())
    }

    /// Run every command, returning the first failure
    fn run_all(&self, cmds: &[Vec<String>]) -> Result<(), TableError> {
        let mut first_err = None;
        for cmd in cmds {
            if let Err(e) = run_checked(self.runner.as_ref(), cmd) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for PolicyController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyController")
            .field("pool", &self.pool)
            .field("commands", &self.commands)
            .finish_non_exhaustive()
    }
}

fn to_cidr(dest: IpAddr, prefix: u8) -> Result<IpNet, TableError> {
    IpNet::new(dest, prefix)
        .map_err(|_| TableError::invalid(format!("invalid prefix length {prefix} for {dest}")))
}
