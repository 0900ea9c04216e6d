//! Argument vectors for `ip`, `iptables` and `ip6tables`
//!
//! Argument order matters for compatibility with existing tool versions, so
//! every shape is built in one place:
//!
//! ```text
//! ip route <add|del> <dest>/<prefix> [via <gw>] dev <iface> table <N>
//! ip -4|-6 rule <add|del> from <addr> table <N>
//! ip route <add|del> <addr> dev <iface> table <N>
//! ip rule <add|del> fwmark <N> table <N>
//! iptables -t nat <-A|-D> <nat chain> -o <iface> -m mark --mark <N> -j MASQUERADE
//! ip(6)tables -t mangle <-A|-D> <mangle chain> -m owner --uid-owner <a>-<b> -j MARK --set-mark <N>
//! ```

use std::net::IpAddr;

use ipnet::IpNet;

use crate::action::RuleAction;
use crate::config::{ChainsConfig, CommandsConfig};

/// Which firewall rule-sets a command is applied to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IptablesTarget {
    /// `iptables` only
    V4,
    /// `iptables` then `ip6tables`
    V4V6,
}

/// `ip` family flag for a rule source address
///
/// Any address containing a colon is treated as IPv6.
pub fn ip_version_flag(addr: &str) -> &'static str {
    if addr.contains(':') {
        "-6"
    } else {
        "-4"
    }
}

fn argv<I, S>(parts: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    parts.into_iter().map(Into::into).collect()
}

/// Builds command lines from the configured tool paths and chain names
#[derive(Debug, Clone)]
pub struct CommandSet {
    ip: String,
    iptables: String,
    ip6tables: String,
    nat_chain: String,
    mangle_chain: String,
}

impl CommandSet {
    /// Create a command set
    pub fn new(commands: &CommandsConfig, chains: &ChainsConfig) -> Self {
        Self {
            ip: commands.ip_path.clone(),
            iptables: commands.iptables_path.clone(),
            ip6tables: commands.ip6tables_path.clone(),
            nat_chain: chains.nat_postrouting.clone(),
            mangle_chain: chains.mangle_output.clone(),
        }
    }

    /// Route in a secondary table, device-scoped when `gateway` is `None`
    pub fn route(
        &self,
        action: RuleAction,
        dest: &IpNet,
        gateway: Option<IpAddr>,
        iface: &str,
        table: u32,
    ) -> Vec<String> {
        let mut cmd = argv([self.ip.as_str(), "route", action.ip_verb()]);
        cmd.push(dest.to_string());
        if let Some(gw) = gateway {
            cmd.push("via".into());
            cmd.push(gw.to_string());
        }
        cmd.extend(argv(["dev", iface, "table"]));
        cmd.push(table.to_string());
        cmd
    }

    /// Source-address policy rule
    pub fn from_rule(&self, action: RuleAction, addr: &str, table: u32) -> Vec<String> {
        let mut cmd = argv([
            self.ip.as_str(),
            ip_version_flag(addr),
            "rule",
            action.ip_verb(),
            "from",
            addr,
            "table",
        ]);
        cmd.push(table.to_string());
        cmd
    }

    /// Local (host or subnet) route in a secondary table
    pub fn local_route(&self, action: RuleAction, addr: &str, iface: &str, table: u32) -> Vec<String> {
        let mut cmd = argv([
            self.ip.as_str(),
            "route",
            action.ip_verb(),
            addr,
            "dev",
            iface,
            "table",
        ]);
        cmd.push(table.to_string());
        cmd
    }

    /// Policy rule sending packets carrying `mark` to the table of the same number
    pub fn fwmark_rule(&self, action: RuleAction, mark: u32) -> Vec<String> {
        let mark = mark.to_string();
        argv([
            self.ip.as_str(),
            "rule",
            action.ip_verb(),
            "fwmark",
            mark.as_str(),
            "table",
            mark.as_str(),
        ])
    }

    /// MASQUERADE for marked traffic leaving `iface`
    ///
    /// Only the IPv4 rule-set is touched; there is no IPv6 NAT on this path.
    pub fn nat_masquerade(&self, action: RuleAction, iface: &str, mark: u32) -> Vec<Vec<String>> {
        let mark = mark.to_string();
        self.iptables(
            IptablesTarget::V4,
            &[
                "-t",
                "nat",
                action.iptables_flag(),
                self.nat_chain.as_str(),
                "-o",
                iface,
                "-m",
                "mark",
                "--mark",
                mark.as_str(),
                "-j",
                "MASQUERADE",
            ],
        )
    }

    /// Mark traffic owned by UIDs `start..=end` with `mark`, for both families
    pub fn uid_mark(&self, action: RuleAction, start: u32, end: u32, mark: u32) -> Vec<Vec<String>> {
        let uids = format!("{start}-{end}");
        let mark = mark.to_string();
        self.iptables(
            IptablesTarget::V4V6,
            &[
                "-t",
                "mangle",
                action.iptables_flag(),
                self.mangle_chain.as_str(),
                "-m",
                "owner",
                "--uid-owner",
                uids.as_str(),
                "-j",
                "MARK",
                "--set-mark",
                mark.as_str(),
            ],
        )
    }

    /// One argument vector per firewall binary selected by `target`
    pub fn iptables(&self, target: IptablesTarget, args: &[&str]) -> Vec<Vec<String>> {
        let binaries = match target {
            IptablesTarget::V4 => vec![self.iptables.as_str()],
            IptablesTarget::V4V6 => vec![self.iptables.as_str(), self.ip6tables.as_str()],
        };
        binaries
            .into_iter()
            .map(|bin| {
                let mut cmd = vec![bin.to_string()];
                cmd.extend(args.iter().map(|a| (*a).to_string()));
                cmd
            })
            .collect()
    }
}
