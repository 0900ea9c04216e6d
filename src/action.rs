//! Add/remove direction shared by the table pool and command synthesis.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Whether a policy construct is being installed or torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    /// Install the rule, route or mark
    Add,
    /// Remove it again
    Del,
}

impl RuleAction {
    /// Build from an `add` flag
    #[must_use]
    pub const fn from_add(add: bool) -> Self {
        if add {
            Self::Add
        } else {
            Self::Del
        }
    }

    /// Verb understood by `ip route` and `ip rule`
    #[must_use]
    pub const fn ip_verb(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Del => "del",
        }
    }

    /// Append/delete flag understood by `iptables`
    #[must_use]
    pub const fn iptables_flag(self) -> &'static str {
        match self {
            Self::Add => "-A",
            Self::Del => "-D",
        }
    }
}

impl fmt::Display for RuleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ip_verb())
    }
}
