//! Table lifecycle integration tests
//!
//! Drives routes, source rules, local routes and fwmark rules through a
//! [`PolicyController`] and checks both the issued commands and the pool.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test --test integration_tests table_lifecycle
//! ```

use std::net::IpAddr;

use st_router::config::Config;
use st_router::exec::RecordingRunner;
use st_router::policy::{PolicyController, UidRangeMarkMap};
use st_router::{RuleAction, TableError, TableInfo};

// ============================================================================
// Test Helpers
// ============================================================================

fn config(capacity: usize, base: u32) -> Config {
    let mut config = Config::default();
    config.tables.capacity = capacity;
    config.tables.base_table_number = base;
    config.commands.ip_path = "ip".into();
    config.commands.iptables_path = "iptables".into();
    config.commands.ip6tables_path = "ip6tables".into();
    config
}

fn controller(capacity: usize, base: u32) -> (PolicyController, RecordingRunner) {
    let runner = RecordingRunner::new();
    let ctl = PolicyController::from_config(
        &config(capacity, base),
        Box::new(runner.clone()),
        Box::new(UidRangeMarkMap::new()),
    );
    (ctl, runner)
}

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

fn rule_count(ctl: &PolicyController, iface: &str) -> Option<u32> {
    ctl.find_table_number(iface)
        .map(|index| ctl.pool().rule_count(index))
}

// ============================================================================
// Reference scenario
// ============================================================================

#[test]
fn test_route_and_fwmark_share_one_table() {
    let (mut ctl, runner) = controller(2, 100);
    let any = ip("::");

    ctl.add_route("wlan0", ip("10.0.0.0"), 24, any).unwrap();
    assert_eq!(ctl.find_table_number("wlan0"), Some(0));
    assert_eq!(ctl.pool().table_number(0), 100);
    assert_eq!(rule_count(&ctl, "wlan0"), Some(1));

    ctl.add_fwmark_rule("wlan0").unwrap();
    assert_eq!(ctl.find_table_number("wlan0"), Some(0));
    assert_eq!(rule_count(&ctl, "wlan0"), Some(2));

    ctl.remove_route("wlan0", ip("10.0.0.0"), 24, any).unwrap();
    assert_eq!(rule_count(&ctl, "wlan0"), Some(1));
    assert_eq!(ctl.pool().occupied_count(), 1);

    ctl.remove_fwmark_rule("wlan0").unwrap();
    assert_eq!(ctl.find_table_number("wlan0"), None);
    assert_eq!(ctl.pool().occupied_count(), 0);

    assert_eq!(
        runner.command_lines(),
        vec![
            "ip route add 10.0.0.0/24 dev wlan0 table 100",
            "ip rule add fwmark 100 table 100",
            "iptables -t nat -A st_nat_POSTROUTING -o wlan0 -m mark --mark 100 -j MASQUERADE",
            "ip route del 10.0.0.0/24 dev wlan0 table 100",
            "ip rule del fwmark 100 table 100",
            "iptables -t nat -D st_nat_POSTROUTING -o wlan0 -m mark --mark 100 -j MASQUERADE",
        ]
    );
}

#[test]
fn test_released_slot_is_reused() {
    let (mut ctl, _) = controller(2, 100);

    ctl.add_fwmark_rule("wlan0").unwrap();
    ctl.add_fwmark_rule("rmnet0").unwrap();
    ctl.remove_fwmark_rule("wlan0").unwrap();

    ctl.add_fwmark_rule("usb0").unwrap();
    assert_eq!(ctl.find_table_number("usb0"), Some(0));
    assert_eq!(ctl.find_table_number("rmnet0"), Some(1));
}

// ============================================================================
// Exhaustion and unknown interfaces
// ============================================================================

#[test]
fn test_exhaustion_leaves_pool_untouched() {
    let (mut ctl, runner) = controller(2, 100);
    ctl.add_fwmark_rule("wlan0").unwrap();
    ctl.add_route("rmnet0", ip("0.0.0.0"), 0, ip("10.1.1.1")).unwrap();
    let before: Vec<TableInfo> = ctl.tables();
    runner.clear();

    let err = ctl.add_route("usb0", ip("10.0.0.0"), 8, ip("::")).unwrap_err();
    assert_eq!(err, TableError::SlotExhausted { capacity: 2 });
    assert!(err.is_recoverable());

    let err = ctl.add_fwmark_rule("usb0").unwrap_err();
    assert!(matches!(err, TableError::SlotExhausted { .. }));

    assert_eq!(ctl.tables(), before);
    assert!(runner.commands().is_empty());
}

#[test]
fn test_remove_route_unknown_interface() {
    let (mut ctl, runner) = controller(2, 100);
    ctl.add_fwmark_rule("wlan0").unwrap();
    let before = ctl.tables();
    runner.clear();

    let err = ctl
        .remove_route("eth0", ip("10.0.0.0"), 24, ip("::"))
        .unwrap_err();
    assert_eq!(err, TableError::InterfaceNotFound("eth0".into()));
    assert_eq!(ctl.tables(), before);
    assert!(runner.commands().is_empty());
}

#[test]
fn test_remove_fwmark_unknown_interface() {
    let (mut ctl, runner) = controller(2, 100);
    let err = ctl.remove_fwmark_rule("eth0").unwrap_err();
    assert!(matches!(err, TableError::InterfaceNotFound(_)));
    assert!(runner.commands().is_empty());
}

// ============================================================================
// Command failures
// ============================================================================

#[test]
fn test_failed_first_route_releases_claim() {
    let (mut ctl, runner) = controller(2, 100);
    runner.fail_matching("route add");

    let err = ctl.add_route("wlan0", ip("10.0.0.0"), 24, ip("::")).unwrap_err();
    assert!(matches!(err, TableError::CommandExecution { .. }));
    assert_eq!(ctl.find_table_number("wlan0"), None);
    assert_eq!(ctl.pool().occupied_count(), 0);
}

#[test]
fn test_failed_route_keeps_existing_table() {
    let (mut ctl, runner) = controller(2, 100);
    ctl.add_fwmark_rule("wlan0").unwrap();
    runner.fail_matching("route add");

    assert!(ctl.add_route("wlan0", ip("10.0.0.0"), 24, ip("::")).is_err());
    assert_eq!(rule_count(&ctl, "wlan0"), Some(1));
}

#[test]
fn test_failed_fwmark_rule_skips_nat() {
    let (mut ctl, runner) = controller(2, 100);
    runner.fail_matching("fwmark");

    assert!(ctl.add_fwmark_rule("wlan0").is_err());
    assert_eq!(ctl.find_table_number("wlan0"), None);
    assert_eq!(runner.command_lines(), vec!["ip rule add fwmark 100 table 100"]);
}

#[test]
fn test_failed_nat_keeps_fwmark_count() {
    let (mut ctl, runner) = controller(2, 100);
    runner.fail_matching("MASQUERADE");

    let err = ctl.add_fwmark_rule("wlan0").unwrap_err();
    assert!(matches!(err, TableError::CommandExecution { .. }));
    assert_eq!(rule_count(&ctl, "wlan0"), Some(1));
}

// ============================================================================
// Source rules and local routes
// ============================================================================

#[test]
fn test_from_rule_counts_on_success() {
    let (mut ctl, runner) = controller(2, 100);
    ctl.add_fwmark_rule("wlan0").unwrap();
    let index = ctl.find_table_number("wlan0").unwrap();
    runner.clear();

    ctl.modify_from_rule(index, RuleAction::Add, "192.168.43.0/24").unwrap();
    ctl.modify_from_rule(index, RuleAction::Add, "fd00::/64").unwrap();
    assert_eq!(rule_count(&ctl, "wlan0"), Some(3));

    runner.fail_matching("fd00::/64");
    assert!(ctl.modify_from_rule(index, RuleAction::Del, "fd00::/64").is_err());
    assert_eq!(rule_count(&ctl, "wlan0"), Some(3));

    assert_eq!(
        runner.command_lines(),
        vec![
            "ip -4 rule add from 192.168.43.0/24 table 100",
            "ip -6 rule add from fd00::/64 table 100",
            "ip -6 rule del from fd00::/64 table 100",
        ]
    );
}

#[test]
fn test_from_rule_on_free_slot() {
    let (mut ctl, runner) = controller(2, 100);
    let err = ctl
        .modify_from_rule(1, RuleAction::Add, "10.0.0.1")
        .unwrap_err();
    assert_eq!(err, TableError::InvalidTableIndex(1));
    assert!(runner.commands().is_empty());
}

#[test]
fn test_local_route_delete_reclaims_table_even_on_failure() {
    let (mut ctl, runner) = controller(2, 100);
    ctl.add_route("wlan0", ip("10.0.0.0"), 24, ip("::")).unwrap();
    let index = ctl.find_table_number("wlan0").unwrap();

    ctl.modify_local_route(index, RuleAction::Add, "wlan0", "192.168.43.0/24")
        .unwrap();
    ctl.remove_route("wlan0", ip("10.0.0.0"), 24, ip("::")).unwrap();
    assert_eq!(rule_count(&ctl, "wlan0"), Some(1));

    // Interface already gone: the kernel dropped the route with it
    runner.fail_matching("192.168.43.0/24 dev wlan0");
    let result = ctl.modify_local_route(index, RuleAction::Del, "wlan0", "192.168.43.0/24");
    assert!(result.is_err());
    assert_eq!(ctl.find_table_number("wlan0"), None);
}

#[test]
fn test_failed_local_route_add_keeps_count() {
    let (mut ctl, runner) = controller(2, 100);
    ctl.add_fwmark_rule("wlan0").unwrap();
    let index = ctl.find_table_number("wlan0").unwrap();
    runner.fail_matching("route add");

    let err = ctl
        .modify_local_route(index, RuleAction::Add, "wlan0", "192.168.43.0/24")
        .unwrap_err();
    assert!(matches!(err, TableError::CommandExecution { .. }));
    assert_eq!(rule_count(&ctl, "wlan0"), Some(2));
    assert_eq!(ctl.pool().interface(index), Some("wlan0"));

    // Both the fwmark rule and the failed local route must be undone
    runner.clear_failures();
    ctl.remove_fwmark_rule("wlan0").unwrap();
    assert_eq!(ctl.find_table_number("wlan0"), Some(index));
    ctl.modify_local_route(index, RuleAction::Del, "wlan0", "192.168.43.0/24")
        .unwrap();
    assert_eq!(ctl.find_table_number("wlan0"), None);
}

// ============================================================================
// Pool invariants
// ============================================================================

#[test]
fn test_table_number_equals_fwmark() {
    let (mut ctl, _) = controller(4, 1000);
    for iface in ["wlan0", "rmnet0", "usb0", "rndis0"] {
        ctl.add_fwmark_rule(iface).unwrap();
    }

    for table in ctl.tables() {
        assert_eq!(table.table_number, table.fwmark);
        assert_eq!(table.table_number, 1000 + table.index as u32);
    }
}

#[test]
fn test_occupied_iff_counted() {
    let (mut ctl, _) = controller(2, 100);
    let any = ip("::");

    let ops: [(&str, bool); 8] = [
        ("wlan0", true),
        ("rmnet0", true),
        ("wlan0", true),
        ("wlan0", false),
        ("rmnet0", false),
        ("wlan0", false),
        ("wlan0", false),
        ("rmnet0", true),
    ];
    for (iface, add) in ops {
        let _ = if add {
            ctl.add_route(iface, ip("10.0.0.0"), 24, any)
        } else {
            ctl.remove_route(iface, ip("10.0.0.0"), 24, any)
        };

        for index in 0..ctl.pool().capacity() {
            let occupied = ctl.pool().interface(index).is_some();
            assert_eq!(occupied, ctl.pool().rule_count(index) > 0);
        }
    }

    assert_eq!(ctl.find_table_number("wlan0"), None);
    assert_eq!(rule_count(&ctl, "rmnet0"), Some(1));
}

#[test]
fn test_invalid_interface_name() {
    let (mut ctl, runner) = controller(2, 100);

    let err = ctl.add_fwmark_rule("").unwrap_err();
    assert!(matches!(err, TableError::InvalidArgument(_)));

    let err = ctl.add_fwmark_rule("a-very-long-interface-name").unwrap_err();
    assert!(matches!(err, TableError::InvalidArgument(_)));

    assert!(runner.commands().is_empty());
    assert_eq!(ctl.pool().occupied_count(), 0);
}

#[test]
fn test_invalid_prefix() {
    let (mut ctl, runner) = controller(2, 100);
    let err = ctl.add_route("wlan0", ip("10.0.0.0"), 33, ip("::")).unwrap_err();
    assert!(matches!(err, TableError::InvalidArgument(_)));
    assert_eq!(ctl.find_table_number("wlan0"), None);
    assert!(runner.commands().is_empty());
}
