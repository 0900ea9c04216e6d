//! UID marking integration tests
//!
//! UID rules steer an application's traffic into an interface's table by
//! marking it in the mangle table. They require the interface to hold a
//! table already and never change its rule count.

use st_router::config::Config;
use st_router::exec::RecordingRunner;
use st_router::policy::{PolicyController, UidMarkMap, UidRangeMarkMap};
use st_router::TableError;

/// A UID mark map that refuses every change
struct RejectingMap;

impl UidMarkMap for RejectingMap {
    fn add(&mut self, _start: u32, _end: u32, _mark: u32) -> bool {
        false
    }

    fn remove(&mut self, _start: u32, _end: u32, _mark: u32) -> bool {
        false
    }

    fn mark_for_uid(&self, _uid: u32) -> Option<u32> {
        None
    }
}

fn controller_with(uid_map: Box<dyn UidMarkMap>) -> (PolicyController, RecordingRunner) {
    let mut config = Config::default();
    config.tables.capacity = 2;
    config.tables.base_table_number = 100;
    config.commands.ip_path = "ip".into();
    config.commands.iptables_path = "iptables".into();
    config.commands.ip6tables_path = "ip6tables".into();

    let runner = RecordingRunner::new();
    let ctl = PolicyController::from_config(&config, Box::new(runner.clone()), uid_map);
    (ctl, runner)
}

fn controller() -> (PolicyController, RecordingRunner) {
    controller_with(Box::new(UidRangeMarkMap::new()))
}

#[test]
fn test_uid_rule_marks_both_families() {
    let (mut ctl, runner) = controller();
    ctl.add_fwmark_rule("wlan0").unwrap();
    runner.clear();

    ctl.set_uid_rule("wlan0", 1000, 1999, true).unwrap();
    assert_eq!(
        runner.command_lines(),
        vec![
            "iptables -t mangle -A st_mangle_OUTPUT -m owner --uid-owner 1000-1999 -j MARK --set-mark 100",
            "ip6tables -t mangle -A st_mangle_OUTPUT -m owner --uid-owner 1000-1999 -j MARK --set-mark 100",
        ]
    );
    assert_eq!(ctl.mark_for_uid(1500), Some(100));

    // UID rules are not counted against the table
    assert_eq!(ctl.pool().rule_count(0), 1);

    ctl.set_uid_rule("wlan0", 1000, 1999, false).unwrap();
    assert_eq!(ctl.mark_for_uid(1500), None);
    assert_eq!(runner.commands().len(), 4);
    assert!(runner.command_lines()[2].contains(" -D st_mangle_OUTPUT "));
}

#[test]
fn test_uid_rule_on_unallocated_interface() {
    let (mut ctl, runner) = controller();

    let err = ctl.set_uid_rule("eth0", 1000, 1999, true).unwrap_err();
    assert_eq!(err, TableError::InterfaceNotFound("eth0".into()));
    assert!(runner.commands().is_empty());
    assert_eq!(ctl.pool().occupied_count(), 0);
}

#[test]
fn test_uid_map_rejection_issues_no_command() {
    let (mut ctl, runner) = controller_with(Box::new(RejectingMap));
    ctl.add_fwmark_rule("wlan0").unwrap();
    runner.clear();

    let err = ctl.add_uid_rule("wlan0", 1000, 1999).unwrap_err();
    assert_eq!(
        err,
        TableError::UidMapRejected {
            action: "add",
            start: 1000,
            end: 1999,
            mark: 100,
        }
    );
    assert!(runner.commands().is_empty());

    let err = ctl.remove_uid_rule("wlan0", 1000, 1999).unwrap_err();
    assert!(matches!(err, TableError::UidMapRejected { action: "del", .. }));
    assert!(runner.commands().is_empty());
}

#[test]
fn test_overlapping_uid_ranges_rejected() {
    let (mut ctl, runner) = controller();
    ctl.add_fwmark_rule("wlan0").unwrap();
    ctl.add_fwmark_rule("rmnet0").unwrap();
    ctl.add_uid_rule("wlan0", 1000, 1999).unwrap();
    runner.clear();

    let err = ctl.add_uid_rule("rmnet0", 1500, 2500).unwrap_err();
    assert!(matches!(err, TableError::UidMapRejected { mark: 101, .. }));
    assert!(runner.commands().is_empty());

    ctl.add_uid_rule("rmnet0", 2000, 2999).unwrap();
    assert_eq!(ctl.mark_for_uid(1999), Some(100));
    assert_eq!(ctl.mark_for_uid(2000), Some(101));
}

#[test]
fn test_remove_unknown_uid_range_rejected() {
    let (mut ctl, runner) = controller();
    ctl.add_fwmark_rule("wlan0").unwrap();
    runner.clear();

    let err = ctl.remove_uid_rule("wlan0", 1000, 1999).unwrap_err();
    assert!(matches!(err, TableError::UidMapRejected { .. }));
    assert!(runner.commands().is_empty());
}

#[test]
fn test_ip6tables_failure_still_runs_iptables() {
    let (mut ctl, runner) = controller();
    ctl.add_fwmark_rule("wlan0").unwrap();
    runner.clear();
    runner.fail_matching("ip6tables");

    let err = ctl.add_uid_rule("wlan0", 1000, 1999).unwrap_err();
    assert!(matches!(err, TableError::CommandExecution { .. }));
    assert_eq!(runner.commands().len(), 2);
}
