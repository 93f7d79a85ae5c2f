// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::config::Settings;
use ah_core::conf::Conf;
use serde_json::json;

#[test]
fn defaults_apply_when_keys_missing() {
    let s = Settings::from_conf(Conf::new());
    assert_eq!(s.instances_path().to_string_lossy(), "./instances/");
    assert_eq!(s.archives_path().to_string_lossy(), "./archives/");
    assert_eq!(s.listen_addr(), "127.0.0.1:9271");
    assert_eq!(s.ports_spec(), None);
    assert_eq!(s.file_perms(), 0o644);
}

#[test]
fn reload_replaces_tree_and_keeps_old_on_failure() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("config.json");
    std::fs::write(&path, r#"{ "ports": "2100" }"#).unwrap();

    let s = Settings::load(&path).unwrap();
    assert_eq!(s.ports_spec().as_deref(), Some("2100"));

    std::fs::write(&path, r#"{ "ports": "2100-2110" }"#).unwrap();
    s.reload().unwrap();
    assert_eq!(s.ports_spec().as_deref(), Some("2100-2110"));

    std::fs::write(&path, "{ not json").unwrap();
    assert!(s.reload().is_err());
    assert_eq!(s.ports_spec().as_deref(), Some("2100-2110"));
}

#[test]
fn read_gives_access_to_arbitrary_keys() {
    let s = Settings::from_conf(Conf::from_value(json!({
        "queues": { "duel": { "players": 2 } }
    })));
    let players = s.read(|c| c.get_i64(&["queues", "duel", "players"]));
    assert_eq!(players, Some(2));
}
