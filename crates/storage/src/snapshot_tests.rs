// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::snapshot::{load, restore, save, SnapshotError, SNAPSHOT_FILENAME};
use ah_core::conf::Conf;
use ah_core::instance::{
    AdminsPolicy, Instance, InstanceSettings, InstanceSpec, InstanceState,
};
use serde_json::json;
use std::sync::atomic::Ordering;

fn sample_instance(conf_dir: std::path::PathBuf) -> Instance {
    let inst = Instance::new(1_700_000_000, 2105, false);
    inst.pid.store(4242, Ordering::SeqCst);
    inst.set_state(InstanceState::InLobby);
    inst.lobby_id.store(777, Ordering::SeqCst);
    let cfg_values = vec![
        json!({ "timelimit": 45 }),
        json!({ "players": 4 }),
        json!({ "adminsPolicy": "nobody" }),
    ];
    inst.fill_spec(InstanceSpec {
        conf_dir,
        bin_path: "/usr/bin/warzone2100".into(),
        settings: InstanceSettings {
            game_port: 2105,
            map_name: "DustyMaze".into(),
            map_hash: "abcd1234".into(),
            player_count: 4,
            time_limit: 45,
            mods: String::new(),
            display_category: 1,
            rating_categories: vec![2, 3],
        },
        admins: vec!["hash-a".into(), "hash-b".into()],
        admins_policy: AdminsPolicy::Whitelist,
        queue_name: "duel".into(),
        cfgs: cfg_values.iter().cloned().map(Conf::from_value).collect(),
        restore_cfgs: cfg_values,
    });
    inst
}

#[test]
fn snapshot_roundtrip_preserves_identity() {
    let tmp = tempfile::tempdir().unwrap();
    let inst = sample_instance(tmp.path().to_path_buf());
    save(&inst).unwrap();

    let snap = load(&tmp.path().join(SNAPSHOT_FILENAME)).unwrap();
    let back = restore(snap);

    assert_eq!(back.id, inst.id);
    assert_eq!(back.game_port, inst.game_port);
    assert_eq!(back.state(), InstanceState::InLobby);
    assert_eq!(back.lobby_id.load(Ordering::SeqCst), 777);
    assert!(back.recovered, "restored instances must be marked recovered");

    let spec = back.spec();
    assert_eq!(spec.admins, vec!["hash-a".to_string(), "hash-b".to_string()]);
    assert_eq!(spec.admins_policy, AdminsPolicy::Whitelist);
    assert_eq!(spec.settings, inst.spec().settings);
    assert_eq!(spec.queue_name, "duel");
    assert_eq!(spec.cfgs.len(), 3);
    assert_eq!(spec.cfgs[0].get_i64(&["timelimit"]), Some(45));
    assert_eq!(spec.cfgs[1].get_i64(&["players"]), Some(4));
}

#[test]
fn zero_port_snapshot_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join(SNAPSHOT_FILENAME);
    let mut inst = serde_json::to_value(crate::snapshot::snapshot_of(&sample_instance(
        tmp.path().to_path_buf(),
    )))
    .unwrap();
    inst["game_port"] = json!(0);
    std::fs::write(&path, serde_json::to_vec(&inst).unwrap()).unwrap();

    assert!(matches!(load(&path), Err(SnapshotError::InvalidPort)));
}
