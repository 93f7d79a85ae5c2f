// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Recovery tests build instance dirs by hand and check what survives
//! a restart.

use crate::recovery::recover_instances;
use crate::test_support::test_world;
use ah_core::instance::{Instance, InstanceSettings, InstanceSpec, InstanceState};
use serde_json::json;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;

fn write_instance_dir(
    instances_path: &Path,
    id: i64,
    pid: i64,
    state: InstanceState,
) -> std::path::PathBuf {
    let conf_dir = instances_path.join(id.to_string());
    std::fs::create_dir_all(&conf_dir).unwrap();
    let inst = Instance::new(id, 2100, false);
    inst.pid.store(pid, Ordering::SeqCst);
    inst.set_state(state);
    inst.fill_spec(InstanceSpec {
        conf_dir: conf_dir.clone(),
        bin_path: "warzone2100".into(),
        settings: InstanceSettings {
            game_port: 2100,
            player_count: 2,
            time_limit: 30,
            ..InstanceSettings::default()
        },
        ..InstanceSpec::default()
    });
    ah_storage::save(&inst).unwrap();
    conf_dir
}

#[tokio::test]
async fn dead_instance_dirs_are_archived() {
    let tw = test_world(json!({}));
    let instances_path = tw.world.settings.instances_path();
    // A pid that cannot exist: the dir must be archived away.
    let conf_dir =
        write_instance_dir(&instances_path, 1_700_000_000, i64::MAX / 2, InstanceState::InLobby);
    std::fs::write(conf_dir.join("config"), "[General]\n").unwrap();

    let world = Arc::new(tw.world);
    recover_instances(&world).await;

    assert!(!conf_dir.exists());
    assert!(world.registry.list().is_empty());
    let week = ah_storage::week_of(1_700_000_000);
    assert!(world.settings.archives_path().join(format!("{week}.tar")).exists());
}

#[tokio::test]
async fn foreign_process_is_not_adopted() {
    let tw = test_world(json!({}));
    let instances_path = tw.world.settings.instances_path();
    // Our own pid is alive, but its cmdline is no hoster invocation.
    let me = std::process::id() as i64;
    let conf_dir =
        write_instance_dir(&instances_path, 1_700_000_001, me, InstanceState::InLobby);

    let world = Arc::new(tw.world);
    recover_instances(&world).await;

    // Treated as dead: archived, not registered.
    assert!(!conf_dir.exists());
    assert!(world.registry.list().is_empty());
}

#[tokio::test]
async fn snapshotless_dirs_are_left_alone() {
    let tw = test_world(json!({}));
    let instances_path = tw.world.settings.instances_path();
    let stray = instances_path.join("1700000002");
    std::fs::create_dir_all(&stray).unwrap();
    std::fs::write(stray.join("junk"), "data").unwrap();

    let world = Arc::new(tw.world);
    recover_instances(&world).await;
    assert!(stray.exists(), "dirs without a snapshot are not touched");
}

#[tokio::test]
async fn non_numeric_dirs_are_skipped() {
    let tw = test_world(json!({}));
    let instances_path = tw.world.settings.instances_path();
    let named = instances_path.join("lost+found");
    std::fs::create_dir_all(&named).unwrap();

    let world = Arc::new(tw.world);
    recover_instances(&world).await;
    assert!(named.exists());
}

#[tokio::test]
async fn missing_instances_dir_is_created() {
    let tw = test_world(json!({}));
    let world = Arc::new(tw.world);
    assert!(!world.settings.instances_path().exists());
    recover_instances(&world).await;
    assert!(world.settings.instances_path().exists());
}

#[tokio::test]
async fn id_mismatch_is_not_archived() {
    let tw = test_world(json!({}));
    let instances_path = tw.world.settings.instances_path();
    // Snapshot says 1700000003 but lives in 1700009999.
    let conf_dir =
        write_instance_dir(&instances_path, 1_700_000_003, i64::MAX / 2, InstanceState::InLobby);
    let moved = instances_path.join("1700009999");
    std::fs::rename(&conf_dir, &moved).unwrap();

    let world = Arc::new(tw.world);
    recover_instances(&world).await;
    assert!(moved.exists(), "mismatched snapshots are left for operators");
}
