// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace-level specs: cross-crate behavior of the instance
//! lifecycle plumbing (registry → snapshot → restore → archive).

use ah_core::instance::{InstanceSettings, InstanceSpec, InstanceState};
use ah_core::verdict::JoinVerdict;
use ah_daemon::Registry;
use ah_storage::{week_of, Archiver};

#[tokio::test]
async fn allocated_instance_survives_snapshot_restore_and_archival() {
    let tmp = tempfile::tempdir().unwrap();
    let registry = Registry::new();

    let inst = registry.allocate(Some("2100-2105")).await.unwrap();
    let conf_dir = tmp.path().join(inst.id.to_string());
    std::fs::create_dir_all(&conf_dir).unwrap();
    inst.fill_spec(InstanceSpec {
        conf_dir: conf_dir.clone(),
        bin_path: "warzone2100".into(),
        settings: InstanceSettings {
            game_port: inst.game_port,
            map_name: "DustyMaze".into(),
            map_hash: "feedbeef".into(),
            player_count: 4,
            time_limit: 45,
            ..InstanceSettings::default()
        },
        admins: vec!["hash-a".into()],
        ..InstanceSpec::default()
    });
    inst.set_state(InstanceState::InLobby);
    ah_storage::save(&inst).unwrap();

    // Restore from disk: identity fields match and the instance is in
    // re-attach mode.
    let snap = ah_storage::load(&conf_dir.join(ah_storage::SNAPSHOT_FILENAME)).unwrap();
    let restored = ah_storage::restore(snap);
    assert_eq!(restored.id, inst.id);
    assert_eq!(restored.game_port, inst.game_port);
    assert_eq!(restored.state(), InstanceState::InLobby);
    assert!(restored.recovered);
    assert_eq!(restored.spec().settings, inst.spec().settings);

    // A second registry (fresh process) accepts the restored instance
    // once, and only once.
    let fresh = Registry::new();
    assert!(fresh.insert(std::sync::Arc::new(restored)));
    let dup = ah_storage::restore(
        ah_storage::load(&conf_dir.join(ah_storage::SNAPSHOT_FILENAME)).unwrap(),
    );
    assert!(!fresh.insert(std::sync::Arc::new(dup)));

    // Archive the conf dir: it lands in the id's week tar.
    let archiver = Archiver::new(tmp.path().join("archives"));
    archiver.archive_instance(&conf_dir).unwrap();
    assert!(!conf_dir.exists());

    let tar_path = tmp
        .path()
        .join("archives")
        .join(format!("{}.tar", week_of(inst.id)));
    let mut names = Vec::new();
    let mut archive = tar::Archive::new(std::fs::File::open(&tar_path).unwrap());
    for entry in archive.entries().unwrap() {
        names.push(entry.unwrap().path().unwrap().to_string_lossy().into_owned());
    }
    assert!(names.contains(&format!("{}/instance.json", inst.id)));
}

#[tokio::test]
async fn port_pool_is_exclusive_across_the_fleet() {
    let registry = Registry::new();
    let mut ports = std::collections::HashSet::new();
    for _ in 0..3 {
        let inst = registry.allocate(Some("2100-2102")).await.unwrap();
        assert!(ports.insert(inst.game_port), "port {} reused", inst.game_port);
    }
    assert!(registry.allocate(Some("2100-2102")).await.is_err());
}

#[test]
fn verdict_lattice_is_total_and_tightening() {
    use JoinVerdict::*;
    let order = [Approve, ApproveSpec, Reject, Ban];
    for (i, a) in order.iter().enumerate() {
        for b in &order[i..] {
            assert_eq!(a.tighten(*b), *b);
            assert_eq!(b.tighten(*a), *b);
        }
    }
}
