// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for daemon tests: a world wired to fakes and a
//! ready-made instance with an overlay stack.

use crate::config::Settings;
use crate::db::fake::FakeDb;
use crate::world::World;
use ah_adapters::{ErrorRelay, FakeIsp, FakeLobby, FakeMapStore};
use ah_core::conf::Conf;
use ah_core::instance::{Instance, InstanceSettings, InstanceSpec};
use std::sync::Arc;

pub(crate) struct TestWorld {
    pub world: World,
    pub db: Arc<FakeDb>,
    pub isp: Arc<FakeIsp>,
    pub lobby: Arc<FakeLobby>,
    pub maps: Arc<FakeMapStore>,
    /// Keeps penalty/archive scratch files alive for the test.
    pub dir: tempfile::TempDir,
}

pub(crate) fn test_world(config: serde_json::Value) -> TestWorld {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config;
    let obj = config.as_object_mut().unwrap();
    obj.entry("instancesPath")
        .or_insert_with(|| dir.path().join("instances").to_string_lossy().into_owned().into());
    obj.entry("archivesPath")
        .or_insert_with(|| dir.path().join("archives").to_string_lossy().into_owned().into());
    obj.entry("ratelimitPenaltiesFilename")
        .or_insert_with(|| dir.path().join("penalties.json").to_string_lossy().into_owned().into());

    let db = Arc::new(FakeDb::new());
    let isp = Arc::new(FakeIsp::clean());
    let lobby = Arc::new(FakeLobby::new());
    let maps = Arc::new(FakeMapStore::new());
    let world = World::new(
        Arc::new(Settings::from_conf(Conf::from_value(config))),
        db.clone(),
        isp.clone(),
        maps.clone(),
        lobby.clone(),
        ErrorRelay::disabled(),
    );
    TestWorld { world, db, isp, lobby, maps, dir }
}

/// An instance with the given overlay trees, registered nowhere.
pub(crate) fn test_instance(id: i64, cfgs: Vec<serde_json::Value>) -> Arc<Instance> {
    let inst = Instance::new(id, 2100, false);
    inst.fill_spec(InstanceSpec {
        conf_dir: std::env::temp_dir().join(id.to_string()),
        bin_path: "warzone2100".into(),
        settings: InstanceSettings {
            game_port: 2100,
            map_name: "TestMap".into(),
            map_hash: "feedbeef".into(),
            player_count: 4,
            time_limit: 45,
            mods: String::new(),
            display_category: 0,
            rating_categories: vec![2],
        },
        admins: vec!["adminhash".into()],
        admins_policy: ah_core::instance::AdminsPolicy::Whitelist,
        queue_name: "testq".into(),
        cfgs: cfgs.iter().cloned().map(Conf::from_value).collect(),
        restore_cfgs: cfgs,
    });
    Arc::new(inst)
}
