// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The instance factory: from a queue's config subtree to a fully
//! prepared, not-yet-started instance on disk.

use crate::world::World;
use ah_core::conf::{overlay_get, overlay_get_or, Conf};
use ah_core::instance::{AdminsPolicy, Instance, InstanceSettings, InstanceSpec};
use indexmap::IndexMap;
use rand::Rng;
use serde_json::{json, Value};
use std::io::Write;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const BANLIST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum FactoryError {
    #[error(transparent)]
    Registry(#[from] crate::registry::RegistryError),
    #[error("no maps defined for preset")]
    NoMaps,
    #[error("map {0} has no hash defined")]
    MapHashMissing(String),
    #[error("invalid playercount")]
    InvalidPlayerCount,
    #[error("fetching map blob: {0}")]
    Map(#[from] ah_adapters::MapError),
    #[error("fetching banlist: {0}")]
    Banlist(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("serializing preset: {0}")]
    Preset(#[from] serde_json::Error),
}

/// Generate a ready-to-spawn instance for a queue. The allocation is
/// released again when any preparation step fails.
pub async fn generate(
    world: &Arc<World>,
    queue_cfg: Conf,
    queue_name: &str,
) -> Result<Arc<Instance>, FactoryError> {
    let ports = world.settings.ports_spec();
    let inst = world.registry.allocate(ports.as_deref()).await?;
    match build(world, &inst, queue_cfg, queue_name).await {
        Ok(spec) => {
            inst.fill_spec(spec);
            Ok(inst)
        }
        Err(e) => {
            world.registry.release(inst.id);
            Err(e)
        }
    }
}

async fn build(
    world: &Arc<World>,
    inst: &Instance,
    queue_cfg: Conf,
    queue_name: &str,
) -> Result<InstanceSpec, FactoryError> {
    let conf_dir = world.settings.instances_path().join(inst.id.to_string());
    let dir_perms = world.settings.dir_perms();
    for sub in ["maps", "autohost", "multiplay/players"] {
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(dir_perms)
            .create(conf_dir.join(sub))?;
    }

    // Pick a map uniformly at random from the queue's map tree.
    let map_names = queue_cfg.keys(&["maps"]).filter(|k| !k.is_empty()).ok_or(FactoryError::NoMaps)?;
    let map_name = map_names[rand::thread_rng().gen_range(0..map_names.len())].clone();
    let map_hash = queue_cfg
        .get_string(&["maps", &map_name, "hash"])
        .ok_or_else(|| FactoryError::MapHashMissing(map_name.clone()))?;
    let blob = world.maps.fetch(&map_hash).await?;
    let file_perms = world.settings.file_perms();
    write_file(&conf_dir.join("maps").join(format!("{map_hash}.wz")), &blob, file_perms)?;

    // Overlay stack: map-specific, queue, global fallback.
    let cfgs = vec![
        queue_cfg.subtree(&["maps", &map_name]),
        queue_cfg.clone(),
        world.settings.read(|c| c.subtree(&["settingsFallback"])),
    ];
    let restore_cfgs: Vec<Value> = cfgs.iter().map(|c| c.as_value().clone()).collect();

    let player_count = overlay_get_or(&cfgs, |c| c.get_i64(&["players"]), -1);
    if player_count < 2 {
        tracing::warn!(instance = inst.id, player_count, "invalid playercount, aborting room");
        return Err(FactoryError::InvalidPlayerCount);
    }
    let settings = InstanceSettings {
        game_port: inst.game_port,
        map_name: map_name.clone(),
        map_hash: map_hash.clone(),
        player_count,
        time_limit: overlay_get_or(&cfgs, |c| c.get_i64(&["timelimit"]), 2),
        mods: overlay_get_or(&cfgs, |c| c.get_string(&["mods"]), String::new()),
        display_category: overlay_get_or(&cfgs, |c| c.get_i64(&["displayCategory"]), 0),
        rating_categories: overlay_get_or(&cfgs, |c| c.get_i64_vec(&["ratingCategories"]), vec![]),
    };
    let bin_path =
        overlay_get_or(&cfgs, |c| c.get_string(&["binary"]), "warzone2100".to_string());

    let (admins, admins_policy) = resolve_admins(world, inst, &cfgs).await;

    write_preset(&conf_dir, &cfgs, &settings, file_perms)?;
    write_config(&conf_dir, &cfgs, file_perms)?;
    run_actions(&conf_dir, &cfgs, file_perms)?;
    fetch_banlist(inst, &conf_dir, &cfgs, file_perms).await?;

    Ok(InstanceSpec {
        conf_dir,
        bin_path,
        settings,
        admins,
        admins_policy,
        queue_name: queue_name.to_string(),
        cfgs,
        restore_cfgs,
    })
}

async fn resolve_admins(
    world: &Arc<World>,
    inst: &Instance,
    cfgs: &[Conf],
) -> (Vec<String>, AdminsPolicy) {
    let policy = overlay_get_or(cfgs, |c| c.get_string(&["adminsPolicy"]), String::new());
    match policy.as_str() {
        "nobody" => (Vec::new(), AdminsPolicy::Nobody),
        "moderators" => (fetch_moderators(world, inst).await, AdminsPolicy::Moderators),
        "whitelist" => match overlay_get(cfgs, |c| c.get_string_vec(&["admins"])) {
            Some(admins) => (admins, AdminsPolicy::Whitelist),
            None => {
                tracing::warn!(
                    instance = inst.id,
                    "admins for whitelist policy not declared anywhere, using moderators"
                );
                (fetch_moderators(world, inst).await, AdminsPolicy::Moderators)
            }
        },
        other => {
            if !other.is_empty() {
                tracing::warn!(instance = inst.id, policy = other, "unknown adminsPolicy");
            } else {
                tracing::warn!(
                    instance = inst.id,
                    "adminsPolicy not declared anywhere, no admins for you"
                );
            }
            (Vec::new(), AdminsPolicy::Nobody)
        }
    }
}

async fn fetch_moderators(world: &Arc<World>, inst: &Instance) -> Vec<String> {
    match world.db.fetch_moderator_hashes().await {
        Ok(hashes) => hashes,
        Err(e) => {
            tracing::warn!(instance = inst.id, error = %e, "error fetching moderators");
            Vec::new()
        }
    }
}

fn write_preset(
    conf_dir: &Path,
    cfgs: &[Conf],
    settings: &InstanceSettings,
    perms: u32,
) -> Result<(), FactoryError> {
    let mut preset_map = serde_json::Map::new();
    preset_map.insert(
        "locked".to_string(),
        json!({
            "power": true,
            "alliances": false,
            "teams": true,
            "difficulty": true,
            "ai": true,
            "scavengers": false,
            "position": false,
            "bases": false,
        }),
    );
    preset_map.insert(
        "challenge".to_string(),
        json!({
            "map": settings.map_name,
            "maxPlayers": settings.player_count,
            "scavengers": overlay_get_or(cfgs, |c| c.pick_number(&["settingsScavs"]), 69),
            "alliances": overlay_get_or(cfgs, |c| c.pick_number(&["settingsAlliance"]), 69),
            "powerLevel": overlay_get_or(cfgs, |c| c.pick_number(&["settingsPower"]), 69),
            "bases": overlay_get_or(cfgs, |c| c.pick_number(&["settingsBase"]), 69),
            "name": overlay_get_or(cfgs, |c| c.get_string(&["roomName"]), "Welcome".to_string()),
            "techLevel": overlay_get_or(cfgs, |c| c.pick_number(&["settingsTechLevel"]), 1),
            "spectatorHost": true,
            "openSpectatorSlots":
                overlay_get_or(cfgs, |c| c.pick_number(&["settingsSpecSlots"]), 10),
            "allowPositionChange": true,
        }),
    );

    match overlay_get(cfgs, |c| c.get_object(&["presetOverride"])) {
        Some(over) => {
            // An override replaces the per-player entries wholesale.
            for (key, value) in over {
                preset_map.insert(key, value);
            }
        }
        None => {
            for p in 0..settings.player_count {
                let team = if settings.player_count % 2 != 0 {
                    p
                } else if p < settings.player_count / 2 {
                    0
                } else {
                    1
                };
                preset_map.insert(format!("player_{p}"), json!({ "team": team }));
            }
        }
    }

    let body = serde_json::to_vec_pretty(&Value::Object(preset_map))?;
    write_file(&conf_dir.join("autohost").join("preset.json"), &body, perms)?;
    Ok(())
}

/// Merge `config` key-value pairs across overlays into the INI-style
/// `config` file: a later overlay overwrites with a string value and
/// deletes with any other value.
fn write_config(conf_dir: &Path, cfgs: &[Conf], perms: u32) -> Result<(), FactoryError> {
    let mut values: IndexMap<String, String> = IndexMap::new();
    for cfg in cfgs {
        let Some(keys) = cfg.keys(&["config"]) else { continue };
        for key in keys {
            match cfg.get_string(&["config", &key]) {
                Some(value) => {
                    values.insert(key, value);
                }
                None => {
                    values.shift_remove(&key);
                }
            }
        }
    }
    values.sort_keys();

    let mut body = String::from("[General]\n");
    for (key, value) in &values {
        body.push_str(key);
        body.push('=');
        body.push_str(value);
        body.push('\n');
    }
    write_file(&conf_dir.join("config"), body.as_bytes(), perms)?;
    Ok(())
}

/// Execute merged `actions` records in order. Only `op=copy` exists:
/// read `from`, write `to` relative to the conf dir.
fn run_actions(conf_dir: &Path, cfgs: &[Conf], perms: u32) -> Result<(), FactoryError> {
    let mut actions: IndexMap<String, serde_json::Map<String, Value>> = IndexMap::new();
    for cfg in cfgs {
        let Some(keys) = cfg.keys(&["actions"]) else { continue };
        for key in keys {
            match cfg.get_object(&["actions", &key]) {
                Some(action) => {
                    actions.insert(key, action);
                }
                None => {
                    actions.shift_remove(&key);
                }
            }
        }
    }

    for (name, action) in &actions {
        match action.get("op").and_then(Value::as_str) {
            Some("copy") => {
                let (Some(from), Some(to)) = (
                    action.get("from").and_then(Value::as_str),
                    action.get("to").and_then(Value::as_str),
                ) else {
                    continue;
                };
                let data = std::fs::read(from)?;
                write_file(&conf_dir.join(to), &data, perms)?;
            }
            op => {
                tracing::warn!(action = name.as_str(), ?op, "unknown action op");
            }
        }
    }
    Ok(())
}

async fn fetch_banlist(
    inst: &Instance,
    conf_dir: &Path,
    cfgs: &[Conf],
    perms: u32,
) -> Result<(), FactoryError> {
    let Some(url) = overlay_get(cfgs, |c| c.get_string(&["fetchBanlist"])) else {
        tracing::debug!(instance = inst.id, "fetchBanlist not declared, no banlist");
        return Ok(());
    };
    let client = reqwest::Client::builder().timeout(BANLIST_TIMEOUT).build()?;
    let body = client.get(&url).send().await?.bytes().await?;
    write_file(&conf_dir.join("banlist.txt"), &body, perms)?;
    Ok(())
}

fn write_file(path: &Path, data: &[u8], perms: u32) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(perms)
        .open(path)?;
    file.write_all(data)
}

#[cfg(test)]
#[path = "factory_tests.rs"]
mod tests;
