// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fleet controller: keeps the configured queues visible in the
//! upstream lobby by respawning instances when they disappear.

use crate::factory;
use crate::runner;
use crate::world::World;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Timer loop; one tick per `lobbyPollInterval` seconds (default 5).
pub async fn run_keepalive(world: Arc<World>, shutdown: CancellationToken) {
    loop {
        let interval = world
            .settings
            .read(|c| c.get_i64(&["lobbyPollInterval"]))
            .unwrap_or(5)
            .max(1) as u64;
        tick(&world).await;
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(Duration::from_secs(interval)) => {}
        }
    }
}

pub(crate) async fn tick(world: &Arc<World>) {
    let rooms = match world.lobby.rooms().await {
        Ok(rooms) => rooms,
        Err(e) => {
            tracing::warn!(error = %e, "failed to lookup lobby");
            Vec::new()
        }
    };
    tracing::debug!(rooms = rooms.len(), "lobby polled");
    populate(world, rooms.len()).await;
}

async fn populate(world: &Arc<World>, lobby_rooms: usize) {
    if !spawn_gates_open(world, lobby_rooms) {
        return;
    }
    for queue_name in missing_queues(world) {
        tracing::info!(queue = %queue_name, "queue missing from lobby, spawning new instance");
        let queue_cfg = world.settings.read(|c| c.subtree(&["queues", &queue_name]));
        match factory::generate(world, queue_cfg, &queue_name).await {
            Ok(inst) => runner::launch(world, &inst),
            Err(e) => {
                tracing::warn!(queue = %queue_name, error = %e, "failed to generate instance");
            }
        }
    }
}

/// Admission gates, not errors: spawning pauses while any gate is
/// closed.
pub(crate) fn spawn_gates_open(world: &World, lobby_rooms: usize) -> bool {
    if !world.settings.read(|c| c.get_bool(&["allowSpawn"])).unwrap_or(false) {
        tracing::debug!("room spawning disabled");
        return false;
    }
    let max_lobby =
        world.settings.read(|c| c.get_i64(&["spawnCutoutLobbyRooms"])).unwrap_or(8) as usize;
    if lobby_rooms >= max_lobby {
        tracing::info!(lobby_rooms, max_lobby, "queue processing paused, lobby is full");
        return false;
    }
    let max_running =
        world.settings.read(|c| c.get_i64(&["spawnCutoutRunningRooms"])).unwrap_or(18) as usize;
    let running = world.registry.in_game_count();
    if running >= max_running {
        tracing::info!(running, max_running, "queue processing paused, too many running rooms");
        return false;
    }
    true
}

/// Enabled queues with no live instance still in (or before) the
/// lobby, in lexicographic order for a deterministic spawn sequence.
pub(crate) fn missing_queues(world: &World) -> Vec<String> {
    let Some(mut names) = world.settings.read(|c| c.keys(&["queues"])) else {
        tracing::debug!("queue processing paused, queues not defined in config");
        return Vec::new();
    };
    names.sort();
    names
        .into_iter()
        .filter(|name| {
            !world
                .settings
                .read(|c| c.get_bool(&["queues", name, "disabled"]))
                .unwrap_or(false)
        })
        .filter(|name| match world.registry.queue_in_lobby(name) {
            Some(id) => {
                tracing::debug!(queue = %name, instance = id, "queue already in lobby");
                false
            }
            None => true,
        })
        .collect()
}

#[cfg(test)]
#[path = "fleet_tests.rs"]
mod tests;
