// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Game-report submission: begin on the first report, frames while the
//! game runs, finalization from the extended report, replay upload at
//! the end.

use crate::db::{FinalPlayer, GameFinalization, NewGame, NewPlayer};
use crate::world::World;
use ah_core::report::{GameReport, GameReportExtended, GraphFrame};
use ah_core::util::b64_field;
use ah_core::Instance;
use std::sync::atomic::Ordering;

/// Route an in-game report: the first one creates the games row, the
/// rest append graph frames.
pub async fn submit_report(world: &World, inst: &Instance, body: &str) {
    if inst.game_id.load(Ordering::SeqCst) <= 0 {
        let gid = submit_begin(world, inst, body).await;
        inst.game_id.store(gid, Ordering::SeqCst);
        if let Err(e) = ah_storage::save(inst) {
            tracing::warn!(instance = inst.id, error = %e, "failed to save instance snapshot");
            world.errors.post(format!(
                "Failed to save instance recovery json: {e} (instance {})",
                inst.id
            ));
        }
    } else {
        submit_frame(world, inst, body).await;
    }
}

pub async fn submit_final_report(world: &World, inst: &Instance, body: &str) {
    if inst.game_id.load(Ordering::SeqCst) <= 0 {
        tracing::warn!(instance = inst.id, "final report without valid game id");
    } else {
        submit_end(world, inst, body).await;
    }
}

async fn submit_begin(world: &World, inst: &Instance, body: &str) -> i64 {
    let report: GameReport = match serde_json::from_str(body) {
        Ok(report) => report,
        Err(e) => {
            tracing::warn!(instance = inst.id, error = %e, "failed to parse game report");
            world.errors.post(format!(
                "Failed to unmarshal game report: {e} report was {body:?} (instance {})",
                inst.id
            ));
            return -1;
        }
    };

    let settings = &inst.spec().settings;
    let mut game = NewGame {
        version: report.game.version.clone(),
        instance_id: inst.id,
        setting_scavs: report.game.scavengers,
        setting_alliance: report.game.alliances_type,
        setting_power: report.game.power_type,
        setting_base: report.game.base_type,
        map_name: settings.map_name.clone(),
        map_hash: settings.map_hash.clone(),
        mods: settings.mods.clone(),
        display_category: settings.display_category,
        players: Vec::new(),
        rating_categories: settings.rating_categories.clone(),
    };
    for player in &report.player_data {
        if player.public_key.is_empty() {
            continue;
        }
        let Ok(pubkey) = b64_field(&player.public_key) else {
            tracing::warn!(instance = inst.id, "player public key is not base64");
            continue;
        };
        game.players.push(NewPlayer {
            name: player.name.clone(),
            pubkey,
            position: player.position,
            team: player.team,
            color: player.color,
            props: serde_json::to_value(&player.stats).unwrap_or_default(),
        });
    }

    match world.db.begin_game(&game).await {
        Ok(gid) => gid,
        Err(e) => {
            tracing::warn!(instance = inst.id, error = %e, "failed to begin game");
            world.errors.post(format!("Failed to begin game: {e} (instance {})", inst.id));
            -1
        }
    }
}

async fn submit_frame(world: &World, inst: &Instance, body: &str) {
    let gid = inst.game_id.load(Ordering::SeqCst);
    let report: GameReport = match serde_json::from_str(body) {
        Ok(report) => report,
        Err(e) => {
            tracing::warn!(instance = inst.id, error = %e, game_id = gid, "failed to parse game report");
            world.errors.post(format!(
                "Failed to unmarshal game report: {e} report was {body:?} (instance {})",
                inst.id
            ));
            return;
        }
    };
    let frame = GraphFrame::from_report(&report);
    if let Err(e) = world.db.append_frame(gid, &frame).await {
        // One relay message per distinct sus payload per instance, not
        // one per frame.
        let message = format!(
            "SUS tag while adding game frame: {e} (gid {gid}) (instance {})",
            inst.id
        );
        tracing::warn!(instance = inst.id, game_id = gid, error = %e, "failed to add game frame");
        let mut suspended = world.frame_error_suspends.lock();
        if suspended.get(&inst.id) != Some(&message) {
            world.errors.post(message.clone());
            suspended.insert(inst.id, message);
        }
    }
}

async fn submit_end(world: &World, inst: &Instance, body: &str) {
    submit_frame(world, inst, body).await;
    let gid = inst.game_id.load(Ordering::SeqCst);
    let report: GameReportExtended = match serde_json::from_str(body) {
        Ok(report) => report,
        Err(e) => {
            tracing::warn!(instance = inst.id, error = %e, game_id = gid, "failed to parse final report");
            return;
        }
    };

    let players = report
        .player_data
        .iter()
        .filter(|p| !p.public_key.is_empty())
        .map(|p| FinalPlayer {
            position: p.position,
            usertype: p.usertype.clone(),
            props: serde_json::to_value(&p.stats).unwrap_or_default(),
        })
        .collect();
    let fin = GameFinalization {
        research_log: serde_json::to_value(&report.research_complete).unwrap_or_default(),
        end_date_ms: report.end_date,
        debug_triggered: inst.debug_triggered.load(Ordering::SeqCst),
        game_time: report.game_time,
        players,
    };
    if let Err(e) = world.db.finalize_game(gid, &fin).await {
        tracing::warn!(instance = inst.id, game_id = gid, error = %e, "failed to finalize game");
        world
            .errors
            .post(format!("Failed to finalize: {e} (gid {gid}) (instance {})", inst.id));
    }
}

/// Locate the finished replay, compress it and store it both on disk
/// and on the games row.
pub async fn upload_replay(world: &World, inst: &Instance) {
    let gid = inst.game_id.load(Ordering::SeqCst);
    let conf_dir = inst.spec().conf_dir.clone();
    let replay_path = match ah_storage::find_replay(&conf_dir) {
        Ok(path) => path,
        Err(e) => {
            tracing::warn!(instance = inst.id, error = %e, "failed to find replay");
            world.errors.post(format!("Failed to find replay: {e} (instance {})", inst.id));
            return;
        }
    };
    let data = match tokio::fs::read(&replay_path).await {
        Ok(data) => data,
        Err(e) => {
            tracing::warn!(instance = inst.id, error = %e, "failed to read replay");
            world.errors.post(format!("Failed to copy replay: {e} (instance {})", inst.id));
            return;
        }
    };

    let storage_root = world.settings.replay_storage_path();
    let stored = tokio::task::spawn_blocking({
        let data = data.clone();
        move || -> Result<Vec<u8>, String> {
            ah_storage::store_replay(&storage_root, gid, &data)
                .map_err(|e| format!("store: {e}"))?;
            ah_storage::compress_for_db(&data).map_err(|e| format!("compress: {e}"))
        }
    })
    .await;
    let compressed = match stored {
        Ok(Ok(compressed)) => compressed,
        Ok(Err(e)) => {
            tracing::warn!(instance = inst.id, error = %e, "failed to store replay");
            world.errors.post(format!("Failed to copy replay: {e} (instance {})", inst.id));
            return;
        }
        Err(e) => {
            tracing::warn!(instance = inst.id, error = %e, "replay compression task failed");
            return;
        }
    };

    if let Err(e) = world.db.store_replay(gid, &compressed).await {
        tracing::warn!(instance = inst.id, error = %e, "failed to save replay to database");
        world
            .errors
            .post(format!("Failed to save replay to database: {e} (instance {})", inst.id));
    }
}

#[cfg(test)]
#[path = "gamesubmit_tests.rs"]
mod tests;
