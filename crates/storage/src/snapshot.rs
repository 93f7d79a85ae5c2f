// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-instance recovery snapshot.
//!
//! `instance.json` is rewritten on every state transition and is the
//! sole source of truth across a backend restart.

use ah_core::conf::Conf;
use ah_core::instance::{AdminsPolicy, Instance, InstanceSettings, InstanceSpec, InstanceState};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

pub const SNAPSHOT_FILENAME: &str = "instance.json";

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("snapshot has game port 0")]
    InvalidPort,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSnapshot {
    pub id: i64,
    pub game_port: u16,
    pub pid: i64,
    pub state: i64,
    pub lobby_id: i64,
    pub game_id: i64,
    pub debug_triggered: bool,
    pub conf_dir: PathBuf,
    pub bin_path: String,
    pub settings: InstanceSettings,
    pub admins: Vec<String>,
    pub admins_policy: AdminsPolicy,
    pub queue_name: String,
    pub autodetected_version: String,
    /// Plain copies of the overlay stack, restored verbatim on load.
    pub restore_cfgs: Vec<serde_json::Value>,
}

pub fn snapshot_of(inst: &Instance) -> InstanceSnapshot {
    let spec = inst.spec();
    InstanceSnapshot {
        id: inst.id,
        game_port: inst.game_port,
        pid: inst.pid.load(Ordering::SeqCst),
        state: inst.state().as_i64(),
        lobby_id: inst.lobby_id.load(Ordering::SeqCst),
        game_id: inst.game_id.load(Ordering::SeqCst),
        debug_triggered: inst.debug_triggered.load(Ordering::SeqCst),
        conf_dir: spec.conf_dir.clone(),
        bin_path: spec.bin_path.clone(),
        settings: spec.settings.clone(),
        admins: spec.admins.clone(),
        admins_policy: spec.admins_policy,
        queue_name: spec.queue_name.clone(),
        autodetected_version: inst.autodetected_version.lock().clone(),
        restore_cfgs: spec.restore_cfgs.clone(),
    }
}

/// Write the snapshot into the instance's conf dir.
pub fn save(inst: &Instance) -> Result<(), SnapshotError> {
    let snap = snapshot_of(inst);
    let body = serde_json::to_vec_pretty(&snap)?;
    std::fs::write(snap.conf_dir.join(SNAPSHOT_FILENAME), body)?;
    Ok(())
}

pub fn load(path: &Path) -> Result<InstanceSnapshot, SnapshotError> {
    let body = std::fs::read(path)?;
    let snap: InstanceSnapshot = serde_json::from_slice(&body)?;
    if snap.game_port == 0 {
        return Err(SnapshotError::InvalidPort);
    }
    Ok(snap)
}

/// Rebuild an in-memory instance from a snapshot. The result is marked
/// recovered: a re-attached child must never be reaped by this process.
pub fn restore(snap: InstanceSnapshot) -> Instance {
    let inst = Instance::new(snap.id, snap.game_port, true);
    inst.pid.store(snap.pid, Ordering::SeqCst);
    inst.set_state(InstanceState::from_i64(snap.state));
    inst.lobby_id.store(snap.lobby_id, Ordering::SeqCst);
    inst.game_id.store(snap.game_id, Ordering::SeqCst);
    inst.debug_triggered.store(snap.debug_triggered, Ordering::SeqCst);
    *inst.autodetected_version.lock() = snap.autodetected_version;
    let cfgs: Vec<Conf> = snap.restore_cfgs.iter().cloned().map(Conf::from_value).collect();
    inst.fill_spec(InstanceSpec {
        conf_dir: snap.conf_dir,
        bin_path: snap.bin_path,
        settings: snap.settings,
        admins: snap.admins,
        admins_policy: snap.admins_policy,
        queue_name: snap.queue_name,
        cfgs,
        restore_cfgs: snap.restore_cfgs,
    });
    inst
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
