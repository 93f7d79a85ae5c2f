// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Crash recovery: after a backend restart, re-attach to surviving
//! children by validating their kernel state, and archive the remains
//! of everything else.

use crate::proc;
use crate::runner;
use crate::world::World;
use std::path::Path;
use std::sync::Arc;

/// Walk the instances directory and recover (or bury) every entry.
pub async fn recover_instances(world: &Arc<World>) {
    let instances_path = world.settings.instances_path();
    let entries = match std::fs::read_dir(&instances_path) {
        Ok(entries) => entries.flatten().collect::<Vec<_>>(),
        Err(_) => {
            tracing::info!(path = %instances_path.display(), "creating instances directory");
            if let Err(e) = std::fs::create_dir_all(&instances_path) {
                tracing::error!(error = %e, "failed to create instances directory");
            }
            return;
        }
    };
    tracing::info!(count = entries.len(), "recovering potential instances");

    for entry in entries {
        let conf_dir = entry.path();
        if !conf_dir.is_dir() {
            continue;
        }
        if recover_one(world, &conf_dir).await {
            let world = Arc::clone(world);
            let dir = conf_dir.clone();
            let result =
                tokio::task::spawn_blocking(move || world.archiver.archive_instance(&dir)).await;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(conf_dir = %conf_dir.display(), error = %e, "error archiving instance")
                }
                Err(e) => tracing::warn!(error = %e, "archive task failed"),
            }
        }
    }
}

/// Attempt to re-attach one conf dir. Returns true when the directory
/// holds a dead instance that needs archival.
async fn recover_one(world: &Arc<World>, conf_dir: &Path) -> bool {
    tracing::info!(conf_dir = %conf_dir.display(), "recovering instance");
    let Some(dir_id) = conf_dir
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.parse::<i64>().ok())
    else {
        tracing::warn!(conf_dir = %conf_dir.display(), "path does not carry an instance id");
        return false;
    };

    let snap = match ah_storage::load(&conf_dir.join(ah_storage::SNAPSHOT_FILENAME)) {
        Ok(snap) => snap,
        Err(e) => {
            tracing::warn!(conf_dir = %conf_dir.display(), error = %e, "snapshot failed to load");
            return false;
        }
    };
    if snap.id != dir_id {
        tracing::warn!(
            conf_dir = %conf_dir.display(),
            snapshot_id = snap.id,
            "snapshot id does not match directory"
        );
        return false;
    }
    let pid = snap.pid;

    match proc::read_pid_cmdline(pid) {
        Err(e) => {
            tracing::info!(pid, error = %e, "no kernel cmdline, assuming dead");
            return true;
        }
        Ok(cmdline) => {
            if !proc::cmdline_looks_right(&cmdline, snap.id) {
                tracing::info!(pid, "cmdline does not look like ours, assuming dead");
                return true;
            }
            match proc::cmdline_matches_recorded(&cmdline, conf_dir) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!(pid, "cmdline differs from the recorded one");
                }
                Err(e) => {
                    tracing::warn!(pid, error = %e, "recorded cmdline unreadable");
                }
            }
        }
    }
    if !proc::is_pid_alive(pid) {
        tracing::info!(pid, "process is not alive");
        return true;
    }

    let inst = Arc::new(ah_storage::restore(snap));
    if !world.registry.insert(Arc::clone(&inst)) {
        tracing::warn!(instance = inst.id, "failed to insert recovered instance");
        return false;
    }
    tracing::info!(instance = inst.id, pid, "re-attaching runner to surviving child");
    runner::launch(world, &inst);
    false
}

#[cfg(test)]
#[path = "recovery_tests.rs"]
mod tests;
