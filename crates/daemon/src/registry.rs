// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Instance registry: the global set of live instances, the game-port
//! allocator and the monotonic id factory.
//!
//! The registry lock is held only for O(fleet-size) scans, never across
//! I/O. Lifecycle state is read through each instance's atomic.

use ah_core::instance::{Instance, InstanceCommand, InstanceState};
use ah_core::ports::parse_port_spec;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("instance creation disallowed")]
    CreationDisallowed,
    #[error("no ports declared")]
    NoPortsDeclared,
    #[error("no free ports")]
    NoFreePort,
}

#[derive(Default)]
pub struct Registry {
    live: Mutex<Vec<Arc<Instance>>>,
    runners: Mutex<HashMap<i64, JoinHandle<()>>>,
    last_id: AtomicI64,
    creation_disallowed: AtomicBool,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    /// Allocate a fresh instance: refuse while shutting down, pick the
    /// first free port from the spec, mint a strictly increasing id.
    ///
    /// Ids are wall-clock seconds; when a second allocation lands in
    /// the same second this waits until the clock moves past the
    /// previous id.
    pub async fn allocate(
        &self,
        port_spec: Option<&str>,
    ) -> Result<Arc<Instance>, RegistryError> {
        let spec = port_spec.ok_or(RegistryError::NoPortsDeclared)?;
        loop {
            {
                let mut live = self.live.lock();
                if self.creation_disallowed.load(Ordering::SeqCst) {
                    return Err(RegistryError::CreationDisallowed);
                }
                let allowed = parse_port_spec(spec);
                if allowed.is_empty() {
                    return Err(RegistryError::NoPortsDeclared);
                }
                let selected = allowed
                    .iter()
                    .copied()
                    .find(|p| !live.iter().any(|i| i.game_port == *p))
                    .ok_or(RegistryError::NoFreePort)?;

                let now = unix_seconds();
                if self.last_id.load(Ordering::SeqCst) < now {
                    self.last_id.store(now, Ordering::SeqCst);
                    let inst = Arc::new(Instance::new(now, selected, false));
                    live.push(Arc::clone(&inst));
                    return Ok(inst);
                }
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Idempotent re-insert for recovery; duplicates by id or port are
    /// rejected.
    pub fn insert(&self, inst: Arc<Instance>) -> bool {
        let mut live = self.live.lock();
        if live.iter().any(|i| i.id == inst.id || i.game_port == inst.game_port) {
            return false;
        }
        live.push(inst);
        true
    }

    pub fn release(&self, id: i64) {
        self.live.lock().retain(|i| i.id != id);
    }

    /// Sweep Exited entries (and their finished runner handles).
    pub fn clean(&self) -> usize {
        let mut removed = 0;
        let mut ids = Vec::new();
        self.live.lock().retain(|i| {
            if i.state() == InstanceState::Exited {
                tracing::info!(instance = i.id, "cleaned up instance");
                ids.push(i.id);
                removed += 1;
                false
            } else {
                true
            }
        });
        let mut runners = self.runners.lock();
        for id in ids {
            runners.remove(&id);
        }
        removed
    }

    /// Refuse all future allocations (shutdown).
    pub fn disallow_creation(&self) {
        self.creation_disallowed.store(true, Ordering::SeqCst);
    }

    pub fn creation_allowed(&self) -> bool {
        !self.creation_disallowed.load(Ordering::SeqCst)
    }

    /// Remember a runner task so shutdown can wait for it.
    pub fn track(&self, id: i64, handle: JoinHandle<()>) {
        self.runners.lock().insert(id, handle);
    }

    /// Order every runner to stop and wait until they all exit.
    /// `shutdown_hosts` asks children to exit cleanly; otherwise
    /// runners detach and leave the children running.
    pub async fn stop_all(&self, shutdown_hosts: bool) {
        let senders: Vec<_> = {
            let live = self.live.lock();
            tracing::info!(count = live.len(), "ordering runners to quit");
            live.iter().map(|i| i.commands()).collect()
        };
        for tx in senders {
            let cmd = if shutdown_hosts {
                InstanceCommand::Shutdown
            } else {
                InstanceCommand::RunnerStop
            };
            let _ = tx.send(cmd).await;
        }

        let handles: Vec<_> = {
            let mut runners = self.runners.lock();
            runners.drain().collect()
        };
        tracing::info!(count = handles.len(), "waiting for runners to quit");
        for (id, handle) in handles {
            if let Err(e) = handle.await {
                tracing::warn!(instance = id, error = %e, "runner task failed");
            }
        }
    }

    /// Id of the live instance serving `queue_name` while still joinable
    /// (state ≤ InLobby).
    pub fn queue_in_lobby(&self, queue_name: &str) -> Option<i64> {
        self.live
            .lock()
            .iter()
            .find(|i| {
                i.has_spec()
                    && i.spec().queue_name == queue_name
                    && i.state() <= InstanceState::InLobby
            })
            .map(|i| i.id)
    }

    pub fn instance_in_lobby(&self, id: i64) -> bool {
        self.live
            .lock()
            .iter()
            .any(|i| i.id == id && i.state() <= InstanceState::InLobby)
    }

    pub fn in_game_count(&self) -> usize {
        self.live.lock().iter().filter(|i| i.state() == InstanceState::InGame).count()
    }

    pub fn list(&self) -> Vec<Arc<Instance>> {
        self.live.lock().clone()
    }
}

fn unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
