// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The instance model: one supervised game-server child process.
//!
//! Lifecycle state lives in an atomic so the fleet controller and the
//! HTTP surface can observe it without taking any lock. The parts the
//! factory computes (conf dir, settings, overlays, admins) are frozen
//! once and read lock-free afterwards.

use crate::conf::Conf;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Bound of the inbound command channel; senders only block when a
/// runner is already this far behind.
pub const COMMAND_QUEUE_DEPTH: usize = 32;

/// Lifecycle states, monotonic; `Exited` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum InstanceState {
    Initial = 0,
    Starting = 1,
    InLobby = 2,
    InGame = 3,
    Exiting = 4,
    Exited = 5,
}

impl InstanceState {
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(v: i64) -> InstanceState {
        match v {
            1 => InstanceState::Starting,
            2 => InstanceState::InLobby,
            3 => InstanceState::InGame,
            4 => InstanceState::Exiting,
            5 => InstanceState::Exited,
            _ => InstanceState::Initial,
        }
    }
}

/// Who gets `admin add-hash` on startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminsPolicy {
    #[default]
    Nobody,
    Moderators,
    Whitelist,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceSettings {
    pub game_port: u16,
    pub map_name: String,
    pub map_hash: String,
    pub player_count: i64,
    pub time_limit: i64,
    pub mods: String,
    pub display_category: i64,
    pub rating_categories: Vec<i64>,
}

/// Deferred on-join actions, installed on approve/approvespec and
/// consumed by the first join/verify event carrying the same key.
#[derive(Debug, Clone)]
pub struct JoinDispatch {
    pub allow_chat: bool,
    pub messages: Vec<String>,
    pub issued: Instant,
}

impl JoinDispatch {
    pub fn new() -> JoinDispatch {
        JoinDispatch { allow_chat: true, messages: Vec::new(), issued: Instant::now() }
    }
}

impl Default for JoinDispatch {
    fn default() -> Self {
        Self::new()
    }
}

/// Commands a runner accepts from the rest of the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceCommand {
    /// Ask the child to exit cleanly (`shutdown now`).
    Shutdown,
    /// Broadcast a sanitized chat line to the room.
    Broadcast(String),
    /// Detach: stop the runner without touching the child.
    RunnerStop,
}

/// Factory-computed, frozen-after-creation parts of an instance.
#[derive(Debug, Default)]
pub struct InstanceSpec {
    pub conf_dir: PathBuf,
    pub bin_path: String,
    pub settings: InstanceSettings,
    pub admins: Vec<String>,
    pub admins_policy: AdminsPolicy,
    pub queue_name: String,
    /// Overlay stack: map-specific, queue, global fallback.
    pub cfgs: Vec<Conf>,
    /// Plain copies of `cfgs` persisted in the snapshot.
    pub restore_cfgs: Vec<serde_json::Value>,
}

pub struct Instance {
    pub id: i64,
    pub game_port: u16,
    /// True when this process re-attached to an already-running child
    /// after a restart; such a child must never be reaped here.
    pub recovered: bool,
    state: AtomicI64,
    pub lobby_id: AtomicI64,
    pub game_id: AtomicI64,
    pub pid: AtomicI64,
    pub debug_triggered: AtomicBool,
    spec: OnceLock<InstanceSpec>,
    pub autodetected_version: Mutex<String>,
    /// Public keys the host has verified this session; gates
    /// identity-link confirmations.
    pub verified: Mutex<HashSet<String>>,
    on_join_dispatch: Mutex<HashMap<String, JoinDispatch>>,
    commands_tx: mpsc::Sender<InstanceCommand>,
    commands_rx: Mutex<Option<mpsc::Receiver<InstanceCommand>>>,
}

impl Instance {
    pub fn new(id: i64, game_port: u16, recovered: bool) -> Instance {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        Instance {
            id,
            game_port,
            recovered,
            state: AtomicI64::new(InstanceState::Initial.as_i64()),
            lobby_id: AtomicI64::new(0),
            game_id: AtomicI64::new(0),
            pid: AtomicI64::new(0),
            debug_triggered: AtomicBool::new(false),
            spec: OnceLock::new(),
            autodetected_version: Mutex::new(String::new()),
            verified: Mutex::new(HashSet::new()),
            on_join_dispatch: Mutex::new(HashMap::new()),
            commands_tx: tx,
            commands_rx: Mutex::new(Some(rx)),
        }
    }

    pub fn state(&self) -> InstanceState {
        InstanceState::from_i64(self.state.load(Ordering::SeqCst))
    }

    pub fn set_state(&self, s: InstanceState) {
        self.state.store(s.as_i64(), Ordering::SeqCst);
    }

    /// Compare-and-swap the lifecycle state. Returns false when the
    /// current state was not `from` (callers log that).
    pub fn cas_state(&self, from: InstanceState, to: InstanceState) -> bool {
        self.state
            .compare_exchange(from.as_i64(), to.as_i64(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Install the factory output. Returns false if already filled.
    pub fn fill_spec(&self, spec: InstanceSpec) -> bool {
        self.spec.set(spec).is_ok()
    }

    pub fn has_spec(&self) -> bool {
        self.spec.get().is_some()
    }

    /// The frozen spec. Only valid after the factory (or the recovery
    /// loader) filled it; every runner path guarantees that.
    pub fn spec(&self) -> &InstanceSpec {
        match self.spec.get() {
            Some(s) => s,
            None => unreachable!("instance {} used before factory fill", self.id),
        }
    }

    pub fn commands(&self) -> mpsc::Sender<InstanceCommand> {
        self.commands_tx.clone()
    }

    /// Hand the command receiver to the runner; only the first caller
    /// gets it.
    pub fn take_command_rx(&self) -> Option<mpsc::Receiver<InstanceCommand>> {
        self.commands_rx.lock().take()
    }

    pub fn stash_dispatch(&self, pubkey_b64: &str, dispatch: JoinDispatch) {
        self.on_join_dispatch.lock().insert(pubkey_b64.to_string(), dispatch);
    }

    pub fn consume_dispatch(&self, pubkey_b64: &str) -> Option<JoinDispatch> {
        self.on_join_dispatch.lock().remove(pubkey_b64)
    }

    /// Drop dispatch entries older than `max_age`; the map must never
    /// grow without bound when verify events never arrive.
    pub fn gc_dispatch(&self, max_age: Duration) {
        self.on_join_dispatch.lock().retain(|_, d| d.issued.elapsed() <= max_age);
    }

    #[doc(hidden)]
    pub fn dispatch_len(&self) -> usize {
        self.on_join_dispatch.lock().len()
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id)
            .field("game_port", &self.game_port)
            .field("state", &self.state())
            .field("recovered", &self.recovered)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "instance_tests.rs"]
mod tests;
