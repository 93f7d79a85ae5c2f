// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The single-process world: every shared table the supervisor needs,
//! each behind its own lock, with no nesting between them.

use crate::admission::MovedOut;
use crate::config::Settings;
use crate::db::Database;
use crate::ratelimit::ChatRateLimiter;
use crate::registry::Registry;
use ah_adapters::{ErrorRelay, IspCheck, LobbyBrowser, MapStore};
use ah_storage::Archiver;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

pub struct World {
    pub settings: Arc<Settings>,
    pub registry: Registry,
    pub db: Arc<dyn Database>,
    pub isp: Arc<dyn IspCheck>,
    pub maps: Arc<dyn MapStore>,
    pub lobby: Arc<dyn LobbyBrowser>,
    pub errors: ErrorRelay,
    pub moved_out: MovedOut,
    pub chat_limit: ChatRateLimiter,
    pub archiver: Archiver,
    /// Last sus-tag report per instance, so a stuck frame writer sends
    /// one relay message per distinct payload instead of one per frame.
    pub frame_error_suspends: Mutex<HashMap<i64, String>>,
}

impl World {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: Arc<Settings>,
        db: Arc<dyn Database>,
        isp: Arc<dyn IspCheck>,
        maps: Arc<dyn MapStore>,
        lobby: Arc<dyn LobbyBrowser>,
        errors: ErrorRelay,
    ) -> World {
        let archiver = Archiver::new(settings.archives_path());
        let penalties_path = settings
            .read(|c| c.get_string(&["ratelimitPenaltiesFilename"]))
            .unwrap_or_else(|| "ratelimitChatPenalties.json".to_string());
        World {
            settings,
            registry: Registry::new(),
            db,
            isp,
            maps,
            lobby,
            errors,
            moved_out: MovedOut::new(),
            chat_limit: ChatRateLimiter::new(penalties_path.into()),
            archiver,
            frame_error_suspends: Mutex::new(HashMap::new()),
        }
    }
}
