// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Chat rate limiting with escalating, restart-surviving penalties.
//!
//! Message timestamps are kept per ip in a sliding window; crossing the
//! configured amount inside the window imposes a penalty of 5 minutes,
//! or 45 minutes when the previous penalty expired less than 30 minutes
//! earlier. Penalty expirations persist to a JSON file.

use ah_core::clock::{Clock, SystemClock};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

const FIRST_PENALTY: Duration = Duration::from_secs(5 * 60);
const REPEAT_PENALTY: Duration = Duration::from_secs(45 * 60);
const REPEAT_WINDOW: Duration = Duration::from_secs(30 * 60);

/// Hit and penalty tables prune on this cadence...
const CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// ...dropping entries older than this.
const RETENTION: Duration = Duration::from_secs(60 * 60);

struct RateState {
    /// Message timestamps (epoch ms) per ip, newest first.
    hits: HashMap<String, Vec<u64>>,
    /// Penalty expiration (epoch ms) per ip.
    penalties: HashMap<String, u64>,
    last_cleanup: u64,
}

pub struct ChatRateLimiter<C: Clock = SystemClock> {
    state: Mutex<RateState>,
    persist_path: PathBuf,
    clock: C,
}

impl ChatRateLimiter<SystemClock> {
    pub fn new(persist_path: PathBuf) -> ChatRateLimiter<SystemClock> {
        ChatRateLimiter::with_clock(persist_path, SystemClock)
    }
}

impl<C: Clock> ChatRateLimiter<C> {
    pub fn with_clock(persist_path: PathBuf, clock: C) -> ChatRateLimiter<C> {
        let penalties = load_penalties(&persist_path);
        let now = clock.epoch_ms();
        ChatRateLimiter {
            state: Mutex::new(RateState { hits: HashMap::new(), penalties, last_cleanup: now }),
            persist_path,
            clock,
        }
    }

    /// Record one chat message. Returns the penalty duration when this
    /// message crossed the limit of `amount` messages per
    /// `window_secs`. Zero/negative config disables the limiter.
    pub fn handle_message(&self, ip: &str, amount: i64, window_secs: i64) -> Option<Duration> {
        if amount <= 0 || window_secs <= 0 {
            return None;
        }
        let now = self.clock.epoch_ms();
        let mut state = self.state.lock();
        state.cleanup(now);

        let hits = state.hits.entry(ip.to_string()).or_default();
        let first_sighting = hits.is_empty();
        hits.insert(0, now);
        if first_sighting {
            return None;
        }

        let window_ms = (window_secs as u64).saturating_mul(1000);
        let recent = hits.iter().filter(|t| now.saturating_sub(**t) < window_ms).count();
        if (recent as i64) < amount {
            return None;
        }

        let escalate = state
            .penalties
            .get(ip)
            .is_some_and(|prev| now.saturating_sub(*prev) < REPEAT_WINDOW.as_millis() as u64);
        let duration = if escalate { REPEAT_PENALTY } else { FIRST_PENALTY };
        let due = now + duration.as_millis() as u64;
        state.penalties.insert(ip.to_string(), due);
        save_penalties(&self.persist_path, &state.penalties);
        Some(duration)
    }

    /// Remaining penalty for an ip, if one is in effect.
    pub fn check_penalty(&self, ip: &str) -> Option<Duration> {
        let now = self.clock.epoch_ms();
        let mut state = self.state.lock();
        state.cleanup(now);
        let due = *state.penalties.get(ip)?;
        (due > now).then(|| Duration::from_millis(due - now))
    }

    /// Directly impose a penalty (recovered state, tests).
    pub fn impose_penalty(&self, ip: &str, duration: Duration) {
        let due = self.clock.epoch_ms() + duration.as_millis() as u64;
        let mut state = self.state.lock();
        state.penalties.insert(ip.to_string(), due);
        save_penalties(&self.persist_path, &state.penalties);
    }
}

impl RateState {
    fn cleanup(&mut self, now: u64) {
        if now.saturating_sub(self.last_cleanup) < CLEANUP_INTERVAL.as_millis() as u64 {
            return;
        }
        self.last_cleanup = now;
        let retention = RETENTION.as_millis() as u64;
        self.penalties.retain(|_, due| now.saturating_sub(*due) <= retention);
        self.hits.retain(|_, times| {
            times.retain(|t| now.saturating_sub(*t) <= retention);
            !times.is_empty()
        });
    }
}

fn load_penalties(path: &PathBuf) -> HashMap<String, u64> {
    match std::fs::read(path) {
        Ok(body) => serde_json::from_slice(&body).unwrap_or_default(),
        Err(_) => HashMap::new(),
    }
}

fn save_penalties(path: &PathBuf, penalties: &HashMap<String, u64>) {
    match serde_json::to_vec_pretty(penalties) {
        Ok(body) => {
            if let Err(e) = std::fs::write(path, body) {
                tracing::warn!(error = %e, "failed to save chat rate limit penalties");
            }
        }
        Err(e) => tracing::warn!(error = %e, "failed to serialize chat rate limit penalties"),
    }
}

/// Render a penalty duration the way players see it, `45m0s` style.
pub fn penalty_text(d: Duration) -> String {
    let total = d.as_secs();
    format!("{}m{}s", total / 60, total % 60)
}

#[cfg(test)]
#[path = "ratelimit_tests.rs"]
mod tests;
