// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::ratelimit::{penalty_text, ChatRateLimiter};
use ah_core::clock::FakeClock;
use std::time::Duration;

fn limiter(dir: &tempfile::TempDir) -> (ChatRateLimiter<FakeClock>, FakeClock) {
    let clock = FakeClock::new();
    clock.set_epoch_ms(10_000_000);
    let limiter =
        ChatRateLimiter::with_clock(dir.path().join("penalties.json"), clock.clone());
    (limiter, clock)
}

#[test]
fn quiet_senders_are_never_penalized() {
    let tmp = tempfile::tempdir().unwrap();
    let (limiter, clock) = limiter(&tmp);
    for _ in 0..10 {
        assert_eq!(limiter.handle_message("1.1.1.1", 5, 10), None);
        clock.advance(Duration::from_secs(11));
    }
    assert_eq!(limiter.check_penalty("1.1.1.1"), None);
}

#[test]
fn burst_triggers_first_penalty_of_five_minutes() {
    let tmp = tempfile::tempdir().unwrap();
    let (limiter, _clock) = limiter(&tmp);
    let mut penalty = None;
    for _ in 0..5 {
        penalty = limiter.handle_message("1.1.1.1", 5, 10);
    }
    assert_eq!(penalty, Some(Duration::from_secs(300)));
    let remaining = limiter.check_penalty("1.1.1.1").unwrap();
    assert!(remaining <= Duration::from_secs(300));
    assert!(remaining > Duration::from_secs(290));
    // Other senders are unaffected.
    assert_eq!(limiter.check_penalty("2.2.2.2"), None);
}

#[test]
fn repeat_offense_within_thirty_minutes_escalates() {
    let tmp = tempfile::tempdir().unwrap();
    let (limiter, clock) = limiter(&tmp);
    for _ in 0..5 {
        limiter.handle_message("1.1.1.1", 5, 10);
    }
    // Let the first penalty expire, then reoffend 10 minutes later.
    clock.advance(Duration::from_secs(300 + 600));
    let mut penalty = None;
    for _ in 0..5 {
        penalty = limiter.handle_message("1.1.1.1", 5, 10);
    }
    assert_eq!(penalty, Some(Duration::from_secs(45 * 60)));
}

#[test]
fn old_offense_does_not_escalate() {
    let tmp = tempfile::tempdir().unwrap();
    let (limiter, clock) = limiter(&tmp);
    limiter.impose_penalty("1.1.1.1", Duration::from_secs(300));
    // Well past the penalty and the 30-minute escalation window.
    clock.advance(Duration::from_secs(300 + 31 * 60));
    let mut penalty = None;
    for _ in 0..5 {
        penalty = limiter.handle_message("1.1.1.1", 5, 10);
    }
    assert_eq!(penalty, Some(Duration::from_secs(300)));
}

#[test]
fn penalties_survive_restart() {
    let tmp = tempfile::tempdir().unwrap();
    {
        let (limiter, _clock) = limiter(&tmp);
        limiter.impose_penalty("9.9.9.9", Duration::from_secs(600));
    }
    let (reloaded, _clock) = limiter(&tmp);
    assert!(reloaded.check_penalty("9.9.9.9").is_some());
}

#[test]
fn disabled_config_is_a_noop() {
    let tmp = tempfile::tempdir().unwrap();
    let (limiter, _clock) = limiter(&tmp);
    for _ in 0..100 {
        assert_eq!(limiter.handle_message("1.1.1.1", 0, 10), None);
        assert_eq!(limiter.handle_message("1.1.1.1", 5, 0), None);
    }
}

#[test]
fn penalty_text_format() {
    assert_eq!(penalty_text(Duration::from_secs(300)), "5m0s");
    assert_eq!(penalty_text(Duration::from_secs(45 * 60)), "45m0s");
    assert_eq!(penalty_text(Duration::from_secs(61)), "1m1s");
}
