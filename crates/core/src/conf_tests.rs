// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tests for config trees and the overlay walk.

use crate::conf::{overlay_get, overlay_get_or, Conf};
use serde_json::json;

fn tree(v: serde_json::Value) -> Conf {
    Conf::from_value(v)
}

#[test]
fn path_getters() {
    let c = tree(json!({
        "ports": "2100-2105",
        "timelimit": 90,
        "allowSpawn": true,
        "blacklist": { "name": ["adolf", "hitler"] },
        "ratingCategories": [2, 3],
    }));
    assert_eq!(c.get_str(&["ports"]), Some("2100-2105"));
    assert_eq!(c.get_i64(&["timelimit"]), Some(90));
    assert_eq!(c.get_bool(&["allowSpawn"]), Some(true));
    assert_eq!(
        c.get_string_vec(&["blacklist", "name"]),
        Some(vec!["adolf".to_string(), "hitler".to_string()])
    );
    assert_eq!(c.get_i64_vec(&["ratingCategories"]), Some(vec![2, 3]));
    assert_eq!(c.get_str(&["missing"]), None);
    assert_eq!(c.get_i64(&["blacklist"]), None);
}

#[test]
fn subtree_is_deep_copy_and_missing_is_empty() {
    let c = tree(json!({ "queues": { "duel": { "players": 2 } } }));
    let q = c.subtree(&["queues", "duel"]);
    assert_eq!(q.get_i64(&["players"]), Some(2));
    let missing = c.subtree(&["queues", "nope"]);
    assert_eq!(missing.keys(&[]), Some(vec![]));
}

#[test]
fn keys_lists_object_keys() {
    let c = tree(json!({ "maps": { "alpha": {}, "beta": {} } }));
    let mut keys = c.keys(&["maps"]).unwrap();
    keys.sort();
    assert_eq!(keys, vec!["alpha", "beta"]);
    assert_eq!(c.keys(&["missing"]), None);
}

#[test]
fn overlay_walk_is_first_match() {
    let cfgs = vec![
        tree(json!({ "a": 1 })),
        tree(json!({ "a": 2, "b": 2 })),
        tree(json!({ "a": 3, "b": 3, "c": 3 })),
    ];
    assert_eq!(overlay_get(&cfgs, |c| c.get_i64(&["a"])), Some(1));
    assert_eq!(overlay_get(&cfgs, |c| c.get_i64(&["b"])), Some(2));
    assert_eq!(overlay_get(&cfgs, |c| c.get_i64(&["c"])), Some(3));
    assert_eq!(overlay_get_or(&cfgs, |c| c.get_i64(&["d"]), 42), 42);
}

#[test]
fn pick_number_draws_from_the_list() {
    let c = tree(json!({ "settingsBase": "2" }));
    assert_eq!(c.pick_number(&["settingsBase"]), Some(2));

    let c = tree(json!({ "settingsBase": "0,1,2" }));
    for _ in 0..32 {
        let v = c.pick_number(&["settingsBase"]).unwrap();
        assert!((0..=2).contains(&v));
    }

    let c = tree(json!({ "settingsBase": "junk" }));
    assert_eq!(c.pick_number(&["settingsBase"]), None);

    // Unparsable entries are skipped, not fatal.
    let c = tree(json!({ "settingsBase": "junk,7" }));
    assert_eq!(c.pick_number(&["settingsBase"]), Some(7));
}
