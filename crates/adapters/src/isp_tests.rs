// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::isp::{FakeIsp, HttpIspChecker, IspCheck, IspInfo};
use std::time::Duration;

#[tokio::test]
async fn fake_answers_by_ip_then_fallback() {
    let fake = FakeIsp::clean();
    fake.set("1.2.3.4", IspInfo { is_proxy: true, asn: "AS13335 Cloudflare".into() });

    let hit = fake.lookup("1.2.3.4").await.unwrap();
    assert!(hit.is_proxy);
    let other = fake.lookup("9.9.9.9").await.unwrap();
    assert!(!other.is_proxy);
}

#[tokio::test]
async fn fake_without_fallback_errors() {
    let fake = FakeIsp::new();
    assert!(fake.lookup("9.9.9.9").await.is_err());
}

#[tokio::test]
async fn http_checker_serves_persisted_cache_without_network() {
    let tmp = tempfile::tempdir().unwrap();
    let cache_path = tmp.path().join("ISPcache.json");
    std::fs::write(
        &cache_path,
        r#"{"5.6.7.8":{"is_proxy":true,"asn":"AS64496 Example"}}"#,
    )
    .unwrap();

    // The URL is never hit: the cache answers first.
    let checker = HttpIspChecker::new(
        "http://127.0.0.1:1/json/%s".into(),
        cache_path,
        Duration::from_millis(100),
    )
    .unwrap();
    let info = checker.lookup("5.6.7.8").await.unwrap();
    assert_eq!(info, IspInfo { is_proxy: true, asn: "AS64496 Example".into() });
}
