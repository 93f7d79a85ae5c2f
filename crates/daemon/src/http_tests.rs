// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::http::router;
use crate::test_support::{test_instance, test_world};
use serde_json::{json, Value};
use std::sync::Arc;

async fn serve_router(world: Arc<crate::world::World>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router(world)).await;
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn alive_reports_creation_flag() {
    let tw = test_world(json!({}));
    let world = Arc::new(tw.world);
    let base = serve_router(world.clone()).await;

    let body = reqwest::get(format!("{base}/alive")).await.unwrap().text().await.unwrap();
    assert_eq!(body, "Autohoster backend online, room creation allowed: true");

    world.registry.disallow_creation();
    let body = reqwest::get(format!("{base}/alive")).await.unwrap().text().await.unwrap();
    assert_eq!(body, "Autohoster backend online, room creation allowed: false");
}

#[tokio::test]
async fn instances_lists_registered_state() {
    let tw = test_world(json!({}));
    let inst = test_instance(1_700_000_000, vec![json!({ "timelimit": 45 })]);
    inst.lobby_id.store(777, std::sync::atomic::Ordering::SeqCst);
    tw.world.registry.insert(inst);
    let base = serve_router(Arc::new(tw.world)).await;

    let body: Value = reqwest::get(format!("{base}/instances"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let entry = &body["1700000000"];
    assert_eq!(entry["state"], 0);
    assert_eq!(entry["lobby id"], 777);
    assert_eq!(entry["settings"]["map_name"], "TestMap");
    assert_eq!(entry["cfgs"][0]["timelimit"], 45);
}

#[tokio::test]
async fn request_rejects_bad_bodies() {
    let tw = test_world(json!({ "ports": "2100-2110" }));
    let base = serve_router(Arc::new(tw.world)).await;
    let client = reqwest::Client::new();

    let rsp = client
        .post(format!("{base}/request"))
        .body("{ not json")
        .send()
        .await
        .unwrap();
    assert_eq!(rsp.status(), reqwest::StatusCode::BAD_REQUEST);

    // Valid JSON but unusable queue config (no maps).
    let rsp = client
        .post(format!("{base}/request"))
        .body(json!({ "players": 4 }).to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(rsp.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
}
