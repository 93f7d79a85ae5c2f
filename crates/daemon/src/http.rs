// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local control surface: `/alive`, `/instances`, `/reload`,
//! `/request`.

use crate::factory;
use crate::runner;
use crate::world::World;
use ah_core::conf::Conf;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{any, get, post};
use axum::Router;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::timeout::TimeoutLayer;

/// Admin requests are local and small; anything slower is stuck.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

pub fn router(world: Arc<World>) -> Router {
    Router::new()
        .route("/alive", get(handle_alive))
        .route("/instances", get(handle_instances))
        .route("/reload", any(handle_reload))
        .route("/request", post(handle_request))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(world)
}

/// Bind the configured listen address and serve until shutdown.
pub async fn serve(world: Arc<World>, shutdown: CancellationToken) -> std::io::Result<()> {
    let addr = world.settings.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "control surface listening");
    axum::serve(listener, router(world))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn handle_alive(State(world): State<Arc<World>>) -> String {
    format!(
        "Autohoster backend online, room creation allowed: {}",
        world.registry.creation_allowed()
    )
}

async fn handle_instances(State(world): State<Arc<World>>) -> impl IntoResponse {
    let mut out = serde_json::Map::new();
    for inst in world.registry.list() {
        let cfgs: Vec<serde_json::Value> = if inst.has_spec() {
            inst.spec().cfgs.iter().map(|c| c.as_value().clone()).collect()
        } else {
            Vec::new()
        };
        let settings = if inst.has_spec() {
            serde_json::to_value(&inst.spec().settings).unwrap_or_default()
        } else {
            serde_json::Value::Null
        };
        out.insert(
            inst.id.to_string(),
            serde_json::json!({
                "state": inst.state().as_i64(),
                "pid": inst.pid.load(Ordering::SeqCst),
                "game id": inst.game_id.load(Ordering::SeqCst),
                "lobby id": inst.lobby_id.load(Ordering::SeqCst),
                "settings": settings,
                "cfgs": cfgs,
            }),
        );
    }
    match serde_json::to_string_pretty(&out) {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn handle_reload(State(world): State<Arc<World>>) -> impl IntoResponse {
    match world.settings.reload() {
        Ok(()) => (StatusCode::OK, "Config reloaded".to_string()),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Generate and spawn a one-off room from a queue-config body.
async fn handle_request(
    State(world): State<Arc<World>>,
    body: String,
) -> impl IntoResponse {
    let cfg = match serde_json::from_str::<serde_json::Value>(&body) {
        Ok(value) => Conf::from_value(value),
        Err(e) => {
            tracing::warn!(error = %e, "failed to parse /request body");
            return (StatusCode::BAD_REQUEST, String::new());
        }
    };
    match factory::generate(&world, cfg, "").await {
        Ok(inst) => {
            runner::launch(&world, &inst);
            (
                StatusCode::OK,
                format!(
                    "Room created, join with host.wz2100-autohost.net:{}",
                    inst.game_port
                ),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to generate requested instance");
            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
        }
    }
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
