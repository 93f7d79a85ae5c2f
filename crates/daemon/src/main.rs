// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Autohoster backend daemon (ahd)
//!
//! Single process that recovers surviving instances, keeps the queue
//! fleet alive in the upstream lobby, and supervises every hosted
//! room until it is archived.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ah_adapters::{spawn_error_relay, HttpIspChecker, HttpLobbyBrowser, HttpMapStore};
use ah_daemon::config::Settings;
use ah_daemon::db::PgDatabase;
use ah_daemon::{fleet, http, recovery, World};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = match std::env::args().nth(1) {
        None => PathBuf::from("config.json"),
        Some(arg) if arg == "--help" || arg == "-h" => {
            println!("ahd {}", env!("CARGO_PKG_VERSION"));
            println!("Autohoster backend daemon - hosts and supervises game rooms");
            println!();
            println!("USAGE:");
            println!("    ahd [config.json]");
            return Ok(());
        }
        Some(arg) if arg == "--version" || arg == "-V" => {
            println!("ahd {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Some(arg) => PathBuf::from(arg),
    };

    setup_logging();

    let settings = Arc::new(Settings::load(&config_path)?);
    // Required keys are fatal at startup, not at first use.
    for key in ["ports", "instancesPath", "databaseConnString"] {
        if settings.read(|c| c.get_string(&[key])).is_none() {
            error!(key, "required config key missing");
            return Err(format!("required config key {key:?} missing").into());
        }
    }

    let conn_string = settings
        .read(|c| c.get_string(&["databaseConnString"]))
        .unwrap_or_default();
    let db = Arc::new(PgDatabase::connect(&conn_string).await?);
    info!("connected to database");

    let isp = Arc::new(HttpIspChecker::new(
        settings
            .read(|c| c.get_string(&["ispCheck", "urlFmt"]))
            .unwrap_or_else(|| "http://ip-api.com/json/%s?fields=21220864".to_string()),
        PathBuf::from(
            settings
                .read(|c| c.get_string(&["ispCheck", "cachePath"]))
                .unwrap_or_else(|| "ISPcache.json".to_string()),
        ),
        Duration::from_secs(
            settings
                .read(|c| c.get_i64(&["ispCheck", "httpTimeoutSeconds"]))
                .unwrap_or(2) as u64,
        ),
    )?);
    let maps = Arc::new(HttpMapStore::new(
        PathBuf::from(
            settings
                .read(|c| c.get_string(&["mapStorage", "root"]))
                .unwrap_or_else(|| "maps".to_string()),
        ),
        settings
            .read(|c| c.get_string(&["mapStorage", "urlFmt"]))
            .unwrap_or_else(|| "https://maps.wz2100-autohost.net/blob/%s".to_string()),
    ));
    let lobby = Arc::new(HttpLobbyBrowser::new(
        settings
            .read(|c| c.get_string(&["lobbyUrl"]))
            .unwrap_or_else(|| "https://lobby.wz2100.net/games".to_string()),
    ));

    let settings_for_relay = Arc::clone(&settings);
    let errors = spawn_error_relay(move || {
        settings_for_relay.read(|c| c.get_string(&["discordErrorsWebhook"]))
    });

    let world = Arc::new(World::new(settings, db, isp, maps, lobby, errors));

    recovery::recover_instances(&world).await;

    let shutdown = CancellationToken::new();
    tokio::spawn(fleet::run_keepalive(Arc::clone(&world), shutdown.clone()));
    tokio::spawn(instance_cleaner(Arc::clone(&world), shutdown.clone()));
    {
        let world = Arc::clone(&world);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = http::serve(world, shutdown).await {
                error!(error = %e, "control surface failed");
            }
        });
    }

    info!("autohoster backend started");

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        _ = sigint.recv() => info!("received SIGINT, shutting down"),
    }

    world.registry.disallow_creation();
    shutdown.cancel();
    let shutdown_hosts = world
        .settings
        .read(|c| c.get_bool(&["shutdownHostsOnExit"]))
        .unwrap_or(false);
    world.registry.stop_all(shutdown_hosts).await;

    info!("shutdown complete, bye");
    Ok(())
}

/// Periodic sweep of Exited registry entries.
async fn instance_cleaner(world: Arc<World>, shutdown: CancellationToken) {
    loop {
        let period = world
            .settings
            .read(|c| c.get_i64(&["instanceCleanupTimer"]))
            .unwrap_or(30)
            .max(1) as u64;
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(Duration::from_secs(period)) => {
                world.registry.clean();
            }
        }
    }
}

fn setup_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry().with(filter).with(fmt::layer()).init();
}
