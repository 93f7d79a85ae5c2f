// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tests for line classification and the event handlers.

use crate::db::BanRecord;
use crate::events::{classify, merged_motd, process_line, EventCtx, EventKind};
use crate::test_support::{test_instance, test_world};
use ah_core::conf::Conf;
use ah_core::instance::{InstanceCommand, InstanceState, JoinDispatch};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use yare::parameterized;

const PUBKEY_B64: &str = "dGVzdC1wdWJsaWMta2V5LWJ5dGVz"; // "test-public-key-bytes"
const NAME_B64: &str = "ZnJpZW5kbHk="; // "friendly"

#[parameterized(
    stdin_ready = { "WZCMD: stdinReadReady", Some(EventKind::StdinReady) },
    start_game = { "WZEVENT: startMultiplayerGame", Some(EventKind::StartGame) },
    lobby_id = { "WZEVENT: lobbyid: 12345", Some(EventKind::LobbyId) },
    chat_game = { "WZCHATGAM: 0 1.2.3.4 h k n m", Some(EventKind::ChatGame) },
    chat_cmd = { "WZCHATCMD: 0 1.2.3.4 h k n m", Some(EventKind::ChatCmd) },
    chat_lobby = { "WZCHATLOB: 0 1.2.3.4 h k n m", Some(EventKind::ChatLobby) },
    join_approval = { "WZEVENT: join approval needed: 1 2.3.4.5 h k n spec", Some(EventKind::JoinApprovalNeeded) },
    player_join = { "WZEVENT: player join: 1 key", Some(EventKind::PlayerJoin) },
    verified = { "WZEVENT: player identity VERIFIED: 1 key", Some(EventKind::IdentityVerified) },
    moved_to_spec = { "WZEVENT: movedPlayerToSpec: 2 10 key hash", Some(EventKind::MovedToSpec) },
    moved_to_player = { "WZEVENT: movedSpecToPlayer: 10 2 key hash", Some(EventKind::MovedToPlayer) },
    report = { "__REPORT__{}__ENDREPORT__", Some(EventKind::Report) },
    report_extended = { "__REPORTextended__{}__ENDREPORTextended__", Some(EventKind::ReportExtended) },
    debug_mode = { "__DEBUGMODE__", Some(EventKind::DebugMode) },
    version = { " * Version: 4.5.0, Built: 2024-06-23", Some(EventKind::VersionLine) },
    admin_added = { "WZCMD info: Room admin hash added deadbeef", Some(EventKind::AdminHashAdded) },
    lobby_error = { "WZEVENT: lobbyerror (code 4)", Some(EventKind::LobbyError) },
    wzcmd_error = { "WZCMD error: something awful", Some(EventKind::WzcmdError) },
    stderr_error = { "error   |main.cpp:120 oh no", Some(EventKind::StderrError) },
    free_text = { "info    |loading mod", None },
    partial_prefix = { "WZEVENT: lobbyid", None },
)]
fn classification(line: &str, want: Option<EventKind>) {
    assert_eq!(classify(line), want);
}

#[test]
fn report_markers_do_not_cross_match() {
    // The extended report neither starts with the plain prefix nor ends
    // with the plain suffix, and vice versa.
    assert_eq!(
        classify("__REPORTextended__{\"a\":1}__ENDREPORTextended__"),
        Some(EventKind::ReportExtended)
    );
    assert_eq!(classify("__REPORT__{\"a\":1}__ENDREPORTextended__"), None);
}

#[tokio::test]
async fn stdin_ready_seeds_chat_config_and_admins() {
    let tw = test_world(json!({}));
    let inst = test_instance(1_700_000_000, vec![json!({})]);
    let mut ctx = EventCtx::capture(Arc::new(tw.world), inst);
    assert!(!process_line(&mut ctx, "WZCMD: stdinReadReady").await);
    assert_eq!(
        ctx.captured(),
        &[
            "set chat quickchat newjoin",
            "set chat quickchat all",
            "set chat allow host",
            "admin add-hash adminhash",
        ]
    );
}

#[tokio::test]
async fn lobby_id_moves_instance_into_lobby() {
    let tw = test_world(json!({}));
    let inst = test_instance(1_700_000_000, vec![json!({})]);
    let mut ctx = EventCtx::capture(Arc::new(tw.world), inst.clone());
    assert!(!process_line(&mut ctx, "WZEVENT: lobbyid: 4242").await);
    assert_eq!(inst.lobby_id.load(Ordering::SeqCst), 4242);
    assert_eq!(inst.state(), InstanceState::InLobby);

    assert!(process_line(&mut ctx, "WZEVENT: lobbyid: not-a-number").await);
}

#[tokio::test]
async fn start_game_cas_from_in_lobby_only() {
    let tw = test_world(json!({}));
    let inst = test_instance(1_700_000_000, vec![json!({})]);
    inst.set_state(InstanceState::InLobby);
    let mut ctx = EventCtx::capture(Arc::new(tw.world), inst.clone());
    assert!(!process_line(&mut ctx, "WZEVENT: startMultiplayerGame").await);
    assert_eq!(inst.state(), InstanceState::InGame);
}

#[tokio::test]
async fn join_approval_approve_replies_and_stashes_dispatch() {
    let tw = test_world(json!({}));
    let inst = test_instance(1_700_000_000, vec![json!({})]);
    let mut ctx = EventCtx::capture(Arc::new(tw.world), inst.clone());
    let line = format!(
        "WZEVENT: join approval needed: 7 10.0.0.1 somehash {PUBKEY_B64} {NAME_B64} play"
    );
    assert!(!process_line(&mut ctx, &line).await);
    assert_eq!(ctx.captured(), &["join approve 7 7 "]);
    assert_eq!(inst.dispatch_len(), 1);
    assert!(inst.consume_dispatch(PUBKEY_B64).is_some());
}

#[tokio::test]
async fn join_approval_ban_by_name_bans_ip_with_event_id() {
    let tw = test_world(json!({ }));
    let inst = test_instance(
        1_700_000_000,
        vec![json!({ "blacklist": { "name": ["adolf"] } })],
    );
    let mut ctx = EventCtx::capture(Arc::new(tw.world), inst.clone());
    // "adolf" in base64.
    let line = format!(
        "WZEVENT: join approval needed: 7 10.0.0.1 somehash {PUBKEY_B64} YWRvbGY= play"
    );
    assert!(!process_line(&mut ctx, &line).await);

    let lines = ctx.captured();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("join reject 7 7 "));
    assert!(lines[0].contains("Event ID: A-"));
    assert!(lines[1].starts_with("ban ip 10.0.0.1"));
    // No dispatch is stashed for banned joins.
    assert_eq!(inst.dispatch_len(), 0);
}

#[tokio::test]
async fn join_approval_reject_skips_dispatch() {
    let tw = test_world(json!({}));
    tw.db.ban_records.lock().insert(
        b"test-public-key-bytes".to_vec(),
        BanRecord {
            ban_id: Some(3),
            expired: false,
            forbids_joining: true,
            ..BanRecord::default()
        },
    );
    let inst = test_instance(1_700_000_000, vec![json!({})]);
    let mut ctx = EventCtx::capture(Arc::new(tw.world), inst.clone());
    let line = format!(
        "WZEVENT: join approval needed: 9 10.0.0.1 somehash {PUBKEY_B64} {NAME_B64} play"
    );
    assert!(!process_line(&mut ctx, &line).await);
    let lines = ctx.captured();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("join reject 9 7 "));
    assert_eq!(inst.dispatch_len(), 0);
}

#[tokio::test]
async fn verify_event_sends_motd_then_dispatch() {
    let tw = test_world(json!({}));
    let inst = test_instance(
        1_700_000_000,
        vec![json!({ "motd": { "10-welcome": "Welcome to the arena" } })],
    );
    inst.stash_dispatch(
        PUBKEY_B64,
        JoinDispatch {
            allow_chat: true,
            messages: vec!["You have mail".to_string()],
            issued: std::time::Instant::now(),
        },
    );
    let mut ctx = EventCtx::capture(Arc::new(tw.world), inst.clone());
    let line = format!("WZEVENT: player identity VERIFIED: 7 {PUBKEY_B64}");
    assert!(!process_line(&mut ctx, &line).await);

    assert_eq!(
        ctx.captured(),
        &[
            format!("chat direct {PUBKEY_B64} Welcome to the arena"),
            format!("chat direct {PUBKEY_B64} This game has time limit of 45 minutes."),
            format!("set chat allow {PUBKEY_B64}"),
            format!("chat direct {PUBKEY_B64} You have mail"),
        ]
    );
    // Consumed: a second verify replays nothing.
    assert_eq!(inst.dispatch_len(), 0);
    assert!(inst.verified.lock().contains(PUBKEY_B64));
}

#[tokio::test]
async fn verify_event_garbage_collects_stale_dispatches() {
    let tw = test_world(json!({}));
    let inst = test_instance(1_700_000_000, vec![json!({})]);
    inst.stash_dispatch(
        "stale-key",
        JoinDispatch {
            allow_chat: true,
            messages: vec![],
            issued: std::time::Instant::now() - std::time::Duration::from_secs(16),
        },
    );
    let mut ctx = EventCtx::capture(Arc::new(tw.world), inst.clone());
    let line = format!("WZEVENT: player join: 7 {PUBKEY_B64}");
    assert!(!process_line(&mut ctx, &line).await);
    assert_eq!(inst.dispatch_len(), 0);
}

#[tokio::test]
async fn muted_dispatch_does_not_allow_chat() {
    let tw = test_world(json!({}));
    let inst = test_instance(1_700_000_000, vec![json!({})]);
    inst.stash_dispatch(
        PUBKEY_B64,
        JoinDispatch {
            allow_chat: false,
            messages: vec![],
            issued: std::time::Instant::now(),
        },
    );
    let mut ctx = EventCtx::capture(Arc::new(tw.world), inst.clone());
    let line = format!("WZEVENT: player join: 7 {PUBKEY_B64}");
    assert!(!process_line(&mut ctx, &line).await);
    assert!(!ctx.captured().iter().any(|l| l.starts_with("set chat allow")));
}

#[test]
fn motd_merge_order_and_delete() {
    // Stack order: map-specific, queue, fallback. Later (earlier in the
    // stack) overlays override; empty string deletes.
    let cfgs = vec![
        Conf::from_value(json!({ "motd": { "b-rules": "" } })),
        Conf::from_value(json!({ "motd": { "a-hello": "Queue hello", "c-extra": "Extra" } })),
        Conf::from_value(json!({ "motd": {
            "a-hello": "Fallback hello",
            "b-rules": "Read the rules",
        } })),
    ];
    assert_eq!(merged_motd(&cfgs), vec!["Queue hello".to_string(), "Extra".to_string()]);
}

#[tokio::test]
async fn moved_events_update_moved_out_memory() {
    let tw = test_world(json!({ "ports": "2100-2110" }));
    let registered = tw.world.registry.allocate(Some("2100-2110")).await.unwrap();
    let inst = test_instance(registered.id, vec![json!({})]);
    let world = Arc::new(tw.world);
    let mut ctx = EventCtx::capture(world.clone(), inst.clone());

    let line = format!("WZEVENT: movedPlayerToSpec: 3 11 {PUBKEY_B64} somehash");
    assert!(!process_line(&mut ctx, &line).await);
    assert!(world.moved_out.present(&world.registry, PUBKEY_B64, inst.id));

    let line = format!("WZEVENT: movedSpecToPlayer: 11 3 {PUBKEY_B64} somehash");
    assert!(!process_line(&mut ctx, &line).await);
    assert!(!world.moved_out.present(&world.registry, PUBKEY_B64, inst.id));
}

#[tokio::test]
async fn reports_dropped_outside_game() {
    let tw = test_world(json!({}));
    let inst = test_instance(1_700_000_000, vec![json!({})]);
    let world = Arc::new(tw.world);
    let mut ctx = EventCtx::capture(world, inst.clone());
    assert!(process_line(&mut ctx, "__REPORT__{}__ENDREPORT__").await);
    assert!(tw.db.games.lock().is_empty());

    inst.set_state(InstanceState::InGame);
    let body = json!({
        "game": { "version": "4.5.2" },
        "gameTime": 1000,
        "playerData": []
    })
    .to_string();
    assert!(!process_line(&mut ctx, &format!("__REPORT__{body}__ENDREPORT__")).await);
    assert_eq!(tw.db.games.lock().len(), 1);
}

#[tokio::test]
async fn submit_games_false_skips_submission() {
    let tw = test_world(json!({}));
    let inst = test_instance(1_700_000_000, vec![json!({ "submitGames": false })]);
    inst.set_state(InstanceState::InGame);
    let world = Arc::new(tw.world);
    let mut ctx = EventCtx::capture(world, inst);
    assert!(!process_line(&mut ctx, "__REPORT__{}__ENDREPORT__").await);
    assert!(tw.db.games.lock().is_empty());
}

#[tokio::test]
async fn debug_mode_sets_flag() {
    let tw = test_world(json!({}));
    let inst = test_instance(1_700_000_000, vec![json!({})]);
    inst.set_state(InstanceState::InGame);
    let mut ctx = EventCtx::capture(Arc::new(tw.world), inst.clone());
    assert!(!process_line(&mut ctx, "__DEBUGMODE__").await);
    assert!(inst.debug_triggered.load(Ordering::SeqCst));
}

#[tokio::test]
async fn version_autodetection() {
    let cases = [
        (" * Version: master 846187e, Built: 2024-01-01", "master 846187e"),
        (" * Version: 4.5.0-beta1, Built: 2024-06-23", "4.5.0-beta1"),
        (" * Version: 4.5.0-beta1, (modified locally) Built: 2024-06-23", "4.5.0-beta1"),
    ];
    for (line, want) in cases {
        let tw = test_world(json!({}));
        let inst = test_instance(1_700_000_000, vec![json!({})]);
        let mut ctx = EventCtx::capture(Arc::new(tw.world), inst.clone());
        assert!(!process_line(&mut ctx, line).await);
        assert_eq!(*inst.autodetected_version.lock(), want, "{line}");
    }
}

#[tokio::test]
async fn lobby_error_sends_self_shutdown() {
    let tw = test_world(json!({}));
    let inst = test_instance(1_700_000_000, vec![json!({})]);
    let mut rx = inst.take_command_rx().unwrap();
    let mut ctx = EventCtx::capture(Arc::new(tw.world), inst.clone());
    assert!(process_line(&mut ctx, "WZEVENT: lobbyerror (code 4)").await);
    assert_eq!(rx.try_recv().unwrap(), InstanceCommand::Shutdown);
}

#[tokio::test]
async fn chat_is_logged_and_blacklist_bans() {
    let tw = test_world(json!({}));
    let inst = test_instance(
        1_700_000_000,
        vec![json!({ "blacklist": { "message": ["1488"] } })],
    );
    let world = Arc::new(tw.world);
    let mut ctx = EventCtx::capture(world, inst);

    // "gg wp" in base64.
    let line = format!("WZCHATGAM: 0 10.0.0.1 somehash {PUBKEY_B64} {NAME_B64} Z2cgd3A=");
    assert!(!process_line(&mut ctx, &line).await);
    assert!(ctx.captured().is_empty());
    {
        let chatlog = tw.db.chatlog.lock();
        assert_eq!(chatlog.len(), 1);
        assert_eq!(chatlog[0].3, "gg wp");
    }

    // "x 1488 x" in base64 trips the message blacklist.
    let line = format!("WZCHATLOB: 0 10.0.0.1 somehash {PUBKEY_B64} {NAME_B64} eCAxNDg4IHg=");
    assert!(!process_line(&mut ctx, &line).await);
    let lines = ctx.captured();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("ban ip 10.0.0.1 "));
    assert!(lines[0].contains("Event ID: A-"));
    // Banned chat is still recorded.
    assert_eq!(tw.db.chatlog.lock().len(), 2);
}

#[tokio::test]
async fn stat_command_answers_with_url() {
    let tw = test_world(json!({}));
    let inst = test_instance(1_700_000_000, vec![json!({})]);
    let mut ctx = EventCtx::capture(Arc::new(tw.world), inst);
    // "/stats" in base64.
    let line = format!("WZCHATCMD: 0 10.0.0.1 somehash {PUBKEY_B64} {NAME_B64} L3N0YXRz");
    assert!(!process_line(&mut ctx, &line).await);
    assert_eq!(ctx.captured().len(), 1);
    assert!(ctx.captured()[0].contains("https://wz2100-autohost.net/players"));
}

#[tokio::test]
async fn link_confirmation_requires_verified_identity() {
    let tw = test_world(json!({}));
    let inst = test_instance(1_700_000_000, vec![json!({})]);
    let world = Arc::new(tw.world);
    let mut ctx = EventCtx::capture(world, inst.clone());

    // "/hostmsg confirm-AAAAAAAAAAAAAAAAAA" in base64.
    let msg_b64 = ah_core::util::b64_encode(b"/hostmsg confirm-AAAAAAAAAAAAAAAAAA");
    let line = format!("WZCHATCMD: 0 10.0.0.1 somehash {PUBKEY_B64} {NAME_B64} {msg_b64}");
    assert!(!process_line(&mut ctx, &line).await);
    assert!(ctx.captured()[0].contains("did not yet confirm your identity"));

    inst.verified.lock().insert(PUBKEY_B64.to_string());
    assert!(!process_line(&mut ctx, &line).await);
    assert!(ctx
        .captured()
        .last()
        .unwrap()
        .contains("Identity successfully linked to the account."));
}
