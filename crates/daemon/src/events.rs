// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dispatcher for the hoster's line protocol.
//!
//! Each line from the child is classified against an ordered table of
//! match rules (first match wins) and handled serially per instance.
//! Handlers report whether the line was actually understood; the
//! runner logs the rest.

use crate::admission::{self, join_check};
use crate::db::LinkOutcome;
use crate::gamesubmit;
use crate::world::World;
use ah_core::conf::{overlay_get_or, Conf};
use ah_core::instance::{Instance, InstanceCommand, InstanceState};
use ah_core::util::{b64_field, b64_text, contains_any};
use ah_core::verdict::JoinVerdict;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::unix::pipe;

/// Dispatch entries expire when the verify event never arrives.
pub const DISPATCH_MAX_AGE: Duration = Duration::from_secs(15);

const LINK_TIMEOUT: Duration = Duration::from_secs(5);

const STATS_URL: &str = "https://wz2100-autohost.net/players";
const VOTEKICK_URL: &str = "https://wz2100-autohost.net/votekick";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchRule {
    Exact(&'static str),
    Prefix(&'static str),
    Suffix(&'static str),
    PrefixSuffix(&'static str, &'static str),
}

impl MatchRule {
    pub fn matches(&self, line: &str) -> bool {
        match self {
            MatchRule::Exact(s) => line == *s,
            MatchRule::Prefix(p) => line.starts_with(p),
            MatchRule::Suffix(s) => line.ends_with(s),
            MatchRule::PrefixSuffix(p, s) => line.starts_with(p) && line.ends_with(s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    StdinReady,
    StartGame,
    LobbyId,
    ChatGame,
    ChatCmd,
    ChatLobby,
    JoinApprovalNeeded,
    PlayerJoin,
    IdentityVerified,
    MovedToSpec,
    MovedToPlayer,
    Report,
    ReportExtended,
    DebugMode,
    VersionLine,
    AdminHashAdded,
    LobbyError,
    WzcmdError,
    StderrError,
}

pub struct EventRule {
    pub kind: EventKind,
    pub rule: MatchRule,
}

/// Ordered: the dispatcher short-circuits on the first matching rule.
pub const EVENT_RULES: &[EventRule] = &[
    EventRule { kind: EventKind::StdinReady, rule: MatchRule::Exact("WZCMD: stdinReadReady") },
    EventRule {
        kind: EventKind::StartGame,
        rule: MatchRule::Exact("WZEVENT: startMultiplayerGame"),
    },
    EventRule { kind: EventKind::LobbyId, rule: MatchRule::Prefix("WZEVENT: lobbyid: ") },
    EventRule { kind: EventKind::ChatGame, rule: MatchRule::Prefix("WZCHATGAM: ") },
    EventRule { kind: EventKind::ChatCmd, rule: MatchRule::Prefix("WZCHATCMD: ") },
    EventRule { kind: EventKind::ChatLobby, rule: MatchRule::Prefix("WZCHATLOB: ") },
    EventRule {
        kind: EventKind::JoinApprovalNeeded,
        rule: MatchRule::Prefix("WZEVENT: join approval needed: "),
    },
    EventRule { kind: EventKind::PlayerJoin, rule: MatchRule::Prefix("WZEVENT: player join: ") },
    EventRule {
        kind: EventKind::IdentityVerified,
        rule: MatchRule::Prefix("WZEVENT: player identity VERIFIED: "),
    },
    EventRule {
        kind: EventKind::MovedToSpec,
        rule: MatchRule::Prefix("WZEVENT: movedPlayerToSpec: "),
    },
    EventRule {
        kind: EventKind::MovedToPlayer,
        rule: MatchRule::Prefix("WZEVENT: movedSpecToPlayer: "),
    },
    EventRule {
        kind: EventKind::Report,
        rule: MatchRule::PrefixSuffix("__REPORT__", "__ENDREPORT__"),
    },
    EventRule {
        kind: EventKind::ReportExtended,
        rule: MatchRule::PrefixSuffix("__REPORTextended__", "__ENDREPORTextended__"),
    },
    EventRule { kind: EventKind::DebugMode, rule: MatchRule::Prefix("__DEBUGMODE__") },
    EventRule { kind: EventKind::VersionLine, rule: MatchRule::Prefix(" * Version: ") },
    EventRule {
        kind: EventKind::AdminHashAdded,
        rule: MatchRule::Prefix("WZCMD info: Room admin hash added"),
    },
    EventRule { kind: EventKind::LobbyError, rule: MatchRule::Prefix("WZEVENT: lobbyerror") },
    EventRule { kind: EventKind::WzcmdError, rule: MatchRule::Prefix("WZCMD error: ") },
    EventRule { kind: EventKind::StderrError, rule: MatchRule::Prefix("error   |") },
];

/// First matching rule, or None for free text.
pub fn classify(line: &str) -> Option<EventKind> {
    EVENT_RULES.iter().find(|r| r.rule.matches(line)).map(|r| r.kind)
}

enum CommandSink {
    Pipe(pipe::Sender),
    #[cfg(test)]
    Capture(Vec<String>),
}

/// Per-instance handler context: the world, the instance and the
/// child's stdin.
pub struct EventCtx {
    pub world: Arc<World>,
    pub inst: Arc<Instance>,
    sink: CommandSink,
}

impl EventCtx {
    pub fn new(world: Arc<World>, inst: Arc<Instance>, stdin: pipe::Sender) -> EventCtx {
        EventCtx { world, inst, sink: CommandSink::Pipe(stdin) }
    }

    #[cfg(test)]
    pub fn capture(world: Arc<World>, inst: Arc<Instance>) -> EventCtx {
        EventCtx { world, inst, sink: CommandSink::Capture(Vec::new()) }
    }

    #[cfg(test)]
    pub fn captured(&self) -> &[String] {
        match &self.sink {
            CommandSink::Capture(lines) => lines,
            CommandSink::Pipe(_) => &[],
        }
    }

    /// Write one command line to the child's stdin.
    pub async fn write_line(&mut self, line: &str) {
        match &mut self.sink {
            CommandSink::Pipe(tx) => {
                let mut buf = Vec::with_capacity(line.len() + 1);
                buf.extend_from_slice(line.as_bytes());
                buf.push(b'\n');
                if let Err(e) = tx.write_all(&buf).await {
                    tracing::warn!(instance = self.inst.id, error = %e, "stdin write failed");
                }
            }
            #[cfg(test)]
            CommandSink::Capture(lines) => lines.push(line.to_string()),
        }
    }

    fn save_snapshot(&self) {
        if let Err(e) = ah_storage::save(&self.inst) {
            tracing::warn!(instance = self.inst.id, error = %e, "failed to save instance snapshot");
            self.world.errors.post(format!(
                "Failed to save instance recovery json: {e} (instance {})",
                self.inst.id
            ));
        }
    }
}

/// Dispatch one line. Returns true when the line was not understood.
pub async fn process_line(ctx: &mut EventCtx, line: &str) -> bool {
    let Some(kind) = classify(line) else { return true };
    match kind {
        EventKind::StdinReady => {
            tracing::info!(instance = ctx.inst.id, "ready to input data");
            ctx.write_line("set chat quickchat newjoin").await;
            ctx.write_line("set chat quickchat all").await;
            ctx.write_line("set chat allow host").await;
            let admins = ctx.inst.spec().admins.clone();
            for hash in admins {
                ctx.write_line(&format!("admin add-hash {hash}")).await;
            }
            false
        }
        EventKind::StartGame => {
            tracing::info!(instance = ctx.inst.id, "game starting");
            if !ctx.inst.cas_state(InstanceState::InLobby, InstanceState::InGame) {
                tracing::warn!(instance = ctx.inst.id, "state swap to InGame failed");
            }
            ctx.save_snapshot();
            false
        }
        EventKind::LobbyId => handle_lobby_id(ctx, line),
        EventKind::ChatGame | EventKind::ChatCmd | EventKind::ChatLobby => {
            handle_chat(ctx, line).await
        }
        EventKind::JoinApprovalNeeded => handle_join_approval(ctx, line).await,
        EventKind::PlayerJoin => handle_identity_event(ctx, line, false).await,
        EventKind::IdentityVerified => handle_identity_event(ctx, line, true).await,
        EventKind::MovedToSpec => handle_moved(ctx, line, true),
        EventKind::MovedToPlayer => handle_moved(ctx, line, false),
        EventKind::Report => handle_report(ctx, line, false).await,
        EventKind::ReportExtended => handle_report(ctx, line, true).await,
        EventKind::DebugMode => {
            if ctx.inst.state() != InstanceState::InGame {
                tracing::warn!(instance = ctx.inst.id, "debugmode outside of game");
            }
            ctx.inst.debug_triggered.store(true, std::sync::atomic::Ordering::SeqCst);
            false
        }
        EventKind::VersionLine => handle_version(ctx, line),
        EventKind::AdminHashAdded => false,
        EventKind::LobbyError => {
            tracing::warn!(
                instance = ctx.inst.id,
                "instance was kicked out of the lobby, shutting it down"
            );
            let _ = ctx.inst.commands().send(InstanceCommand::Shutdown).await;
            true
        }
        EventKind::WzcmdError => {
            ctx.world
                .errors
                .post(format!("instance `{}` spewed a WZCMD error: {line:?}", ctx.inst.id));
            true
        }
        EventKind::StderrError => {
            ctx.world
                .errors
                .post(format!("instance `{}` spewed a regular error: {line:?}", ctx.inst.id));
            true
        }
    }
}

fn handle_lobby_id(ctx: &mut EventCtx, line: &str) -> bool {
    let rest = line.trim_start_matches("WZEVENT: lobbyid: ").trim();
    let Ok(lobby_id) = rest.parse::<i64>() else {
        tracing::warn!(instance = ctx.inst.id, line, "failed to parse lobbyid message");
        return true;
    };
    ctx.inst.lobby_id.store(lobby_id, std::sync::atomic::Ordering::SeqCst);
    ctx.inst.set_state(InstanceState::InLobby);
    ctx.save_snapshot();
    tracing::info!(instance = ctx.inst.id, lobby_id, "room listed in lobby");
    false
}

async fn handle_join_approval(ctx: &mut EventCtx, line: &str) -> bool {
    // WZEVENT: join approval needed: <joinid> <ip> <hash> <b64pubkey> <b64name> <spec|play>
    let rest = line.trim_start_matches("WZEVENT: join approval needed: ");
    let fields: Vec<&str> = rest.split_whitespace().collect();
    let [join_id, ip, _hash, pubkey_b64, name_b64, _join_type] = fields.as_slice() else {
        tracing::warn!(instance = ctx.inst.id, line, "failed to parse join approval message");
        return true;
    };
    let (Ok(pubkey), Ok(name)) = (b64_field(pubkey_b64), b64_text(name_b64)) else {
        tracing::warn!(instance = ctx.inst.id, line, "failed to decode base64 arguments");
        return true;
    };

    if let Err(e) = ctx.world.db.discover_pubkey(&pubkey).await {
        tracing::warn!(instance = ctx.inst.id, error = %e, "key discovery query failed");
    }

    let out = join_check(&ctx.world, &ctx.inst, ip, &name, &pubkey, pubkey_b64).await;
    tracing::info!(
        instance = ctx.inst.id,
        ip,
        name,
        verdict = ?out.verdict,
        "join approval resolved"
    );
    ctx.write_line(&format!(
        "join {} {join_id} 7 {}",
        out.verdict.reply_word(),
        out.reason
    ))
    .await;
    match out.verdict {
        JoinVerdict::Approve | JoinVerdict::ApproveSpec => {
            ctx.inst.stash_dispatch(pubkey_b64, out.dispatch);
        }
        JoinVerdict::Reject => {}
        JoinVerdict::Ban => {
            ctx.write_line(&format!("ban ip {ip}")).await;
        }
    }
    false
}

async fn handle_identity_event(ctx: &mut EventCtx, line: &str, verified: bool) -> bool {
    let rest = line
        .trim_start_matches("WZEVENT: player join: ")
        .trim_start_matches("WZEVENT: player identity VERIFIED: ");
    let fields: Vec<&str> = rest.split_whitespace().collect();
    let [_join_id, pubkey_b64] = fields.as_slice() else {
        tracing::warn!(instance = ctx.inst.id, line, "failed to parse player join message");
        return true;
    };
    if verified {
        ctx.inst.verified.lock().insert(pubkey_b64.to_string());
    }
    dispatch_on_join(ctx, pubkey_b64).await;
    false
}

/// MOTD, the time-limit notice, then the deferred admission dispatch.
async fn dispatch_on_join(ctx: &mut EventCtx, pubkey_b64: &str) {
    let motd = merged_motd(&ctx.inst.spec().cfgs);
    for text in motd {
        ctx.write_line(&format!("chat direct {pubkey_b64} {text}")).await;
    }
    let limit = ctx.inst.spec().settings.time_limit;
    ctx.write_line(&format!(
        "chat direct {pubkey_b64} This game has time limit of {limit} minutes."
    ))
    .await;

    if let Some(dispatch) = ctx.inst.consume_dispatch(pubkey_b64) {
        if dispatch.allow_chat {
            tracing::info!(instance = ctx.inst.id, pubkey = pubkey_b64, "allowing chat");
            ctx.write_line(&format!("set chat allow {pubkey_b64}")).await;
        }
        for message in dispatch.messages {
            ctx.write_line(&format!("chat direct {pubkey_b64} {message}")).await;
        }
    }
    ctx.inst.gc_dispatch(DISPATCH_MAX_AGE);
}

/// Merge `motd` maps across the overlay stack. Later overlays override
/// earlier ones, the empty string deletes, and output is sorted by key
/// (players notice the order).
pub fn merged_motd(cfgs: &[Conf]) -> Vec<String> {
    let mut merged: BTreeMap<String, String> = BTreeMap::new();
    for cfg in cfgs.iter().rev() {
        let Some(keys) = cfg.keys(&["motd"]) else { continue };
        for key in keys {
            match cfg.get_string(&["motd", &key]) {
                Some(value) if value.is_empty() => {
                    merged.remove(&key);
                }
                Some(value) => {
                    merged.insert(key, value);
                }
                None => {}
            }
        }
    }
    merged.into_values().collect()
}

fn handle_moved(ctx: &mut EventCtx, line: &str, to_spec: bool) -> bool {
    // WZEVENT: movedPlayerToSpec: <from> <to> <b64pubkey> ...
    let rest = line
        .trim_start_matches("WZEVENT: movedPlayerToSpec: ")
        .trim_start_matches("WZEVENT: movedSpecToPlayer: ");
    let fields: Vec<&str> = rest.split_whitespace().collect();
    let Some(pubkey_b64) = fields.get(2) else {
        tracing::warn!(instance = ctx.inst.id, line, "failed to parse moved message");
        return true;
    };
    if to_spec {
        ctx.world.moved_out.add(&ctx.world.registry, pubkey_b64, ctx.inst.id);
    } else {
        ctx.world.moved_out.remove(&ctx.world.registry, pubkey_b64, ctx.inst.id);
    }
    false
}

async fn handle_chat(ctx: &mut EventCtx, line: &str) -> bool {
    // WZCHAT___: <index> <ip> <hash> <b64pubkey> <b64name> <b64msg>
    let rest = line
        .trim_start_matches("WZCHATGAM: ")
        .trim_start_matches("WZCHATCMD: ")
        .trim_start_matches("WZCHATLOB: ");
    let fields: Vec<&str> = rest.split_whitespace().collect();
    let [_index, ip, _hash, pubkey_b64, name_b64, msg_b64] = fields.as_slice() else {
        tracing::warn!(instance = ctx.inst.id, line, "failed to parse chat message");
        return true;
    };
    let (Ok(pubkey), Ok(name), Ok(message)) =
        (b64_field(pubkey_b64), b64_text(name_b64), b64_text(msg_b64))
    else {
        tracing::warn!(instance = ctx.inst.id, line, "failed to decode chat fields");
        return true;
    };

    let inst = Arc::clone(&ctx.inst);
    let cfgs = &inst.spec().cfgs;
    let name_blacklist =
        overlay_get_or(cfgs, |c| c.get_string_vec(&["blacklist", "name"]), Vec::new());
    let msg_blacklist =
        overlay_get_or(cfgs, |c| c.get_string_vec(&["blacklist", "message"]), Vec::new());
    if contains_any(&name, &name_blacklist) || contains_any(&message, &msg_blacklist) {
        let code = admission::log_action(
            &ctx.world,
            format!(
                "{} [adolfmeasures] Message from {name_b64:?} triggered adolf suppression \
                 system (message was {msg_b64:?})",
                ctx.inst.id
            ),
        )
        .await;
        let reason = format!(
            "You were banned from joining Autohoster.\\nBan reason: 4.1.7. Any manifestations \
             of Nazism, nationalism, incitement of interracial, interethnic, interfaith \
             discord and hostility, calls for the overthrow of the government by \
             force.\\n\\nEvent ID: {code}"
        );
        ctx.write_line(&format!("ban ip {ip} {reason}")).await;
    }

    match message.trim() {
        "/stat" | "/stats" => {
            ctx.write_line(&format!("chat direct {pubkey_b64} Player statistics: {STATS_URL}"))
                .await;
        }
        "/votekick" => {
            ctx.write_line(&format!("chat direct {pubkey_b64} Vote to kick via {VOTEKICK_URL}"))
                .await;
        }
        other => {
            if let Some(code) = link_code(other) {
                handle_identity_link(ctx, pubkey_b64, &pubkey, &name, code).await;
            }
        }
    }

    // Chat rate limiting counts every message, linked or not.
    let amount = overlay_get_or(cfgs, |c| c.get_i64(&["ratelimitChatAmount"]), 0);
    let window = overlay_get_or(cfgs, |c| c.get_i64(&["ratelimitChatDuration"]), 0);
    if let Some(penalty) = ctx.world.chat_limit.handle_message(ip, amount, window) {
        ctx.write_line(&format!(
            "chat direct {pubkey_b64} You were limited to quickchat due to spamming for {}",
            crate::ratelimit::penalty_text(penalty)
        ))
        .await;
    }

    if let Err(e) = ctx.world.db.add_chat_log(ip, &name, &pubkey, &message).await {
        tracing::warn!(instance = ctx.inst.id, error = %e, "failed to log chat");
    }
    false
}

/// `/hostmsg confirm-<18 alphanumerics>`, the identity-link handshake.
fn link_code(message: &str) -> Option<&str> {
    let code = message.strip_prefix("/hostmsg confirm-")?;
    (code.len() == 18 && code.chars().all(|c| c.is_ascii_alphanumeric())).then_some(code)
}

async fn handle_identity_link(
    ctx: &mut EventCtx,
    pubkey_b64: &str,
    pubkey: &[u8],
    name: &str,
    code: &str,
) {
    if !ctx.inst.verified.lock().contains(pubkey_b64) {
        ctx.write_line(&format!(
            "chat direct {pubkey_b64} You have sent identity action confirmation message but \
             host did not yet confirm your identity, please send it again in couple seconds."
        ))
        .await;
        return;
    }
    let result =
        tokio::time::timeout(LINK_TIMEOUT, ctx.world.db.link_identity(pubkey, name, code)).await;
    let reply = match result {
        Ok(Ok(LinkOutcome::Linked)) => "Identity successfully linked to the account.",
        Ok(Ok(LinkOutcome::CodeNotFound)) => "This confirm code is not found.",
        Ok(Ok(LinkOutcome::AlreadyClaimed)) => "This identity is already claimed.",
        Ok(Ok(LinkOutcome::HasPlayedGames)) => {
            "Only identities with 0 played games can be linked after first linked identity."
        }
        Ok(Err(e)) => {
            tracing::warn!(instance = ctx.inst.id, error = %e, "identity link failed");
            return;
        }
        Err(_) => {
            tracing::warn!(instance = ctx.inst.id, "identity link timed out");
            return;
        }
    };
    ctx.write_line(&format!("chat direct {pubkey_b64} {reply}")).await;
}

async fn handle_report(ctx: &mut EventCtx, line: &str, extended: bool) -> bool {
    if ctx.inst.state() != InstanceState::InGame {
        tracing::warn!(instance = ctx.inst.id, "report dropped with non in-game state");
        return true;
    }
    let (prefix, suffix) = if extended {
        ("__REPORTextended__", "__ENDREPORTextended__")
    } else {
        ("__REPORT__", "__ENDREPORT__")
    };
    if line.len() < prefix.len() + suffix.len() {
        tracing::warn!(instance = ctx.inst.id, line, "report markers overlap");
        return true;
    }
    let body = &line[prefix.len()..line.len() - suffix.len()];
    tracing::debug!(
        instance = ctx.inst.id,
        len = body.len(),
        game_id = ctx.inst.game_id.load(std::sync::atomic::Ordering::SeqCst),
        "report received"
    );
    if !overlay_get_or(&ctx.inst.spec().cfgs, |c| c.get_bool(&["submitGames"]), true) {
        return false;
    }
    if extended {
        gamesubmit::submit_final_report(&ctx.world, &ctx.inst, body).await;
    } else {
        gamesubmit::submit_report(&ctx.world, &ctx.inst, body).await;
    }
    false
}

fn handle_version(ctx: &mut EventCtx, line: &str) -> bool {
    //  * Version: master 846187e, Built:
    //  * Version: 4.5.0-beta1, (modified locally) Built: 2024-06-23
    let rest = line.trim_start_matches(" * Version: ");
    let Some((version, _built)) = rest.split_once(" Built:") else {
        tracing::warn!(instance = ctx.inst.id, line, "weird split on version detect");
        return true;
    };
    let version = version
        .trim_end_matches(", (modified locally)")
        .trim_end_matches(',')
        .to_string();
    tracing::info!(instance = ctx.inst.id, version, "autodetected hoster version");
    *ctx.inst.autodetected_version.lock() = version;
    false
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
