// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The join-admission pipeline.
//!
//! Eight stages run in order for every join attempt; each may tighten
//! the verdict (Approve, ApproveSpec, Reject, Ban) but never loosen
//! it, and Reject/Ban stop the walk. Database trouble degrades to "no
//! record": a flaky lookup must not lock players out.

use crate::world::World;
use ah_core::conf::{overlay_get_or, Conf};
use ah_core::instance::{Instance, JoinDispatch};
use ah_core::util::{contains_any, event_code};
use ah_core::verdict::JoinVerdict;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::IpAddr;
use std::str::FromStr;

const CONTACT_BLURB: &str = "You can contact Autohoster administration to appeal or get \
additional information: https://wz2100-autohost.net/about#contact\\n\\n";

const BLACKLIST_BAN_REASON: &str = "4.1.7. Any manifestations of Nazism, nationalism, \
incitement of interracial, interethnic, interfaith discord and hostility, calls for the \
overthrow of the government by force.";

pub struct AdmissionOutcome {
    pub dispatch: JoinDispatch,
    pub verdict: JoinVerdict,
    pub reason: String,
}

fn outcome(dispatch: JoinDispatch, verdict: JoinVerdict, reason: String) -> AdmissionOutcome {
    AdmissionOutcome { dispatch, verdict, reason }
}

/// Record an automatic moderation action; the returned event code goes
/// into the player-visible reason so support can correlate.
pub(crate) async fn log_action(world: &World, description: String) -> String {
    let code = event_code();
    if let Err(e) = world.db.log_action(&code, &description).await {
        tracing::warn!(error = %e, "failed to log action in database");
    }
    code
}

pub async fn join_check(
    world: &World,
    inst: &Instance,
    ip: &str,
    name: &str,
    pubkey: &[u8],
    pubkey_b64: &str,
) -> AdmissionOutcome {
    let cfgs = &inst.spec().cfgs;
    let mut dispatch = JoinDispatch::new();
    let mut verdict = JoinVerdict::Approve;

    // Stage 1: name blacklist.
    let banned_names =
        overlay_get_or(cfgs, |c| c.get_string_vec(&["blacklist", "name"]), Vec::new());
    if contains_any(name, &banned_names) {
        let code = log_action(
            world,
            format!(
                "{} [adolfmeasures] Join name {name:?} triggered adolf suppression system",
                inst.id
            ),
        )
        .await;
        return outcome(
            dispatch,
            JoinVerdict::Ban,
            format!(
                "You were banned from joining Autohoster.\\nBan reason: \
                 {BLACKLIST_BAN_REASON}\\n\\n{CONTACT_BLURB}Event ID: {code}"
            ),
        );
    }

    // Stage 2: database ban lookup.
    let record = match world.db.ban_lookup(pubkey).await {
        Ok(record) => record,
        Err(e) => {
            tracing::warn!(instance = inst.id, error = %e, "failed to request bans from database");
            None
        }
    };
    let account = record.as_ref().and_then(|r| r.account);
    if let Some(record) = record.as_ref().filter(|r| r.active()) {
        let ban_id = record.ban_id.unwrap_or(0);
        if record.forbids_joining {
            let expires = record
                .expires
                .map(|t| t.to_string())
                .unwrap_or_else(|| "never".to_string());
            let issued = record.issued.map(|t| t.to_string()).unwrap_or_default();
            let reason = record.reason.clone().unwrap_or_default();
            return outcome(
                dispatch,
                JoinVerdict::Reject,
                format!(
                    "You were banned from joining Autohoster.\\nBan reason: \
                     {reason}\\n\\n{CONTACT_BLURB}Ban issued: {issued}\\nBan expires: \
                     {expires}\\nEvent ID: M-{ban_id}"
                ),
            );
        }
        if record.forbids_chatting {
            dispatch
                .messages
                .push(format!("You are banned from chatting in this room (ban ID: M-{ban_id})"));
            dispatch.allow_chat = false;
        }
        if record.forbids_playing {
            dispatch.messages.push(format!(
                "You are banned from participating in this game (ban ID: M-{ban_id})"
            ));
            verdict = verdict.tighten(JoinVerdict::ApproveSpec);
        }
    }

    // Stage 3: ISP/proxy check for unlinked players.
    if account.is_none() && !overlay_get_or(cfgs, |c| c.get_bool(&["allowNonLinkedHide"]), false)
    {
        match world.isp.lookup(ip).await {
            Err(e) => {
                tracing::warn!(instance = inst.id, error = %e, "failed to lookup ISP");
            }
            Ok(info) => {
                let asn_banned = asn_is_banned(&info.asn, cfgs);
                if info.is_proxy || asn_banned {
                    let code = log_action(
                        world,
                        format!(
                            "{} [antiproxy] join attempt from {name:?} did not pass isp \
                             checks: proxy {} asnban {} (ip was {ip})",
                            inst.id, info.is_proxy, asn_banned
                        ),
                    )
                    .await;
                    return outcome(
                        dispatch,
                        JoinVerdict::Reject,
                        format!(
                            "You were rejected from joining Autohoster.\\nReason: 2.1.1. \
                             Disruption or other interference with the system with or without \
                             defined purpose.\\n\\nIf you believe it is a mistake, feel free \
                             to contact us: \
                             https://wz2100-autohost.net/about#contact\\n\\nPlease provide \
                             event ID: {code} with your request."
                        ),
                    );
                }
            }
        }
    }

    // Stage 4: room policies for non-linked players.
    let allow_join = overlay_get_or(cfgs, |c| c.get_bool(&["allowNonLinkedJoin"]), true);
    if !allow_join && account.is_none() {
        return outcome(
            dispatch,
            JoinVerdict::Reject,
            "You can not join this game.\\n\\nYou must join with linked player identity. \
             Link one at:\\nhttps://wz2100-autohost.net/wzlinkcheck\\n\\nDo not bother \
             admins/moderators about this."
                .to_string(),
        );
    }
    let allow_play = overlay_get_or(cfgs, |c| c.get_bool(&["allowNonLinkedPlay"]), true);
    if !allow_play && account.is_none() {
        dispatch
            .messages
            .push("You are not allowed to participate in this game due to being not registered".to_string());
        verdict = verdict.tighten(JoinVerdict::ApproveSpec);
    }
    let allow_chat = overlay_get_or(cfgs, |c| c.get_bool(&["allowNonLinkedChat"]), true);
    if !allow_chat && account.is_none() {
        dispatch
            .messages
            .push("You are not allowed to chat in this room due to being not registered".to_string());
        dispatch
            .messages
            .push("Link your identity on https://wz2100-autohost.net/wzlinkcheck".to_string());
        dispatch.allow_chat = false;
    }

    // Stage 5: leaver rate limit.
    let threshold = overlay_get_or(cfgs, |c| c.get_i64(&["antiSpamThresholdCount"]), 3);
    let window_hours = overlay_get_or(cfgs, |c| c.get_i64(&["antiSpamThresholdDuration"]), 72);
    if threshold > 0 {
        let leavers = match world.db.leaver_count(pubkey, account, window_hours).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(instance = inst.id, error = %e, "failed to count leaver games");
                0
            }
        };
        if leavers >= threshold && verdict == JoinVerdict::Approve {
            dispatch.messages.push(
                "You were automatically rate limited for leaving the game early. Do not \
                 contact admins/moderators about this, they will not help you"
                    .to_string(),
            );
            verdict = verdict.tighten(JoinVerdict::ApproveSpec);
        }
    }

    // Stage 6: moderator moved-out memory.
    if world.moved_out.present(&world.registry, pubkey_b64, inst.id)
        && verdict == JoinVerdict::Approve
    {
        dispatch.messages.push(
            "You not allowed to participate in the game because moderator moved you out earlier"
                .to_string(),
        );
        verdict = verdict.tighten(JoinVerdict::ApproveSpec);
    }

    // Stage 7: ip-based mute for unlinked players.
    if account.is_none() && ip_is_muted(inst, cfgs, ip) {
        dispatch.allow_chat = false;
    }

    // Stage 8: chat rate-limit penalties for unlinked players.
    if account.is_none() {
        if let Some(remaining) = world.chat_limit.check_penalty(ip) {
            dispatch.allow_chat = false;
            dispatch.messages.push(format!(
                "You were limited to quickchat due to spamming for {}",
                crate::ratelimit::penalty_text(remaining)
            ));
        }
    }

    tracing::debug!(
        instance = inst.id,
        pubkey = pubkey_b64,
        account = ?account,
        verdict = ?verdict,
        allow_chat = dispatch.allow_chat,
        "connfilter resolved"
    );

    outcome(dispatch, verdict, String::new())
}

fn asn_is_banned(asn: &str, cfgs: &[Conf]) -> bool {
    cfgs.iter().any(|c| {
        c.get_string_vec(&["bannedASNs"])
            .is_some_and(|banned| contains_any(asn, &banned))
    })
}

/// Merge `ipmute` maps across overlays (later overlay overrides, false
/// deletes), then match the client address against each CIDR key.
fn ip_is_muted(inst: &Instance, cfgs: &[Conf], ip: &str) -> bool {
    let Ok(client) = IpAddr::from_str(ip) else {
        tracing::warn!(instance = inst.id, ip, "ipmute invalid client ip");
        return false;
    };

    let mut rules: HashMap<String, bool> = HashMap::new();
    for cfg in cfgs.iter().rev() {
        let Some(keys) = cfg.keys(&["ipmute"]) else { continue };
        for key in keys {
            match cfg.get_bool(&["ipmute", &key]) {
                Some(false) => {
                    rules.remove(&key);
                }
                Some(true) => {
                    rules.insert(key, true);
                }
                None => {}
            }
        }
    }

    for (cidr, enabled) in rules {
        if !enabled {
            continue;
        }
        let Ok(net) = ipnet::IpNet::from_str(&cidr) else {
            tracing::warn!(instance = inst.id, rule = %cidr, "ipmute rule is not in CIDR notation");
            continue;
        };
        if net.contains(&client) {
            tracing::info!(instance = inst.id, ip, rule = %cidr, "ipmute applied to client");
            return true;
        }
    }
    false
}

/// Process-wide memory of players a moderator kicked to spectator:
/// identity → instance ids. Entries whose instance is no longer
/// joinable are pruned on every call.
#[derive(Default)]
pub struct MovedOut {
    map: Mutex<HashMap<String, Vec<i64>>>,
}

impl MovedOut {
    pub fn new() -> MovedOut {
        MovedOut::default()
    }

    fn cleanup(map: &mut HashMap<String, Vec<i64>>, registry: &crate::registry::Registry) {
        map.retain(|_, ids| {
            ids.retain(|id| registry.instance_in_lobby(*id));
            !ids.is_empty()
        });
    }

    pub fn add(&self, registry: &crate::registry::Registry, identity: &str, instance: i64) {
        let mut map = self.map.lock();
        Self::cleanup(&mut map, registry);
        map.entry(identity.to_string()).or_default().push(instance);
    }

    pub fn remove(&self, registry: &crate::registry::Registry, identity: &str, instance: i64) {
        let mut map = self.map.lock();
        Self::cleanup(&mut map, registry);
        if let Some(ids) = map.get_mut(identity) {
            ids.retain(|id| *id != instance);
            if ids.is_empty() {
                map.remove(identity);
            }
        }
    }

    pub fn present(
        &self,
        registry: &crate::registry::Registry,
        identity: &str,
        instance: i64,
    ) -> bool {
        let mut map = self.map.lock();
        Self::cleanup(&mut map, registry);
        map.get(identity).is_some_and(|ids| ids.contains(&instance))
    }
}

#[cfg(test)]
#[path = "admission_tests.rs"]
mod tests;
