// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Data model of the hoster's `__REPORT__` payloads.
//!
//! The backend records these verbatim; the only derived shape is the
//! per-frame graph column set appended to `games.graphs`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GameReport {
    #[serde(rename = "JSONversion", default)]
    pub json_version: i64,
    #[serde(default)]
    pub game: GameHeader,
    #[serde(rename = "gameTime", default)]
    pub game_time: i64,
    #[serde(rename = "playerData", default)]
    pub player_data: Vec<PlayerData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GameHeader {
    pub alliances_type: i64,
    pub base_type: i64,
    pub game_limit: i64,
    pub idle_time: i64,
    pub map_name: String,
    pub max_players: i64,
    pub mods: String,
    pub multi_tech_level: i64,
    pub power_type: i64,
    pub scavengers: i64,
    pub start_date: i64,
    pub version: String,
}

/// The `__REPORTextended__` payload sent once at game end.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GameReportExtended {
    #[serde(rename = "JSONversion", default)]
    pub json_version: i64,
    #[serde(rename = "endDate", default)]
    pub end_date: i64,
    #[serde(default)]
    pub game: GameHeader,
    #[serde(rename = "gameTime", default)]
    pub game_time: i64,
    #[serde(rename = "playerData", default)]
    pub player_data: Vec<PlayerData>,
    #[serde(rename = "researchComplete", default)]
    pub research_complete: Vec<ResearchEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchEntry {
    pub name: String,
    pub position: i64,
    #[serde(rename = "struct")]
    pub structure: i64,
    pub time: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayerStatistics {
    pub kills: i64,
    pub power: i64,
    pub score: i64,
    pub droids: i64,
    pub droids_built: i64,
    pub droids_lost: i64,
    pub hp: i64,
    pub structs: i64,
    pub structures_built: i64,
    pub structures_lost: i64,
    pub structure_kills: i64,
    pub summ_exp: i64,
    pub oil_rigs: i64,
    pub research_complete: i64,
    pub recent_power_lost: i64,
    pub recent_power_won: i64,
    pub recent_research_performance: i64,
    pub recent_research_potential: i64,
    pub recent_droid_power_lost: i64,
    pub recent_structure_power_lost: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PlayerData {
    pub index: i64,
    pub position: i64,
    pub name: String,
    #[serde(rename = "publicKey")]
    pub public_key: String,
    pub team: i64,
    pub usertype: String,
    #[serde(rename = "colour")]
    pub color: i64,
    pub faction: i64,
    #[serde(flatten)]
    pub stats: PlayerStatistics,
}

/// One appended row of `games.graphs`: per-player integer columns for a
/// single report frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GraphFrame {
    pub game_time: i64,
    pub kills: Vec<i64>,
    pub power: Vec<i64>,
    pub score: Vec<i64>,
    pub droids: Vec<i64>,
    pub droids_built: Vec<i64>,
    pub droids_lost: Vec<i64>,
    pub hp: Vec<i64>,
    pub structs: Vec<i64>,
    pub structures_built: Vec<i64>,
    pub structures_lost: Vec<i64>,
    pub structure_kills: Vec<i64>,
    pub summ_exp: Vec<i64>,
    pub oil_rigs: Vec<i64>,
    pub research_complete: Vec<i64>,
    pub recent_power_lost: Vec<i64>,
    pub recent_power_won: Vec<i64>,
    pub recent_research_performance: Vec<i64>,
    pub recent_research_potential: Vec<i64>,
    pub recent_droid_power_lost: Vec<i64>,
    pub recent_structure_power_lost: Vec<i64>,
}

impl GraphFrame {
    /// Derive a frame from a report. Slots whose player never presented
    /// a public key stay zeroed, matching the recorded row width.
    pub fn from_report(report: &GameReport) -> GraphFrame {
        let n = report.player_data.len();
        let mut frame = GraphFrame {
            game_time: report.game_time,
            kills: vec![0; n],
            power: vec![0; n],
            score: vec![0; n],
            droids: vec![0; n],
            droids_built: vec![0; n],
            droids_lost: vec![0; n],
            hp: vec![0; n],
            structs: vec![0; n],
            structures_built: vec![0; n],
            structures_lost: vec![0; n],
            structure_kills: vec![0; n],
            summ_exp: vec![0; n],
            oil_rigs: vec![0; n],
            research_complete: vec![0; n],
            recent_power_lost: vec![0; n],
            recent_power_won: vec![0; n],
            recent_research_performance: vec![0; n],
            recent_research_potential: vec![0; n],
            recent_droid_power_lost: vec![0; n],
            recent_structure_power_lost: vec![0; n],
        };
        for (i, p) in report.player_data.iter().enumerate() {
            if p.public_key.is_empty() {
                continue;
            }
            frame.kills[i] = p.stats.kills;
            frame.power[i] = p.stats.power;
            frame.score[i] = p.stats.score;
            frame.droids[i] = p.stats.droids;
            frame.droids_built[i] = p.stats.droids_built;
            frame.droids_lost[i] = p.stats.droids_lost;
            frame.hp[i] = p.stats.hp;
            frame.structs[i] = p.stats.structs;
            frame.structures_built[i] = p.stats.structures_built;
            frame.structures_lost[i] = p.stats.structures_lost;
            frame.structure_kills[i] = p.stats.structure_kills;
            frame.summ_exp[i] = p.stats.summ_exp;
            frame.oil_rigs[i] = p.stats.oil_rigs;
            frame.research_complete[i] = p.stats.research_complete;
            frame.recent_power_lost[i] = p.stats.recent_power_lost;
            frame.recent_power_won[i] = p.stats.recent_power_won;
            frame.recent_research_performance[i] = p.stats.recent_research_performance;
            frame.recent_research_potential[i] = p.stats.recent_research_potential;
            frame.recent_droid_power_lost[i] = p.stats.recent_droid_power_lost;
            frame.recent_structure_power_lost[i] = p.stats.recent_structure_power_lost;
        }
        frame
    }
}

#[cfg(test)]
#[path = "report_tests.rs"]
mod tests;
