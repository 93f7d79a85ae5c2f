// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `/proc` probing: process liveness and cmdline verification.

use std::path::Path;

/// State characters counted as alive. Z (zombie) is dead: only the
/// original spawner may reap, so recovery must treat a zombie as gone.
pub fn is_live_state(state: char) -> bool {
    matches!(state, 'R' | 'S' | 'D' | 'W' | 'I')
}

/// State character from `/proc/<pid>/stat`, or None when the process
/// does not exist or the line cannot be parsed.
///
/// The comm field may contain spaces and parentheses; the state char is
/// the first non-space after the last `)`.
pub fn pid_stat_state(pid: i64) -> Option<char> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    parse_stat_state(&stat)
}

pub(crate) fn parse_stat_state(stat: &str) -> Option<char> {
    let after_comm = &stat[stat.rfind(')')? + 1..];
    after_comm.chars().find(|c| !c.is_whitespace())
}

pub fn is_pid_alive(pid: i64) -> bool {
    pid_stat_state(pid).is_some_and(is_live_state)
}

pub fn read_pid_cmdline(pid: i64) -> std::io::Result<Vec<u8>> {
    std::fs::read(format!("/proc/{pid}/cmdline"))
}

/// Sanity checks on a running process's argv before re-attaching: it
/// must mention the instance id, `--configdir=` and
/// `--async-join-approve`.
pub fn cmdline_looks_right(cmdline: &[u8], instance_id: i64) -> bool {
    let text = String::from_utf8_lossy(cmdline);
    text.contains(&instance_id.to_string())
        && text.contains("--configdir=")
        && text.contains("--async-join-approve")
}

/// Compare live argv against the one recorded at spawn. A mismatch is
/// reported but tolerated; the structural checks above gate recovery.
pub fn cmdline_matches_recorded(cmdline: &[u8], conf_dir: &Path) -> std::io::Result<bool> {
    let recorded = std::fs::read(conf_dir.join("cmdline"))?;
    Ok(recorded == cmdline)
}

#[cfg(test)]
#[path = "proc_tests.rs"]
mod tests;
