// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Replay storage.
//!
//! Replays are indexed by the base-32 digits of the game id, least
//! significant first: all digits but the last become nested directories
//! and the last (most significant) digit is the filename. That spreads
//! consecutive game ids across sibling directories.

use std::io::Read;
use std::path::{Path, PathBuf};

const REPLAY_MAGIC: &[u8; 4] = b"WZrp";

/// zstd level used for the copy kept in the database.
const DB_COMPRESSION_LEVEL: i32 = 19;

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("no replay found under {0:?}")]
    NotFound(PathBuf),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn base32_digits_reversed(gid: i64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuv";
    let mut n = gid.unsigned_abs();
    if n == 0 {
        return "0".to_string();
    }
    let mut out = String::new();
    while n > 0 {
        out.push(DIGITS[(n % 32) as usize] as char);
        n /= 32;
    }
    out
}

/// Directory a game id's replay lives in.
pub fn storage_dir(root: &Path, gid: i64) -> PathBuf {
    if gid <= 0 {
        return root.to_path_buf();
    }
    let digits = base32_digits_reversed(gid);
    let mut dir = root.to_path_buf();
    for c in digits[..digits.len() - 1].chars() {
        dir.push(c.to_string());
    }
    dir
}

/// Filename (without extension) for a game id's replay.
pub fn storage_filename(gid: i64) -> String {
    let digits = base32_digits_reversed(gid);
    digits[digits.len() - 1..].to_string()
}

/// Find the finished replay in a conf dir: `replay/multiplay/*.wzrp`
/// starting with the `WZrp` magic.
pub fn find_replay(conf_dir: &Path) -> Result<PathBuf, ReplayError> {
    let replay_dir = conf_dir.join("replay").join("multiplay");
    for entry in std::fs::read_dir(&replay_dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("wzrp") {
            continue;
        }
        let mut header = [0u8; 4];
        let mut file = std::fs::File::open(&path)?;
        if file.read_exact(&mut header).is_ok() && &header == REPLAY_MAGIC {
            return Ok(path);
        }
    }
    Err(ReplayError::NotFound(replay_dir))
}

/// Compress and place a replay into storage; returns the written path.
pub fn store_replay(root: &Path, gid: i64, data: &[u8]) -> Result<PathBuf, ReplayError> {
    let dir = storage_dir(root, gid);
    std::fs::create_dir_all(&dir)?;
    let path = dir.join(format!("{}.wzrp.zst", storage_filename(gid)));
    let compressed = zstd::encode_all(data, 0)?;
    std::fs::write(&path, compressed)?;
    Ok(path)
}

/// Best-compression copy for the `games.replay` column.
pub fn compress_for_db(data: &[u8]) -> std::io::Result<Vec<u8>> {
    zstd::encode_all(data, DB_COMPRESSION_LEVEL)
}

#[cfg(test)]
#[path = "replay_tests.rs"]
mod tests;
