// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Global configuration: `config.json` behind a read lock, hot
//! reloadable through `/reload`.

use ah_core::conf::{Conf, ConfError};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};

pub struct Settings {
    path: PathBuf,
    conf: RwLock<Conf>,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Settings, ConfError> {
        let conf = Conf::from_file(path)?;
        Ok(Settings { path: path.to_path_buf(), conf: RwLock::new(conf) })
    }

    /// Settings wrapping an in-memory tree (tests, `/request` one-offs).
    pub fn from_conf(conf: Conf) -> Settings {
        Settings { path: PathBuf::from("config.json"), conf: RwLock::new(conf) }
    }

    /// Re-read the config file; the old tree stays on failure.
    pub fn reload(&self) -> Result<(), ConfError> {
        let fresh = Conf::from_file(&self.path)?;
        *self.conf.write() = fresh;
        Ok(())
    }

    pub fn read<R>(&self, f: impl FnOnce(&Conf) -> R) -> R {
        f(&self.conf.read())
    }

    // Commonly consulted keys, with the daemon's defaults.

    pub fn instances_path(&self) -> PathBuf {
        PathBuf::from(
            self.read(|c| c.get_string(&["instancesPath"]))
                .unwrap_or_else(|| "./instances/".to_string()),
        )
    }

    pub fn archives_path(&self) -> PathBuf {
        PathBuf::from(
            self.read(|c| c.get_string(&["archivesPath"]))
                .unwrap_or_else(|| "./archives/".to_string()),
        )
    }

    pub fn replay_storage_path(&self) -> PathBuf {
        PathBuf::from(
            self.read(|c| c.get_string(&["replayStorage"]))
                .unwrap_or_else(|| "./replayStorage/".to_string()),
        )
    }

    pub fn ports_spec(&self) -> Option<String> {
        self.read(|c| c.get_string(&["ports"]))
    }

    pub fn file_perms(&self) -> u32 {
        self.read(|c| c.get_i64(&["filePerms"])).unwrap_or(0o644) as u32
    }

    pub fn dir_perms(&self) -> u32 {
        self.read(|c| c.get_i64(&["dirPerms"])).unwrap_or(0o755) as u32
    }

    pub fn listen_addr(&self) -> String {
        self.read(|c| c.get_string(&["listenAddr"]))
            .unwrap_or_else(|| "127.0.0.1:9271".to_string())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
