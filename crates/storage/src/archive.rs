// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Weekly tar archival of finished instances.
//!
//! One archive per `⌊id / 604800⌋` week keeps the file count bounded.
//! FIFOs are drained into `<pipe>.txt` before the tree is appended, and
//! the conf dir is removed afterwards. All archiving is serialized:
//! tars are not safely concurrent appenders.

use crate::tarfile;
use nix::fcntl::OFlag;
use parking_lot::Mutex;
use std::io::Read;
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Instance ids below this cannot be real creation timestamps.
const EARLIEST_SANE_ID: i64 = 1_593_464_400;

const SECONDS_PER_WEEK: i64 = 7 * 24 * 60 * 60;

/// How long a drain keeps listening for late data before the FIFO is
/// unlinked. A dying child may still be flushing stderr when archival
/// starts.
const DRAIN_DEADLINE: Duration = Duration::from_secs(1);

const DRAIN_POLL: Duration = Duration::from_millis(25);

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("path {0:?} does not look like an instance dir")]
    SenselessPath(PathBuf),
    #[error("draining {pipe}: {source}")]
    Drain {
        pipe: String,
        #[source]
        source: std::io::Error,
    },
    #[error("appending to tar: {0}")]
    Append(#[source] std::io::Error),
    #[error("removing conf dir: {0}")]
    Remove(#[source] std::io::Error),
}

/// Week bucket for an instance id.
pub fn week_of(id: i64) -> i64 {
    id / SECONDS_PER_WEEK
}

fn instance_id_of(conf_dir: &Path) -> Option<i64> {
    let id: i64 = conf_dir.file_name()?.to_str()?.parse().ok()?;
    (id > EARLIEST_SANE_ID).then_some(id)
}

pub struct Archiver {
    archives_dir: PathBuf,
    lock: Mutex<()>,
}

impl Archiver {
    pub fn new(archives_dir: PathBuf) -> Archiver {
        Archiver { archives_dir, lock: Mutex::new(()) }
    }

    /// Drain pipes, append the conf dir tree to the week tar and remove
    /// the directory.
    pub fn archive_instance(&self, conf_dir: &Path) -> Result<(), ArchiveError> {
        let _guard = self.lock.lock();

        let id = instance_id_of(conf_dir)
            .ok_or_else(|| ArchiveError::SenselessPath(conf_dir.to_path_buf()))?;

        tracing::info!(conf_dir = %conf_dir.display(), "archiving, dumping pipes");
        for pipe in ["stdin", "stdout", "stderr"] {
            drain_remove_pipe(&conf_dir.join(format!("{pipe}.pipe"))).map_err(|source| {
                ArchiveError::Drain { pipe: pipe.to_string(), source }
            })?;
        }

        tracing::info!(conf_dir = %conf_dir.display(), week = week_of(id), "filling archive");
        self.append_tree(conf_dir, id).map_err(ArchiveError::Append)?;

        tracing::info!(conf_dir = %conf_dir.display(), "removing instance directory");
        std::fs::remove_dir_all(conf_dir).map_err(ArchiveError::Remove)
    }

    fn append_tree(&self, conf_dir: &Path, id: i64) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.archives_dir)?;
        let tar_path = self.archives_dir.join(format!("{}.tar", week_of(id)));
        let mut builder = tarfile::open_seek_append(&tar_path)?;

        // Entry names keep the instance id as their first component.
        let strip_from = conf_dir.parent().unwrap_or(conf_dir);
        let mut stack = vec![conf_dir.to_path_buf()];
        while let Some(dir) = stack.pop() {
            let mut entries: Vec<_> =
                std::fs::read_dir(&dir)?.collect::<Result<Vec<_>, _>>()?;
            entries.sort_by_key(|e| e.file_name());
            for entry in entries {
                let path = entry.path();
                let ftype = entry.file_type()?;
                if ftype.is_dir() {
                    if entry.file_name() == "cache" {
                        continue;
                    }
                    stack.push(path);
                    continue;
                }
                if !ftype.is_file() {
                    continue;
                }
                let name = path
                    .strip_prefix(strip_from)
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .into_owned();
                let data = std::fs::read(&path)?;
                tarfile::append_file(&mut builder, &name, &data)?;
            }
        }

        builder.finish()
    }
}

/// Read whatever a FIFO holds, keep listening for late flushes until a
/// 1 s deadline, persist non-empty output next to the pipe as
/// `<name>.txt`, then unlink the FIFO. Missing pipes are fine (the
/// runner may have never created them).
fn drain_remove_pipe(path: &Path) -> std::io::Result<()> {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if !meta.file_type().is_fifo() {
        return Err(std::io::Error::other("not a pipe"));
    }

    // RDWR + nonblocking: the open never hangs waiting for a writer and
    // reads return immediately once the buffered data is gone.
    let mut file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(OFlag::O_NONBLOCK.bits())
        .open(path)?;

    // The deadline is absolute: reads poll until it passes, so output
    // written while the drain is already underway is still captured.
    let deadline = Instant::now() + DRAIN_DEADLINE;
    let mut data = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match file.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => data.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    break;
                }
                std::thread::sleep(DRAIN_POLL);
            }
            Err(e) => return Err(e),
        }
    }
    drop(file);

    if !data.is_empty() {
        let mut txt = path.as_os_str().to_owned();
        txt.push(".txt");
        std::fs::write(PathBuf::from(txt), &data)?;
    }
    std::fs::remove_file(path)
}

#[cfg(test)]
#[path = "archive_tests.rs"]
mod tests;
