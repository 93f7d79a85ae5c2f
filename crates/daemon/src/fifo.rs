// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The three named pipes an instance is driven through.
//!
//! The child inherits plain RDWR file handles as stdio; after the
//! spawn the parent opens its own ends through tokio's pipe support so
//! scanning stays async and cancellable. Opening RDWR on both sides
//! keeps EOF semantics stable in each direction.

use nix::sys::stat::Mode;
use std::fs::File;
use std::path::Path;
use tokio::net::unix::pipe;

pub const STDIN_PIPE: &str = "stdin.pipe";
pub const STDOUT_PIPE: &str = "stdout.pipe";
pub const STDERR_PIPE: &str = "stderr.pipe";

/// Parent-side ends of an instance's pipes.
pub struct ParentPipes {
    pub stdin: pipe::Sender,
    pub stdout: pipe::Receiver,
    pub stderr: pipe::Receiver,
}

/// Create the three FIFOs inside a conf dir.
pub fn create_fifos(conf_dir: &Path, perms: u32) -> std::io::Result<()> {
    let mode = Mode::from_bits_truncate(perms);
    for name in [STDIN_PIPE, STDOUT_PIPE, STDERR_PIPE] {
        nix::unistd::mkfifo(&conf_dir.join(name), mode).map_err(std::io::Error::from)?;
    }
    Ok(())
}

/// RDWR handles for wiring the child's stdio at spawn.
pub fn child_stdio(conf_dir: &Path) -> std::io::Result<(File, File, File)> {
    let open = |name: &str| {
        std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(conf_dir.join(name))
    };
    Ok((open(STDIN_PIPE)?, open(STDOUT_PIPE)?, open(STDERR_PIPE)?))
}

/// Open (or re-open) the parent's ends of existing FIFOs.
pub fn open_parent(conf_dir: &Path) -> std::io::Result<ParentPipes> {
    let stdin = pipe::OpenOptions::new()
        .read_write(true)
        .open_sender(conf_dir.join(STDIN_PIPE))?;
    let stdout = pipe::OpenOptions::new()
        .read_write(true)
        .open_receiver(conf_dir.join(STDOUT_PIPE))?;
    let stderr = pipe::OpenOptions::new()
        .read_write(true)
        .open_receiver(conf_dir.join(STDERR_PIPE))?;
    Ok(ParentPipes { stdin, stdout, stderr })
}

#[cfg(test)]
#[path = "fifo_tests.rs"]
mod tests;
