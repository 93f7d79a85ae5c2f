// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! ah-storage: everything the backend persists outside Postgres:
//! weekly tar archives of dead instances, zstd-compressed replays, and
//! the per-instance recovery snapshot.

mod archive;
mod replay;
mod snapshot;
mod tarfile;

pub use archive::{week_of, ArchiveError, Archiver};
pub use replay::{
    compress_for_db, find_replay, storage_dir, storage_filename, store_replay, ReplayError,
};
pub use snapshot::{
    load, restore, save, snapshot_of, InstanceSnapshot, SnapshotError, SNAPSHOT_FILENAME,
};
