// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-to-tar without rewriting.
//!
//! A tar ends with two zero blocks. Opening an existing archive for
//! append means seeking back over that trailer; the writer re-emits it
//! on finish.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::path::Path;

/// Size of the two trailing zero blocks.
const TRAILER_LEN: i64 = 2 * 512;

/// Open `path` positioned for appending entries. New or empty files
/// start from the beginning; existing archives are rewound over the
/// trailer.
pub fn open_seek_append(path: &Path) -> std::io::Result<tar::Builder<File>> {
    let skip_seek = match std::fs::metadata(path) {
        Ok(meta) => meta.len() == 0,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => return Err(e),
    };

    let mut file = OpenOptions::new().read(true).write(true).create(true).open(path)?;
    if !skip_seek {
        file.seek(SeekFrom::End(-TRAILER_LEN))?;
    }
    Ok(tar::Builder::new(file))
}

/// Append one file with portable ustar headers (mode 0777, size = byte
/// count).
pub fn append_file(
    builder: &mut tar::Builder<File>,
    name: &str,
    data: &[u8],
) -> std::io::Result<()> {
    let mut header = tar::Header::new_ustar();
    header.set_size(data.len() as u64);
    header.set_mode(0o777);
    builder.append_data(&mut header, name, data)
}

#[cfg(test)]
#[path = "tarfile_tests.rs"]
mod tests;
