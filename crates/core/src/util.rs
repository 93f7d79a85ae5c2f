// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Small shared helpers: event codes, blacklist matching, base64 fields.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::Rng;

const CODE_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Random alphanumeric string of length `len`.
pub fn random_string(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| CODE_CHARS[rng.gen_range(0..CODE_CHARS.len())] as char)
        .collect()
}

/// Support-correlation token attached to every automatic rejection/ban:
/// `A-` followed by 14 random alphanumerics.
pub fn event_code() -> String {
    format!("A-{}", random_string(14))
}

/// True when `s` contains any of the configured substrings.
pub fn contains_any(s: &str, needles: &[String]) -> bool {
    needles.iter().any(|n| !n.is_empty() && s.contains(n.as_str()))
}

/// Decode one standard-base64 field.
pub fn b64_field(field: &str) -> Result<Vec<u8>, base64::DecodeError> {
    BASE64.decode(field)
}

/// Decode a base64 field whose payload is expected to be UTF-8 text
/// (player names, chat messages). Invalid UTF-8 is replaced.
pub fn b64_text(field: &str) -> Result<String, base64::DecodeError> {
    Ok(String::from_utf8_lossy(&BASE64.decode(field)?).into_owned())
}

/// Encode bytes back to standard base64 (for stdin commands keyed by
/// public key).
pub fn b64_encode(data: &[u8]) -> String {
    BASE64.encode(data)
}

#[cfg(test)]
#[path = "util_tests.rs"]
mod tests;
