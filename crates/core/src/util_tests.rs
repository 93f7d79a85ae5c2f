// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::util::{b64_field, b64_text, contains_any, event_code, random_string};

#[test]
fn event_code_shape() {
    let code = event_code();
    assert_eq!(code.len(), 16);
    assert!(code.starts_with("A-"));
    assert!(code[2..].chars().all(|c| c.is_ascii_alphanumeric()));
}

#[test]
fn random_strings_differ() {
    assert_ne!(random_string(14), random_string(14));
}

#[test]
fn contains_any_is_substring_match() {
    let needles = vec!["adolf".to_string(), "1488".to_string()];
    assert!(contains_any("xXadolfXx", &needles));
    assert!(contains_any("player1488", &needles));
    assert!(!contains_any("innocent", &needles));
    assert!(!contains_any("anything", &[]));
    // Empty needles never match everything.
    assert!(!contains_any("anything", &[String::new()]));
}

#[test]
fn base64_fields_decode() {
    assert_eq!(b64_field("aGVsbG8=").unwrap(), b"hello");
    assert_eq!(b64_text("aGVsbG8=").unwrap(), "hello");
    assert!(b64_field("!!!").is_err());
}
