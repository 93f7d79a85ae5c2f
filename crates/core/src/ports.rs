// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Port pool parsing.
//!
//! Grammar: comma-separated entries, each `N` or `N-N`. Zero and
//! negatives are reserved, malformed entries are skipped, duplicates
//! collapse keeping first occurrence.

/// Parse a port spec such as `"2100,2105,2110-2115"` into an ordered,
/// deduplicated list.
pub fn parse_port_spec(input: &str) -> Vec<u16> {
    let mut out: Vec<u16> = Vec::new();
    for entry in input.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        match entry.split_once('-') {
            None => {
                if let Ok(p) = entry.parse::<u16>() {
                    if p != 0 {
                        out.push(p);
                    }
                }
            }
            Some((lo, hi)) => {
                let (Ok(lo), Ok(hi)) = (lo.trim().parse::<u16>(), hi.trim().parse::<u16>())
                else {
                    continue;
                };
                for p in lo..=hi {
                    if p != 0 {
                        out.push(p);
                    }
                }
            }
        }
    }
    dedup_keep_order(out)
}

fn dedup_keep_order(list: Vec<u16>) -> Vec<u16> {
    let mut seen = std::collections::HashSet::new();
    list.into_iter().filter(|p| seen.insert(*p)).collect()
}

#[cfg(test)]
#[path = "ports_tests.rs"]
mod tests;
