// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::discord::ErrorRelay;

#[tokio::test]
async fn disabled_relay_never_blocks() {
    let relay = ErrorRelay::disabled();
    // Far past the queue depth: every post must return immediately.
    for i in 0..500 {
        relay.post(format!("error {i}"));
    }
}

#[tokio::test]
async fn relay_handle_is_cloneable() {
    let relay = ErrorRelay::disabled();
    let clone = relay.clone();
    relay.post("a");
    clone.post("b");
}
