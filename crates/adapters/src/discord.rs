// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Discord error relay.
//!
//! Errors are posted through a non-blocking bounded channel, aggregated
//! for a window, then delivered to a webhook: one message when the
//! batch fits, a file attachment otherwise.

use std::time::Duration;
use tokio::sync::mpsc;

/// Posts never block: when the relay is this far behind, new errors are
/// dropped on the floor.
const RELAY_QUEUE_DEPTH: usize = 128;

/// Aggregation window between webhook deliveries.
const FLUSH_INTERVAL: Duration = Duration::from_secs(60);

/// Largest batch sent inline; anything bigger becomes an attachment.
const MAX_INLINE_LEN: usize = 1995;

/// Cloneable handle for reporting notable errors.
#[derive(Clone)]
pub struct ErrorRelay {
    tx: mpsc::Sender<String>,
}

impl ErrorRelay {
    /// A relay whose messages go nowhere (no webhook configured, tests).
    pub fn disabled() -> ErrorRelay {
        let (tx, _rx) = mpsc::channel(RELAY_QUEUE_DEPTH);
        ErrorRelay { tx }
    }

    /// Queue one error line; never blocks.
    pub fn post(&self, message: impl Into<String>) {
        let _ = self.tx.try_send(message.into());
    }
}

/// Spawn the aggregator task. `webhook` is re-read per flush so config
/// reloads take effect without restarting the relay.
pub fn spawn_error_relay(
    webhook: impl Fn() -> Option<String> + Send + 'static,
) -> ErrorRelay {
    let (tx, mut rx) = mpsc::channel::<String>(RELAY_QUEUE_DEPTH);
    tokio::spawn(async move {
        let client = reqwest::Client::new();
        let mut pending = String::new();
        let mut flusher = tokio::time::interval(FLUSH_INTERVAL);
        flusher.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(msg) => {
                            pending.push_str(&msg);
                            pending.push('\n');
                        }
                        None => break,
                    }
                }
                _ = flusher.tick() => {
                    if pending.is_empty() {
                        continue;
                    }
                    let batch = std::mem::take(&mut pending);
                    match webhook() {
                        Some(url) => deliver(&client, &url, batch).await,
                        None => tracing::warn!("errors webhook not set, dropping batch"),
                    }
                }
            }
        }
    });
    ErrorRelay { tx }
}

async fn deliver(client: &reqwest::Client, url: &str, batch: String) {
    let result = if batch.len() <= MAX_INLINE_LEN {
        client
            .post(url)
            .json(&serde_json::json!({ "username": "Backend", "content": batch }))
            .send()
            .await
    } else {
        let payload = serde_json::json!({ "username": "Backend" }).to_string();
        let form = reqwest::multipart::Form::new()
            .text("payload_json", payload)
            .part(
                "files[0]",
                reqwest::multipart::Part::bytes(batch.into_bytes()).file_name("errors.txt"),
            );
        client.post(url).multipart(form).send().await
    };

    match result {
        Ok(rsp) if rsp.status().is_success() => {}
        Ok(rsp) => tracing::warn!(status = %rsp.status(), "errors webhook refused batch"),
        Err(e) => tracing::warn!(error = %e, "errors webhook delivery failed"),
    }
}

#[cfg(test)]
#[path = "discord_tests.rs"]
mod tests;
