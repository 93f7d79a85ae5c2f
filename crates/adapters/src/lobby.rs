// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Upstream lobby browser.
//!
//! Only the room list is consumed; the fleet controller uses it to
//! decide when queues need respawning.

use async_trait::async_trait;
#[cfg(any(test, feature = "test-support"))]
use parking_lot::Mutex;
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum LobbyError {
    #[error("lobby lookup request: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LobbyRoom {
    pub name: String,
    pub map: String,
    pub host: String,
    pub port: u16,
    pub players: i64,
    pub max_players: i64,
}

#[derive(Debug, Default, Deserialize)]
struct LobbyResponse {
    #[serde(default)]
    rooms: Vec<LobbyRoom>,
}

#[async_trait]
pub trait LobbyBrowser: Send + Sync {
    async fn rooms(&self) -> Result<Vec<LobbyRoom>, LobbyError>;
}

pub struct HttpLobbyBrowser {
    url: String,
    client: reqwest::Client,
}

impl HttpLobbyBrowser {
    pub fn new(url: String) -> HttpLobbyBrowser {
        HttpLobbyBrowser { url, client: reqwest::Client::new() }
    }
}

#[async_trait]
impl LobbyBrowser for HttpLobbyBrowser {
    async fn rooms(&self) -> Result<Vec<LobbyRoom>, LobbyError> {
        let rsp: LobbyResponse =
            self.client.get(&self.url).send().await?.error_for_status()?.json().await?;
        Ok(rsp.rooms)
    }
}

/// Scriptable room list for tests.
#[cfg(any(test, feature = "test-support"))]
#[derive(Default)]
pub struct FakeLobby {
    rooms: Mutex<Vec<LobbyRoom>>,
}

#[cfg(any(test, feature = "test-support"))]
impl FakeLobby {
    pub fn new() -> FakeLobby {
        FakeLobby::default()
    }

    pub fn set_rooms(&self, rooms: Vec<LobbyRoom>) {
        *self.rooms.lock() = rooms;
    }

    pub fn set_room_count(&self, n: usize) {
        let rooms = (0..n)
            .map(|i| LobbyRoom { name: format!("room-{i}"), ..LobbyRoom::default() })
            .collect();
        self.set_rooms(rooms);
    }
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl LobbyBrowser for FakeLobby {
    async fn rooms(&self) -> Result<Vec<LobbyRoom>, LobbyError> {
        Ok(self.rooms.lock().clone())
    }
}
