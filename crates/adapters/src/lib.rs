// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! ah-adapters: the backend's external collaborators behind traits.
//!
//! Each adapter has a real HTTP implementation and, under the
//! `test-support` feature, a fake the daemon's tests drive directly.

pub mod discord;
pub mod isp;
pub mod lobby;
pub mod maps;

pub use discord::{spawn_error_relay, ErrorRelay};
pub use isp::{HttpIspChecker, IspCheck, IspError, IspInfo};
pub use lobby::{HttpLobbyBrowser, LobbyBrowser, LobbyError, LobbyRoom};
pub use maps::{HttpMapStore, MapError, MapStore};

#[cfg(any(test, feature = "test-support"))]
pub use isp::FakeIsp;
#[cfg(any(test, feature = "test-support"))]
pub use lobby::FakeLobby;
#[cfg(any(test, feature = "test-support"))]
pub use maps::FakeMapStore;
